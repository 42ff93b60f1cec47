//! Communication-peer cursors shared by the per-collective algorithms.
//!
//! Each iterator advances one step per call and yields the peer(s) to
//! exchange with at that step; it carries no buffers or transport, only
//! the topology of the algorithm (`spec.md` §4.I: "Iterators (ring
//! iter, k-nomial tree iter, recursive-doubling iter)").

/// One step of a recursive-doubling exchange: `partner = rank XOR
/// mask`, mask doubling until it reaches the next power of two at or
/// above `size`.
pub struct RecursiveDoublingIter {
    rank: i32,
    size: usize,
    mask: usize,
}

impl RecursiveDoublingIter {
    #[must_use]
    pub fn new(rank: i32, size: usize) -> Self {
        RecursiveDoublingIter { rank, size, mask: 1 }
    }

    /// Next partner rank, or `None` once the mask has covered the
    /// whole group.
    pub fn next_partner(&mut self) -> Option<i32> {
        if self.mask >= self.size {
            return None;
        }
        let partner = self.rank ^ (self.mask as i32);
        self.mask <<= 1;
        if (partner as usize) < self.size {
            Some(partner)
        } else {
            // Non-power-of-two group size: this rank has no partner at
            // this step, skip to the next one.
            self.next_partner()
        }
    }
}

/// One step of a ring exchange: every rank talks to `(rank+1) %
/// size` (send) and `(rank-1+size) % size` (recv), `size - 1` steps
/// total.
pub struct RingIter {
    rank: i32,
    size: usize,
    step: usize,
}

impl RingIter {
    #[must_use]
    pub fn new(rank: i32, size: usize) -> Self {
        RingIter { rank, size, step: 0 }
    }

    /// `(send_to, recv_from)` for the next step, or `None` once all
    /// `size - 1` steps have been taken.
    pub fn next_step(&mut self) -> Option<(i32, i32)> {
        if self.size <= 1 || self.step >= self.size - 1 {
            return None;
        }
        let send_to = (self.rank + 1).rem_euclid(self.size as i32);
        let recv_from = (self.rank - 1).rem_euclid(self.size as i32);
        self.step += 1;
        Some((send_to, recv_from))
    }
}

/// A binomial tree rooted at `root`: at step `k`, a rank whose
/// distance from root (mod size) has exactly `k` trailing zero bits in
/// its binary offset sends to the rank offset by `2^k`. Used for
/// `bcast` (root to leaves) and `reduce` (leaves to root, steps taken
/// in reverse).
pub struct BinomialTreeIter {
    rank: i32,
    root: i32,
    size: usize,
    step: u32,
}

impl BinomialTreeIter {
    #[must_use]
    pub fn new(rank: i32, root: i32, size: usize) -> Self {
        BinomialTreeIter { rank, root, size, step: 0 }
    }

    fn relative_rank(&self) -> i32 {
        (self.rank - self.root).rem_euclid(self.size as i32)
    }

    /// For `bcast`: `Some(child)` if this rank must forward to `child`
    /// at the next step, else `None` (done).
    pub fn next_bcast_child(&mut self) -> Option<i32> {
        let rel = self.relative_rank();
        loop {
            let distance = 1i32 << self.step;
            if distance as usize >= self.size {
                return None;
            }
            self.step += 1;
            if rel == 0 || (distance & rel) == 0 {
                let child_rel = rel + distance;
                if (child_rel as usize) < self.size {
                    return Some((self.root + child_rel).rem_euclid(self.size as i32));
                }
                continue;
            }
            return None;
        }
    }

    /// For `bcast`: the parent this rank receives from, if any.
    #[must_use]
    pub fn parent(&self) -> Option<i32> {
        let rel = self.relative_rank();
        if rel == 0 {
            return None;
        }
        let distance = 1i32 << (31 - rel.leading_zeros());
        Some((self.root + (rel - distance)).rem_euclid(self.size as i32))
    }
}
