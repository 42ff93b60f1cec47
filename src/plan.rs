//! Plan catalog (component D) -- the heart of the system.
//!
//! A [`PlanList`] holds the first-class plans for one `(collective
//! type, memory type)` pair: a strictly ordered, non-overlapping
//! sequence of ranges, each owning a descending-score-sorted fallback
//! list. `spec.md` §9 steers away from the reference implementation's
//! intrusive doubly-linked list toward a plain `Vec`-backed design --
//! there is no need for a generational arena here since entries are
//! never referenced by external index, only walked in range order.

use crate::error::{Status, UcgError, UcgResult};
use crate::topology::Vgroup;
use std::sync::Arc;
use tracing::trace;

/// A half-open byte range `[start, end)` a plan covers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PlanRange {
    pub start: u64,
    pub end: u64,
}

/// `spec.md` §8: "Range touching PLAN_RANGE_MAX (ULONG_MAX)".
pub const PLAN_RANGE_MAX: u64 = u64::MAX;

impl PlanRange {
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        PlanRange { start, end }
    }

    #[must_use]
    pub fn contains(&self, x: u64) -> bool {
        self.start <= x && x < self.end
    }

    #[must_use]
    pub fn overlaps(&self, other: &PlanRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[must_use]
    pub fn equals(&self, other: &PlanRange) -> bool {
        self.start == other.start && self.end == other.end
    }

    /// Split at `point`, which must lie strictly inside this range.
    fn split_at(&self, point: u64) -> (PlanRange, PlanRange) {
        debug_assert!(self.start < point && point < self.end);
        (PlanRange::new(self.start, point), PlanRange::new(point, self.end))
    }
}

/// An op produced by a plan's `prepare`: the stateful executable
/// instance implementing trigger/progress/discard (`spec.md` §4.F/I).
pub trait PlanOp: Send {
    /// Kick off the op's first unit of work.
    fn trigger(&mut self) -> Status;
    /// Attempt more work; safe to call repeatedly until terminal.
    fn progress(&mut self) -> Status;
    /// Release any resources the op holds without running it further.
    fn discard(&mut self);
    /// Propagate the owning request's id down into this op, so p2p
    /// posts can fold it into their tag's op-seq field. Leaf ops that
    /// post messages override this; composite/no-op ops can ignore it.
    fn set_request_id(&mut self, _id: u16) {}
}

/// Plan `prepare` callback: build an op bound to `vgroup`, or decline
/// with `UNSUPPORTED` to trigger fallback chaining. `transport` is the
/// p2p abstraction (component C) the produced op posts through.
pub trait PrepareFn: Send + Sync {
    fn prepare(&self, vgroup: &Vgroup, transport: &Arc<dyn crate::p2p::Transport>, args: &CollArgs) -> UcgResult<Box<dyn PlanOp>>;
}

/// A selectable algorithm record: score, range, and the prepare
/// callback that builds an op for it (`spec.md` §4.D's plan attr:
/// `{id, name, domain, score, range, vgroup pointer, prepare,
/// deprecated flag}`, GLOSSARY: "Plan").
///
/// `id` is the stable key plan-attribute overrides (component E) match
/// against; `name` is a separate, possibly-friendlier label and is not
/// used for lookup. The two happen to carry the same string for every
/// plan this crate ships today, but nothing in `PlanList` treats them
/// as interchangeable. `id`/`name`/`domain` are always owned strings,
/// independently duplicated on every split -- no two plans ever alias
/// the same heap string (recovered from the C source's
/// `strdup`-per-plan behaviour).
#[derive(Clone)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub score: i32,
    pub range: PlanRange,
    /// The vgroup this plan is scoped to, or `None` if it applies to
    /// whatever vgroup `prepare` is called with. Compared by pointer
    /// identity, matching `prepare`'s own `Arc::ptr_eq` comparison.
    pub vgroup: Option<Arc<Vgroup>>,
    pub prepare: Arc<dyn PrepareFn>,
    pub deprecated: bool,
}

impl Plan {
    #[must_use]
    pub fn new(id: impl Into<String>, domain: impl Into<String>, score: i32, range: PlanRange, prepare: Arc<dyn PrepareFn>) -> Self {
        let id = id.into();
        Plan { name: id.clone(), id, domain: domain.into(), score, range, vgroup: None, prepare, deprecated: false }
    }

    /// Scope this plan to a specific vgroup -- e.g. a topology-aware
    /// plan meant only for a `node_leader` subgroup rather than the
    /// full group `prepare` is normally called with. No built-in plan
    /// uses this yet (every shipped algorithm is vgroup-agnostic), but
    /// the field has to exist for `compact_key_eq` to tell two
    /// differently-scoped plans apart.
    #[must_use]
    pub fn with_vgroup(mut self, vgroup: Arc<Vgroup>) -> Self {
        self.vgroup = Some(vgroup);
        self
    }

    fn split_at(&self, point: u64) -> (Plan, Plan) {
        let (l, r) = self.range.split_at(point);
        let mut left = self.clone();
        let mut right = self.clone();
        left.range = l;
        right.range = r;
        (left, right)
    }

    fn vgroup_eq(&self, other: &Plan) -> bool {
        match (&self.vgroup, &other.vgroup) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Compaction equality: same prepare target, same score, same id,
    /// same vgroup scope (`spec.md` §4.D step 4: "adjacent plans with
    /// equal `{vgroup, prepare, score, type, fallback shape}` are
    /// merged"). Distinct algorithms with equal scores should not
    /// silently merge into one.
    fn compact_key_eq(&self, other: &Plan) -> bool {
        self.score == other.score && self.id == other.id && Arc::ptr_eq(&self.prepare, &other.prepare) && self.vgroup_eq(other)
    }
}

/// A first-class plan plus its fallback list, sorted by descending
/// score (`spec.md` GLOSSARY: "First-class plan" / "Fallback plan").
#[derive(Clone)]
pub struct FirstClassEntry {
    pub plan: Plan,
    pub fallbacks: Vec<Plan>,
}

impl FirstClassEntry {
    fn new(plan: Plan) -> Self {
        FirstClassEntry { plan, fallbacks: Vec::new() }
    }

    fn insert_fallback(&mut self, plan: Plan) {
        let pos = self.fallbacks.partition_point(|p| p.score >= plan.score);
        self.fallbacks.insert(pos, plan);
    }

    fn absorb_fallbacks_of(&mut self, other: &FirstClassEntry) {
        for fb in other.fallbacks.clone() {
            self.insert_fallback(fb);
        }
    }

    fn split_at(&self, point: u64) -> (FirstClassEntry, FirstClassEntry) {
        let (l, r) = self.plan.split_at(point);
        let mut left = FirstClassEntry::new(l);
        let mut right = FirstClassEntry::new(r);
        for fb in &self.fallbacks {
            let (fl, fr) = fb.split_at(point);
            left.fallbacks.push(fl);
            right.fallbacks.push(fr);
        }
        (left, right)
    }

    fn shape_eq(&self, other: &FirstClassEntry) -> bool {
        self.plan.compact_key_eq(&other.plan)
            && self.fallbacks.len() == other.fallbacks.len()
            && self.fallbacks.iter().zip(&other.fallbacks).all(|(a, b)| a.compact_key_eq(b))
    }
}

/// The first-class plan list for one `(collective type, memory type)`
/// pair: ascending, non-overlapping ranges (`spec.md` §8 invariant 1).
#[derive(Clone, Default)]
pub struct PlanList {
    entries: Vec<FirstClassEntry>,
}

impl PlanList {
    #[must_use]
    pub fn new() -> Self {
        PlanList::default()
    }

    #[must_use]
    pub fn entries(&self) -> &[FirstClassEntry] {
        &self.entries
    }

    /// Mutable access for `plan_attr::apply_to_list`, the only caller
    /// that needs to rewrite plans in place after they've been added.
    pub fn entries_mut(&mut self) -> &mut [FirstClassEntry] {
        &mut self.entries
    }

    /// `plans_add`: add one plan per `spec.md` §4.D's four-step
    /// algorithm. Deprecated plans are dropped silently.
    pub fn add(&mut self, new_plan: Plan) -> UcgResult<()> {
        if new_plan.deprecated {
            trace!(name = %new_plan.name, "dropping deprecated plan at add time");
            return Ok(());
        }

        // Step 1: normalise -- split any existing entry straddled by
        // either of the new plan's boundaries, so every pairwise range
        // relation becomes equal or disjoint.
        self.split_at_boundary(new_plan.range.start);
        self.split_at_boundary(new_plan.range.end);

        // Step 1 (cont'd): fragment the new plan itself against the
        // (now boundary-aligned) existing ranges it overlaps.
        let fragments = self.fragment_new_plan(&new_plan);

        for fragment in fragments {
            if let Some(pos) = self.entries.iter().position(|e| e.plan.range.equals(&fragment.range)) {
                // Step 2: equal-range collision.
                self.merge_equal_range(pos, fragment);
            } else {
                // Step 3: disjoint insert, ascending-range order.
                let pos = self.entries.partition_point(|e| e.plan.range.start < fragment.range.start);
                self.entries.insert(pos, FirstClassEntry::new(fragment));
            }
        }

        self.compact();
        Ok(())
    }

    /// Split whatever existing entry straddles `point`, if any.
    fn split_at_boundary(&mut self, point: u64) {
        if let Some(idx) = self.entries.iter().position(|e| e.plan.range.start < point && point < e.plan.range.end) {
            let (l, r) = self.entries[idx].split_at(point);
            self.entries.splice(idx..=idx, [l, r]);
        }
    }

    /// Break `new_plan`'s range into fragments aligned with whatever
    /// existing entries it overlaps (after boundary normalisation,
    /// those entries are each either fully inside or fully outside
    /// `new_plan`'s range).
    fn fragment_new_plan(&self, new_plan: &Plan) -> Vec<Plan> {
        let mut fragments = Vec::new();
        let mut cursor = new_plan.range.start;
        let mut overlapping: Vec<&FirstClassEntry> = self
            .entries
            .iter()
            .filter(|e| e.plan.range.overlaps(&new_plan.range))
            .collect();
        overlapping.sort_by_key(|e| e.plan.range.start);

        for entry in overlapping {
            if entry.plan.range.start > cursor {
                let mut frag = new_plan.clone();
                frag.range = PlanRange::new(cursor, entry.plan.range.start);
                fragments.push(frag);
            }
            let mut frag = new_plan.clone();
            frag.range = entry.plan.range;
            fragments.push(frag);
            cursor = entry.plan.range.end;
        }
        if cursor < new_plan.range.end {
            let mut frag = new_plan.clone();
            frag.range = PlanRange::new(cursor, new_plan.range.end);
            fragments.push(frag);
        }
        fragments
    }

    /// Step 2: `existing` at `pos` and `fragment` share a range. The
    /// higher score wins and becomes/stays first-class; a tie keeps the
    /// existing plan first-class (matches `spec.md` §8 scenario 1). The
    /// loser is inserted into the winner's fallback list; if the winner
    /// is the new fragment, it inherits the loser's own fallbacks too.
    fn merge_equal_range(&mut self, pos: usize, fragment: Plan) {
        let existing = &self.entries[pos];
        if fragment.score > existing.plan.score {
            let mut winner = FirstClassEntry::new(fragment);
            winner.absorb_fallbacks_of(existing);
            winner.insert_fallback(existing.plan.clone());
            self.entries[pos] = winner;
        } else {
            self.entries[pos].insert_fallback(fragment);
        }
    }

    /// Step 4: merge adjacent entries with identical attributes and
    /// fallback shape into one spanning their union of ranges.
    fn compact(&mut self) {
        let mut i = 0;
        while i + 1 < self.entries.len() {
            let adjacent = self.entries[i].plan.range.end == self.entries[i + 1].plan.range.start;
            if adjacent && self.entries[i].shape_eq(&self.entries[i + 1]) {
                let next_end = self.entries[i + 1].plan.range.end;
                let fallback_ends: Vec<u64> = self.entries[i + 1].fallbacks.iter().map(|f| f.range.end).collect();
                self.entries[i].plan.range.end = next_end;
                for (l, end) in self.entries[i].fallbacks.iter_mut().zip(fallback_ends) {
                    l.range.end = end;
                }
                self.entries.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }

    /// `plans_merge(&dst, src)`: build a new list from a deep copy of
    /// `self`, add every plan of `src`, and only commit on full
    /// success -- on any failure `self` is left untouched.
    pub fn merge(&mut self, src: &PlanList) -> UcgResult<()> {
        let mut candidate = self.clone();
        for entry in &src.entries {
            candidate.add(entry.plan.clone())?;
            for fb in &entry.fallbacks {
                candidate.add(fb.clone())?;
            }
        }
        *self = candidate;
        Ok(())
    }

    /// Prepare (lookup): find the first-class plan covering `msg_size`
    /// and call its prepare; on `UNSUPPORTED` walk the fallback list in
    /// score order. `NOT_FOUND` if no range covers `msg_size` or every
    /// candidate declines.
    pub fn select(
        &self,
        msg_size: u64,
        vgroup: &Vgroup,
        transport: &Arc<dyn crate::p2p::Transport>,
        args: &CollArgs,
    ) -> UcgResult<Box<dyn PlanOp>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.plan.range.contains(msg_size))
            .ok_or(UcgError::NotFound)?;

        match entry.plan.prepare.prepare(vgroup, transport, args) {
            Err(UcgError::Unsupported) => {}
            other => return other,
        }
        for fallback in &entry.fallbacks {
            match fallback.prepare.prepare(vgroup, transport, args) {
                Err(UcgError::Unsupported) => continue,
                other => return other,
            }
        }
        Err(UcgError::NotFound)
    }
}

/// Collective type, used to index the plan catalog matrix
/// (`spec.md` §4.D: "(coll-type, mem-type) list").
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CollType {
    Bcast,
    Allreduce,
    Reduce,
    Barrier,
    Alltoallv,
    Scatterv,
    Gatherv,
    Allgatherv,
}

/// Buffer memory type; the plan catalog is indexed per (coll, mem).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum MemType {
    #[default]
    Host,
    Device,
}

/// Type-erased, per-collective operation arguments passed to a plan's
/// `prepare`. `RawBuf` fields describe memory whose layout is
/// described by a [`crate::datatype::Datatype`], not by the Rust type
/// system (see `datatype.rs`'s module doc).
pub enum CollArgs {
    Bcast { buf: crate::datatype::RawBuf, count: usize, dt: crate::datatype::Datatype, root: crate::topology::Rank },
    Allreduce {
        sendbuf: Option<crate::datatype::RawBuf>,
        recvbuf: crate::datatype::RawBuf,
        count: usize,
        dt: crate::datatype::Datatype,
        op: crate::datatype::ReduceOp,
    },
    Reduce {
        sendbuf: Option<crate::datatype::RawBuf>,
        recvbuf: Option<crate::datatype::RawBuf>,
        count: usize,
        dt: crate::datatype::Datatype,
        op: crate::datatype::ReduceOp,
        root: crate::topology::Rank,
    },
    Barrier,
    Alltoallv {
        sendbuf: crate::datatype::RawBuf,
        sendcounts: Vec<usize>,
        senddispls: Vec<usize>,
        recvbuf: crate::datatype::RawBuf,
        recvcounts: Vec<usize>,
        recvdispls: Vec<usize>,
        dt: crate::datatype::Datatype,
    },
    Scatterv {
        sendbuf: Option<crate::datatype::RawBuf>,
        sendcounts: Vec<usize>,
        senddispls: Vec<usize>,
        recvbuf: crate::datatype::RawBuf,
        recvcount: usize,
        dt: crate::datatype::Datatype,
        root: crate::topology::Rank,
    },
    Gatherv {
        sendbuf: crate::datatype::RawBuf,
        sendcount: usize,
        recvbuf: Option<crate::datatype::RawBuf>,
        recvcounts: Vec<usize>,
        recvdispls: Vec<usize>,
        dt: crate::datatype::Datatype,
        root: crate::topology::Rank,
    },
    Allgatherv {
        sendbuf: crate::datatype::RawBuf,
        sendcount: usize,
        recvbuf: crate::datatype::RawBuf,
        recvcounts: Vec<usize>,
        recvdispls: Vec<usize>,
        dt: crate::datatype::Datatype,
    },
}

impl CollArgs {
    /// Message-size formulas from `spec.md` §4.D, used as the plan
    /// selection key.
    #[must_use]
    pub fn msg_size(&self, group_size: usize) -> u64 {
        match self {
            CollArgs::Bcast { count, dt, .. } => (dt.size() * count) as u64,
            CollArgs::Allreduce { count, dt, .. } | CollArgs::Reduce { count, dt, .. } => (dt.size() * count) as u64,
            CollArgs::Barrier | CollArgs::Alltoallv { .. } | CollArgs::Scatterv { .. } | CollArgs::Gatherv { .. } => 0,
            CollArgs::Allgatherv { recvcounts, dt, .. } => {
                if group_size == 0 {
                    0
                } else {
                    (recvcounts.iter().sum::<usize>() * dt.size()) as u64 / group_size as u64
                }
            }
        }
    }
}
