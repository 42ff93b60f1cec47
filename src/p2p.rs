//! Point-to-point abstraction (component C): tagged non-blocking
//! send/recv over an opaque transport, with the in-flight counters
//! every collective algorithm polls to know when it may advance.

use crate::error::{Status, UcgError, UcgResult};
use crate::topology::Rank;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// The 64-bit tag layout `[op-seq:16 | sender-rank:24 | group-id:24]`
/// (`spec.md` §4.C). `op-seq` disambiguates concurrent collectives in
/// the same group; `sender-rank`+`group-id` is the sender mask the
/// transport uses to route.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Tag(u64);

const SENDER_RANK_BITS: u32 = 24;
const GROUP_ID_BITS: u32 = 24;
const OP_SEQ_BITS: u32 = 16;
const SENDER_RANK_MASK: u64 = (1 << SENDER_RANK_BITS) - 1;
const GROUP_ID_MASK: u64 = (1 << GROUP_ID_BITS) - 1;
const OP_SEQ_MASK: u64 = (1 << OP_SEQ_BITS) - 1;

impl Tag {
    /// Build a tag from its three fields. Each field is truncated to
    /// its bit width.
    #[must_use]
    pub fn new(op_seq: u16, sender_rank: u32, group_id: u32) -> Self {
        let op_seq = u64::from(op_seq) & OP_SEQ_MASK;
        let sender_rank = u64::from(sender_rank) & SENDER_RANK_MASK;
        let group_id = u64::from(group_id) & GROUP_ID_MASK;
        Tag((op_seq << (SENDER_RANK_BITS + GROUP_ID_BITS)) | (sender_rank << GROUP_ID_BITS) | group_id)
    }

    #[must_use]
    pub fn op_seq(self) -> u16 {
        ((self.0 >> (SENDER_RANK_BITS + GROUP_ID_BITS)) & OP_SEQ_MASK) as u16
    }

    #[must_use]
    pub fn sender_rank(self) -> u32 {
        ((self.0 >> GROUP_ID_BITS) & SENDER_RANK_MASK) as u32
    }

    #[must_use]
    pub fn group_id(self) -> u32 {
        (self.0 & GROUP_ID_MASK) as u32
    }

    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

static NEXT_OP_TOKEN: AtomicU64 = AtomicU64::new(1);

/// A process-local identity for one [`OpState`], scoping transport
/// bookkeeping to the op that posted it. Two ops can share the same
/// `Arc<dyn Transport>` (e.g. two `Group`s whose vgroups reuse the
/// same physical connection); without this, one op's `progress` call
/// would drain completions that belong to the other. Never put on the
/// wire -- `Tag` alone is what a peer matches against.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OpToken(u64);

impl OpToken {
    #[must_use]
    pub fn new() -> Self {
        OpToken(NEXT_OP_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for OpToken {
    fn default() -> Self {
        OpToken::new()
    }
}

/// The transport an algorithm posts messages through. A real
/// implementation wraps a network library; tests use
/// [`crate::testing::LoopbackTransport`].
pub trait Transport: Send + Sync {
    /// Post a non-blocking send. Returns `Ok(())` once queued;
    /// completion is observed later via [`Transport::progress`].
    fn isend(&self, buf: &[u8], peer: Rank, tag: Tag, op: OpToken) -> UcgResult<()>;

    /// Post a non-blocking receive into `buf`.
    fn irecv(&self, buf: &mut [u8], peer: Rank, tag: Tag, op: OpToken) -> UcgResult<()>;

    /// Drive the transport once, completing whatever sends/recvs `op`
    /// posted have finished. Returns the number of sends and receives
    /// completed for `op` since the last call made with it -- a shared
    /// transport must not credit one op's completions to another's.
    fn progress(&self, op: OpToken) -> UcgResult<(usize, usize)>;
}

/// Per-op in-flight counters and latched transport error
/// (`spec.md` §4.C: "Per op: inflight_send_cnt, inflight_recv_cnt,
/// latched error status").
pub struct OpState {
    token: OpToken,
    inflight_send: usize,
    inflight_recv: usize,
    status: Option<UcgError>,
}

impl Default for OpState {
    fn default() -> Self {
        OpState { token: OpToken::new(), inflight_send: 0, inflight_recv: 0, status: None }
    }
}

impl OpState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post_send(&mut self) {
        self.inflight_send += 1;
    }

    pub fn post_recv(&mut self) {
        self.inflight_recv += 1;
    }

    fn latch(&mut self, err: UcgError) {
        if self.status.is_none() {
            self.status = Some(err);
        }
    }

    /// `isend`: posts through `transport`, bumping the send counter on
    /// success. A transport error latches into this op's status and is
    /// returned, exactly as `spec.md` §4.C describes.
    pub fn isend(&mut self, transport: &dyn Transport, buf: &[u8], peer: Rank, tag: Tag) -> UcgResult<()> {
        match transport.isend(buf, peer, tag, self.token) {
            Ok(()) => {
                self.post_send();
                trace!(peer, tag = tag.raw(), "posted isend");
                Ok(())
            }
            Err(e) => {
                self.latch(e);
                Err(e)
            }
        }
    }

    /// `irecv`: posts through `transport`, bumping the recv counter on
    /// success.
    pub fn irecv(&mut self, transport: &dyn Transport, buf: &mut [u8], peer: Rank, tag: Tag) -> UcgResult<()> {
        match transport.irecv(buf, peer, tag, self.token) {
            Ok(()) => {
                self.post_recv();
                trace!(peer, tag = tag.raw(), "posted irecv");
                Ok(())
            }
            Err(e) => {
                self.latch(e);
                Err(e)
            }
        }
    }

    /// `testall`: drains completions from `transport` and reports
    /// whether this op's counters have reached zero.
    ///
    /// Returns `Status::Ok` once both counters are zero, `InProgress`
    /// while either is nonzero, or the latched error if the transport
    /// ever failed (`spec.md` §4.C).
    pub fn testall(&mut self, transport: &dyn Transport) -> Status {
        if let Some(e) = self.status {
            return Status::Err(e);
        }
        match transport.progress(self.token) {
            Ok((sent, received)) => {
                self.inflight_send = self.inflight_send.saturating_sub(sent);
                self.inflight_recv = self.inflight_recv.saturating_sub(received);
            }
            Err(e) => {
                self.latch(e);
                return Status::Err(e);
            }
        }
        if self.inflight_send == 0 && self.inflight_recv == 0 {
            Status::Ok
        } else {
            Status::InProgress
        }
    }

    #[must_use]
    pub fn inflight_send(&self) -> usize {
        self.inflight_send
    }

    #[must_use]
    pub fn inflight_recv(&self) -> usize {
        self.inflight_recv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tag_round_trips_fields() {
        let t = Tag::new(0x1234, 0xABCDEF, 0x00FF00);
        assert_eq!(t.op_seq(), 0x1234);
        assert_eq!(t.sender_rank(), 0xABCDEF);
        assert_eq!(t.group_id(), 0x00FF00);
    }

    #[test]
    fn tag_truncates_oversized_fields() {
        let t = Tag::new(u16::MAX, 0xFFFF_FFFF, 0xFFFF_FFFF);
        assert_eq!(t.sender_rank(), 0x00FF_FFFF);
        assert_eq!(t.group_id(), 0x00FF_FFFF);
    }

    proptest! {
        /// Any in-range `(op_seq, sender_rank, group_id)` triple round-trips
        /// through `Tag`'s bit packing exactly (`spec.md` §4.C's tag layout).
        #[test]
        fn tag_round_trips_for_any_in_range_fields(
            op_seq in 0u16..=u16::MAX,
            sender_rank in 0u32..(1 << SENDER_RANK_BITS),
            group_id in 0u32..(1 << GROUP_ID_BITS),
        ) {
            let t = Tag::new(op_seq, sender_rank, group_id);
            prop_assert_eq!(t.op_seq(), op_seq);
            prop_assert_eq!(t.sender_rank(), sender_rank);
            prop_assert_eq!(t.group_id(), group_id);
        }
    }
}
