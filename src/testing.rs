//! Test support (ambient component, paralleling the teacher's own
//! `testing.rs`): an in-process [`Transport`] that actually delivers
//! messages between simulated ranks, plus small helpers for building
//! fixed process-info tables without a real OOB layer.

use crate::context::OobAllgather;
use crate::error::{UcgError, UcgResult};
use crate::p2p::{OpToken, Tag, Transport};
use crate::topology::{ProcessInfo, Rank};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// A pending `irecv` target: a raw pointer into the caller's buffer,
/// matched against an arriving message by tag equality. Safe under the
/// same contract `datatype::RawBuf` relies on elsewhere in this crate:
/// the destination buffer outlives the op that posted the recv.
/// Tagged with the posting op's token so one op's `progress` call
/// cannot steal another op's recv off a shared transport.
struct PendingRecv {
    tag: Tag,
    ptr: *mut u8,
    len: usize,
    op: OpToken,
}

unsafe impl Send for PendingRecv {}

/// The shared message bus backing every [`LoopbackTransport`] built
/// from the same [`LoopbackBus::new`] call: one inbox per rank.
pub struct LoopbackBus {
    inboxes: Vec<Mutex<VecDeque<(Tag, Vec<u8>)>>>,
}

impl LoopbackBus {
    #[must_use]
    pub fn new(n_ranks: usize) -> Arc<Self> {
        Arc::new(LoopbackBus { inboxes: (0..n_ranks).map(|_| Mutex::new(VecDeque::new())).collect() })
    }

    /// Build one [`LoopbackTransport`] per rank sharing this bus.
    #[must_use]
    pub fn transports(self: &Arc<Self>) -> Vec<Arc<LoopbackTransport>> {
        (0..self.inboxes.len()).map(|r| Arc::new(LoopbackTransport::new(self.clone(), r))).collect()
    }
}

/// One rank's endpoint into a [`LoopbackBus`]: delivers messages
/// in-process so algorithm code can be exercised end to end without a
/// real network.
pub struct LoopbackTransport {
    bus: Arc<LoopbackBus>,
    my_rank: usize,
    pending: Mutex<Vec<PendingRecv>>,
    /// Sends posted since the owning op's last `progress`, keyed by
    /// that op's token -- two ops sharing this transport must not see
    /// each other's send counts.
    sent_since_progress: Mutex<HashMap<OpToken, usize>>,
}

impl LoopbackTransport {
    #[must_use]
    pub fn new(bus: Arc<LoopbackBus>, my_rank: usize) -> Self {
        LoopbackTransport { bus, my_rank, pending: Mutex::new(Vec::new()), sent_since_progress: Mutex::new(HashMap::new()) }
    }
}

impl Transport for LoopbackTransport {
    fn isend(&self, buf: &[u8], peer: Rank, tag: Tag, op: OpToken) -> UcgResult<()> {
        let inbox = self.bus.inboxes.get(peer as usize).ok_or(UcgError::InvalidParam)?;
        inbox.lock().unwrap().push_back((tag, buf.to_vec()));
        *self.sent_since_progress.lock().unwrap().entry(op).or_insert(0) += 1;
        Ok(())
    }

    fn irecv(&self, buf: &mut [u8], _peer: Rank, tag: Tag, op: OpToken) -> UcgResult<()> {
        self.pending.lock().unwrap().push(PendingRecv { tag, ptr: buf.as_mut_ptr(), len: buf.len(), op });
        Ok(())
    }

    /// Only drains `op`'s own sends and pending recvs. Other ops'
    /// pending recvs are left in place (`retain`'s `true` branch below)
    /// so a shared transport can't let one op observe -- and remove --
    /// another's completions.
    fn progress(&self, op: OpToken) -> UcgResult<(usize, usize)> {
        let sent = self.sent_since_progress.lock().unwrap().remove(&op).unwrap_or(0);
        let mut received = 0;
        let mut pending = self.pending.lock().unwrap();
        let mut inbox = self.bus.inboxes[self.my_rank].lock().unwrap();

        pending.retain(|p| {
            if p.op != op {
                return true;
            }
            let Some(pos) = inbox.iter().position(|(t, _)| *t == p.tag) else {
                return true;
            };
            let (_, msg) = inbox.remove(pos).expect("position just found");
            let n = msg.len().min(p.len);
            unsafe { std::ptr::copy_nonoverlapping(msg.as_ptr(), p.ptr, n) };
            received += 1;
            false
        });
        Ok((sent, received))
    }
}

/// An [`OobAllgather`] that ignores the caller's own entry and always
/// returns a fixed table -- enough for single-thread tests that
/// already know every rank's process info up front.
#[must_use]
pub fn fixed_oob(infos: Vec<ProcessInfo>) -> OobAllgather {
    Box::new(move |_own| Ok(infos.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_ranks_exchange_a_message() {
        let bus = LoopbackBus::new(2);
        let transports = bus.transports();
        let op = OpToken::new();

        let send = 42i32.to_ne_bytes();
        transports[0].isend(&send, 1, Tag::new(1, 0, 0), op).unwrap();

        let mut recv = [0u8; 4];
        transports[1].irecv(&mut recv, 0, Tag::new(1, 0, 0), op).unwrap();

        let (sent, received) = transports[1].progress(op).unwrap();
        assert_eq!(sent, 0);
        assert_eq!(received, 1);
        assert_eq!(i32::from_ne_bytes(recv), 42);
    }

    #[test]
    fn progress_before_matching_send_reports_no_completion() {
        let bus = LoopbackBus::new(2);
        let transports = bus.transports();
        let op = OpToken::new();
        let mut recv = [0u8; 4];
        transports[1].irecv(&mut recv, 0, Tag::new(1, 0, 0), op).unwrap();
        let (_, received) = transports[1].progress(op).unwrap();
        assert_eq!(received, 0);
    }

    /// The regression this token scoping exists for: two ops sharing
    /// one rank's transport (mirroring two `Group`s that reuse the
    /// same physical connection) must not have their completions
    /// cross-credited. Without per-op scoping, op B's `progress` call
    /// would drain and match op A's pending recv too, crediting it to
    /// B and leaving A's counter stuck nonzero forever.
    #[test]
    fn progress_does_not_cross_credit_a_different_op_on_the_same_transport() {
        let bus = LoopbackBus::new(2);
        let transports = bus.transports();
        let op_a = OpToken::new();
        let op_b = OpToken::new();

        transports[0].isend(&[1, 2, 3, 4], 1, Tag::new(1, 0, 10), op_a).unwrap();
        transports[0].isend(&[5, 6, 7, 8], 1, Tag::new(1, 0, 20), op_b).unwrap();

        let mut recv_a = [0u8; 4];
        let mut recv_b = [0u8; 4];
        transports[1].irecv(&mut recv_a, 0, Tag::new(1, 0, 10), op_a).unwrap();
        transports[1].irecv(&mut recv_b, 0, Tag::new(1, 0, 20), op_b).unwrap();

        let (_, received_b) = transports[1].progress(op_b).unwrap();
        assert_eq!(received_b, 1);
        assert_eq!(recv_b, [5, 6, 7, 8]);

        let (_, received_a) = transports[1].progress(op_a).unwrap();
        assert_eq!(received_a, 1, "op a's recv must still be matchable after op b's progress call");
        assert_eq!(recv_a, [1, 2, 3, 4]);
    }
}
