//! Alltoallv via one direct send and one direct recv per peer
//! (`spec.md` §4.I): no tree, every rank talks to every other rank
//! whose count is nonzero; the self-to-self slice is a local copy.

use crate::datatype::{Datatype, RawBuf};
use crate::error::{Status, UcgError, UcgResult};
use crate::p2p::{OpState, Tag, Transport};
use crate::plan::{CollArgs, PlanOp, PrepareFn};
use crate::topology::Vgroup;
use std::sync::Arc;

pub struct AlltoallvOp {
    transport: Arc<dyn Transport>,
    done: bool,
    state: OpState,
    request_id: u16,
}

impl AlltoallvOp {
    #[allow(clippy::too_many_arguments)]
    fn new(
        transport: Arc<dyn Transport>,
        vgroup: Vgroup,
        sendbuf: RawBuf,
        sendcounts: &[usize],
        senddispls: &[usize],
        mut recvbuf: RawBuf,
        recvcounts: &[usize],
        recvdispls: &[usize],
        dt: Datatype,
    ) -> Self {
        let elem = dt.size();
        let myrank = vgroup.myrank;
        let mut op = AlltoallvOp { transport, done: false, state: OpState::new(), request_id: 0 };

        for local in 0..vgroup.size() {
            if local as i32 == myrank {
                let send_off = senddispls[local] * elem;
                let send_len = sendcounts[local] * elem;
                let recv_off = recvdispls[local] * elem;
                let recv_len = recvcounts[local] * elem;
                let len = send_len.min(recv_len);
                let src = sendbuf.as_slice()[send_off..send_off + len].to_vec();
                let dst = unsafe { recvbuf.as_mut_slice() };
                dst[recv_off..recv_off + len].copy_from_slice(&src);
                continue;
            }
            let peer = vgroup.group_rank(local);
            if sendcounts[local] > 0 {
                let off = senddispls[local] * elem;
                let len = sendcounts[local] * elem;
                let tag = Tag::new(op.request_id, myrank as u32, vgroup.group_id);
                let _ = op.state.isend(op.transport.as_ref(), &sendbuf.as_slice()[off..off + len], peer, tag);
            }
            if recvcounts[local] > 0 {
                let off = recvdispls[local] * elem;
                let len = recvcounts[local] * elem;
                let tag = Tag::new(op.request_id, local as u32, vgroup.group_id);
                let dst = unsafe { recvbuf.as_mut_slice() };
                let _ = op.state.irecv(op.transport.as_ref(), &mut dst[off..off + len], peer, tag);
            }
        }
        op
    }
}

impl PlanOp for AlltoallvOp {
    fn trigger(&mut self) -> Status {
        self.progress()
    }

    fn progress(&mut self) -> Status {
        if self.done {
            return Status::Ok;
        }
        let s = self.state.testall(self.transport.as_ref());
        if s != Status::InProgress {
            self.done = true;
        }
        s
    }

    fn discard(&mut self) {
        self.done = true;
    }

    fn set_request_id(&mut self, id: u16) {
        self.request_id = id;
    }
}

/// The built-in alltoallv algorithm: direct per-peer sends and recvs.
pub struct AlltoallvLinear;

impl PrepareFn for AlltoallvLinear {
    fn prepare(&self, vgroup: &Vgroup, transport: &Arc<dyn Transport>, args: &CollArgs) -> UcgResult<Box<dyn PlanOp>> {
        match args {
            CollArgs::Alltoallv { sendbuf, sendcounts, senddispls, recvbuf, recvcounts, recvdispls, dt } => {
                Ok(Box::new(AlltoallvOp::new(
                    transport.clone(),
                    vgroup.clone(),
                    *sendbuf,
                    sendcounts,
                    senddispls,
                    *recvbuf,
                    recvcounts,
                    recvdispls,
                    dt.clone(),
                )))
            }
            _ => Err(UcgError::InvalidParam),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{dt_predefined, PredefinedKind};
    use crate::topology::RankMap;

    struct NoopTransport;
    impl Transport for NoopTransport {
        fn isend(&self, _: &[u8], _: i32, _: Tag, _: crate::p2p::OpToken) -> UcgResult<()> {
            Ok(())
        }
        fn irecv(&self, _: &mut [u8], _: i32, _: Tag, _: crate::p2p::OpToken) -> UcgResult<()> {
            Ok(())
        }
        fn progress(&self, _: crate::p2p::OpToken) -> UcgResult<(usize, usize)> {
            Ok((4, 4))
        }
    }

    #[test]
    fn self_slice_is_a_local_copy() {
        let vgroup = Vgroup { myrank: 0, rank_map: RankMap::full(2), group_id: 0 };
        let mut send = [5i32, 6].map(i32::to_ne_bytes).concat();
        let mut recv = [0u8; 8];
        let op = AlltoallvOp::new(
            Arc::new(NoopTransport),
            vgroup,
            RawBuf::from_mut_slice(&mut send),
            &[1, 1],
            &[0, 1],
            RawBuf::from_mut_slice(&mut recv),
            &[1, 1],
            &[0, 1],
            dt_predefined(PredefinedKind::I32),
        );
        assert_eq!(i32::from_ne_bytes(recv[0..4].try_into().unwrap()), 5);
        drop(op);
    }

    #[test]
    fn drains_to_ok() {
        let vgroup = Vgroup { myrank: 1, rank_map: RankMap::full(3), group_id: 0 };
        let mut send = [1i32, 2, 3].map(i32::to_ne_bytes).concat();
        let mut recv = [0u8; 12];
        let mut op = AlltoallvOp::new(
            Arc::new(NoopTransport),
            vgroup,
            RawBuf::from_mut_slice(&mut send),
            &[1, 1, 1],
            &[0, 1, 2],
            RawBuf::from_mut_slice(&mut recv),
            &[1, 1, 1],
            &[0, 1, 2],
            dt_predefined(PredefinedKind::I32),
        );
        let mut s = op.trigger();
        while s == Status::InProgress {
            s = op.progress();
        }
        assert_eq!(s, Status::Ok);
    }
}
