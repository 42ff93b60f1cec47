//! Allgatherv via a ring (`spec.md` §4.I): `size - 1` steps, each
//! forwarding the chunk received last step to the next rank while
//! receiving the chunk one hop further behind. Variable counts are
//! handled by always addressing chunks through the full
//! `recvcounts`/`recvdispls` tables rather than a fixed stride.

use super::iter::RingIter;
use crate::datatype::{Datatype, RawBuf};
use crate::error::{Status, UcgError, UcgResult};
use crate::p2p::{OpState, Tag, Transport};
use crate::plan::{CollArgs, PlanOp, PrepareFn};
use crate::topology::Vgroup;
use std::sync::Arc;

pub struct AllgathervOp {
    transport: Arc<dyn Transport>,
    vgroup: Vgroup,
    recvbuf: RawBuf,
    recvcounts: Vec<usize>,
    recvdispls: Vec<usize>,
    elem: usize,
    ring: RingIter,
    owner_at_step: i32,
    state: OpState,
    request_id: u16,
    done: bool,
}

impl AllgathervOp {
    #[allow(clippy::too_many_arguments)]
    fn new(
        transport: Arc<dyn Transport>,
        vgroup: Vgroup,
        sendbuf: RawBuf,
        sendcount: usize,
        mut recvbuf: RawBuf,
        recvcounts: Vec<usize>,
        recvdispls: Vec<usize>,
        dt: Datatype,
    ) -> Self {
        let elem = dt.size();
        let myrank = vgroup.myrank;
        let own_off = recvdispls[myrank as usize] * elem;
        let own_len = sendcount * elem;
        // Seed our own slot with our contribution before the ring starts.
        let src = sendbuf.as_slice()[..own_len].to_vec();
        let dst = unsafe { recvbuf.as_mut_slice() };
        dst[own_off..own_off + own_len].copy_from_slice(&src);

        let ring = RingIter::new(myrank, vgroup.size());
        AllgathervOp {
            transport,
            vgroup,
            recvbuf,
            recvcounts,
            recvdispls,
            elem,
            ring,
            owner_at_step: myrank,
            state: OpState::new(),
            request_id: 0,
            done: false,
        }
    }

    fn post_next_step(&mut self) -> Status {
        match self.ring.next_step() {
            None => {
                self.done = true;
                Status::Ok
            }
            Some((send_to, recv_from)) => {
                let size = self.vgroup.size() as i32;
                let send_owner = self.owner_at_step;
                let recv_owner = (send_owner - 1).rem_euclid(size);
                self.owner_at_step = recv_owner;

                let send_off = self.recvdispls[send_owner as usize] * self.elem;
                let send_len = self.recvcounts[send_owner as usize] * self.elem;
                let recv_off = self.recvdispls[recv_owner as usize] * self.elem;
                let recv_len = self.recvcounts[recv_owner as usize] * self.elem;

                let send_peer = self.vgroup.group_rank(send_to as usize);
                let recv_peer = self.vgroup.group_rank(recv_from as usize);
                let send_tag = Tag::new(self.request_id, self.vgroup.myrank as u32, self.vgroup.group_id);
                let recv_tag = Tag::new(self.request_id, recv_from as u32, self.vgroup.group_id);

                // SAFETY: `send_off..+send_len` and `recv_off..+recv_len`
                // never overlap -- they address distinct ranks' slots.
                let send_ptr = self.recvbuf.as_slice().as_ptr();
                let send_slice = unsafe { std::slice::from_raw_parts(send_ptr.add(send_off), send_len) };
                if let Err(e) = self.state.isend(self.transport.as_ref(), send_slice, send_peer, send_tag) {
                    return Status::Err(e);
                }
                let recv_ptr = unsafe { self.recvbuf.as_mut_slice().as_mut_ptr() };
                let recv_slice = unsafe { std::slice::from_raw_parts_mut(recv_ptr.add(recv_off), recv_len) };
                if let Err(e) = self.state.irecv(self.transport.as_ref(), recv_slice, recv_peer, recv_tag) {
                    return Status::Err(e);
                }
                Status::InProgress
            }
        }
    }
}

impl PlanOp for AllgathervOp {
    fn trigger(&mut self) -> Status {
        self.post_next_step()
    }

    fn progress(&mut self) -> Status {
        if self.done {
            return Status::Ok;
        }
        match self.state.testall(self.transport.as_ref()) {
            Status::Ok => self.post_next_step(),
            other => other,
        }
    }

    fn discard(&mut self) {
        self.done = true;
    }

    fn set_request_id(&mut self, id: u16) {
        self.request_id = id;
    }
}

/// The built-in allgatherv algorithm: ring exchange.
pub struct AllgathervRing;

impl PrepareFn for AllgathervRing {
    fn prepare(&self, vgroup: &Vgroup, transport: &Arc<dyn Transport>, args: &CollArgs) -> UcgResult<Box<dyn PlanOp>> {
        match args {
            CollArgs::Allgatherv { sendbuf, sendcount, recvbuf, recvcounts, recvdispls, dt } => Ok(Box::new(AllgathervOp::new(
                transport.clone(),
                vgroup.clone(),
                *sendbuf,
                *sendcount,
                *recvbuf,
                recvcounts.clone(),
                recvdispls.clone(),
                dt.clone(),
            ))),
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
    fn singleton_group_completes_immediately() {
        let vgroup = Vgroup { myrank: 0, rank_map: RankMap::full(1), group_id: 0 };
        let mut send = 4i32.to_ne_bytes();
        let mut recv = [0u8; 4];
        let mut op = AllgathervOp::new(
            Arc::new(NoopTransport),
            vgroup,
            RawBuf::from_mut_slice(&mut send),
            1,
            RawBuf::from_mut_slice(&mut recv),
            vec![1],
            vec![0],
            dt_predefined(PredefinedKind::I32),
        );
        assert_eq!(op.trigger(), Status::Ok);
        assert_eq!(i32::from_ne_bytes(recv), 4);
    }

    #[test]
    fn four_ranks_drains_to_ok() {
        let vgroup = Vgroup { myrank: 2, rank_map: RankMap::full(4), group_id: 0 };
        let mut send = 42i32.to_ne_bytes();
        let mut recv = [0u8; 16];
        let mut op = AllgathervOp::new(
            Arc::new(NoopTransport),
            vgroup,
            RawBuf::from_mut_slice(&mut send),
            1,
            RawBuf::from_mut_slice(&mut recv),
            vec![1, 1, 1, 1],
            vec![0, 1, 2, 3],
            dt_predefined(PredefinedKind::I32),
        );
        let mut s = op.trigger();
        while s == Status::InProgress {
            s = op.progress();
        }
        assert_eq!(s, Status::Ok);
        assert_eq!(i32::from_ne_bytes(recv[8..12].try_into().unwrap()), 42);
    }
}
