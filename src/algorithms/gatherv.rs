//! Gatherv via direct peer-to-root sends (`spec.md` §4.I): the mirror
//! image of [`super::scatterv`]. Every non-root sends its whole
//! sendbuf to root; root copies its own contribution locally and
//! posts one recv per remaining peer straight into `recvbuf` at the
//! peer's displacement.

use crate::datatype::{Datatype, RawBuf};
use crate::error::{Status, UcgError, UcgResult};
use crate::p2p::{OpState, Tag, Transport};
use crate::plan::{CollArgs, PlanOp, PrepareFn};
use crate::topology::Vgroup;
use std::sync::Arc;

pub struct GathervOp {
    transport: Arc<dyn Transport>,
    done: bool,
    state: OpState,
    request_id: u16,
}

impl GathervOp {
    #[allow(clippy::too_many_arguments)]
    fn new(
        transport: Arc<dyn Transport>,
        vgroup: Vgroup,
        sendbuf: RawBuf,
        sendcount: usize,
        mut recvbuf: Option<RawBuf>,
        recvcounts: &[usize],
        recvdispls: &[usize],
        dt: Datatype,
        root: i32,
    ) -> Self {
        let elem = dt.size();
        let myrank = vgroup.myrank;
        let is_root = myrank == root;
        let mut op = GathervOp { transport, done: false, state: OpState::new(), request_id: 0 };

        if is_root {
            let out = recvbuf.as_mut().expect("gatherv root must supply a recvbuf");
            for local in 0..vgroup.size() {
                let off = recvdispls[local] * elem;
                let len = recvcounts[local] * elem;
                if local as i32 == myrank {
                    let src = sendbuf.as_slice();
                    let dst = unsafe { out.as_mut_slice() };
                    dst[off..off + len.min(src.len())].copy_from_slice(&src[..len.min(src.len())]);
                    continue;
                }
                let peer = vgroup.group_rank(local);
                let tag = Tag::new(op.request_id, local as u32, vgroup.group_id);
                let dst = unsafe { out.as_mut_slice() };
                let _ = op.state.irecv(op.transport.as_ref(), &mut dst[off..off + len], peer, tag);
            }
        } else {
            let peer = vgroup.group_rank(root as usize);
            let tag = Tag::new(op.request_id, myrank as u32, vgroup.group_id);
            let len = sendcount * elem;
            let _ = op.state.isend(op.transport.as_ref(), &sendbuf.as_slice()[..len], peer, tag);
        }
        op
    }
}

impl PlanOp for GathervOp {
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

/// The built-in gatherv algorithm: direct peer-to-root sends.
pub struct GathervLinear;

impl PrepareFn for GathervLinear {
    fn prepare(&self, vgroup: &Vgroup, transport: &Arc<dyn Transport>, args: &CollArgs) -> UcgResult<Box<dyn PlanOp>> {
        match args {
            CollArgs::Gatherv { sendbuf, sendcount, recvbuf, recvcounts, recvdispls, dt, root } => Ok(Box::new(GathervOp::new(
                transport.clone(),
                vgroup.clone(),
                *sendbuf,
                *sendcount,
                *recvbuf,
                recvcounts,
                recvdispls,
                dt.clone(),
                *root,
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
    fn root_copies_own_contribution_locally() {
        let vgroup = Vgroup { myrank: 0, rank_map: RankMap::full(2), group_id: 0 };
        let mut send = 7i32.to_ne_bytes();
        let mut recv = [0u8; 8];
        let op = GathervOp::new(
            Arc::new(NoopTransport),
            vgroup,
            RawBuf::from_mut_slice(&mut send),
            1,
            Some(RawBuf::from_mut_slice(&mut recv)),
            &[1, 1],
            &[0, 1],
            dt_predefined(PredefinedKind::I32),
            0,
        );
        assert_eq!(i32::from_ne_bytes(recv[0..4].try_into().unwrap()), 7);
        drop(op);
    }

    #[test]
    fn non_root_drains_to_ok() {
        let vgroup = Vgroup { myrank: 1, rank_map: RankMap::full(2), group_id: 0 };
        let mut send = 3i32.to_ne_bytes();
        let mut op = GathervOp::new(
            Arc::new(NoopTransport),
            vgroup,
            RawBuf::from_mut_slice(&mut send),
            1,
            None,
            &[1, 1],
            &[0, 1],
            dt_predefined(PredefinedKind::I32),
            0,
        );
        let mut s = op.trigger();
        while s == Status::InProgress {
            s = op.progress();
        }
        assert_eq!(s, Status::Ok);
    }
}
