//! Scatterv via direct root-to-peer sends (`spec.md` §4.I): the root
//! posts one send per non-root rank straight from its own sendbuf,
//! copying its own slice locally; everyone else posts a single recv.

use crate::datatype::{Datatype, RawBuf};
use crate::error::{Status, UcgError, UcgResult};
use crate::p2p::{OpState, Tag, Transport};
use crate::plan::{CollArgs, PlanOp, PrepareFn};
use crate::topology::Vgroup;
use std::sync::Arc;

pub struct ScattervOp {
    transport: Arc<dyn Transport>,
    vgroup: Vgroup,
    done: bool,
    state: OpState,
    request_id: u16,
}

impl ScattervOp {
    #[allow(clippy::too_many_arguments)]
    fn new(
        transport: Arc<dyn Transport>,
        vgroup: Vgroup,
        sendbuf: Option<RawBuf>,
        sendcounts: &[usize],
        senddispls: &[usize],
        mut recvbuf: RawBuf,
        recvcount: usize,
        dt: Datatype,
        root: i32,
    ) -> Self {
        let elem = dt.size();
        let myrank = vgroup.myrank;
        let is_root = myrank == root;
        let mut op = ScattervOp { transport, vgroup, done: false, state: OpState::new(), request_id: 0 };

        if is_root {
            let send = sendbuf.expect("scatterv root must supply a sendbuf");
            for local in 0..op.vgroup.size() {
                let want = local as i32;
                if want == myrank {
                    let off = senddispls[local] * elem;
                    let len = sendcounts[local] * elem;
                    let dst = unsafe { recvbuf.as_mut_slice() };
                    dst[..len.min(dst.len())].copy_from_slice(&send.as_slice()[off..off + len.min(dst.len())]);
                    continue;
                }
                let off = senddispls[local] * elem;
                let len = sendcounts[local] * elem;
                let peer = op.vgroup.group_rank(local);
                let tag = Tag::new(op.request_id, myrank as u32, op.vgroup.group_id);
                let _ = op.state.isend(op.transport.as_ref(), &send.as_slice()[off..off + len], peer, tag);
            }
        } else {
            let peer = op.vgroup.group_rank(root as usize);
            let tag = Tag::new(op.request_id, root as u32, op.vgroup.group_id);
            let len = recvcount * elem;
            let dst = unsafe { recvbuf.as_mut_slice() };
            let _ = op.state.irecv(op.transport.as_ref(), &mut dst[..len.min(dst.len())], peer, tag);
        }
        op
    }
}

impl PlanOp for ScattervOp {
    // All sends/recvs are posted eagerly at construction since root's
    // displacement table is only meaningful there; trigger and
    // progress both just drain `state` until terminal, including any
    // error latched by a failed post at construction time.
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

/// The built-in scatterv algorithm: direct root-to-peer sends.
pub struct ScattervLinear;

impl PrepareFn for ScattervLinear {
    fn prepare(&self, vgroup: &Vgroup, transport: &Arc<dyn Transport>, args: &CollArgs) -> UcgResult<Box<dyn PlanOp>> {
        match args {
            CollArgs::Scatterv { sendbuf, sendcounts, senddispls, recvbuf, recvcount, dt, root } => {
                Ok(Box::new(ScattervOp::new(
                    transport.clone(),
                    vgroup.clone(),
                    *sendbuf,
                    sendcounts,
                    senddispls,
                    *recvbuf,
                    *recvcount,
                    dt.clone(),
                    *root,
                )))
            }
            _ => Err(UcgError::InvalidParam),
        }
    }
}
