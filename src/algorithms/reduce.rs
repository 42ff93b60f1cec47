//! Reduce to a single root via a binomial tree (`spec.md` §4.I): the
//! mirror image of [`super::bcast`]'s tree, data flowing leaves-to-root
//! instead of root-to-leaves. Internal building block for
//! [`super::allreduce`] as well as a plan in its own right.

use super::iter::BinomialTreeIter;
use crate::datatype::{op_reduce, Datatype, RawBuf, ReduceOp};
use crate::error::{Status, UcgError, UcgResult};
use crate::p2p::{OpState, Tag, Transport};
use crate::plan::{CollArgs, PlanOp, PrepareFn};
use crate::topology::Vgroup;
use std::sync::Arc;

enum Phase {
    Collecting,
    Sending,
    Done,
}

pub struct ReduceTreeOp {
    transport: Arc<dyn Transport>,
    vgroup: Vgroup,
    children: Vec<i32>,
    parent: Option<i32>,
    count: usize,
    dt: Datatype,
    op: ReduceOp,
    accum: Vec<u8>,
    scratch: Vec<Vec<u8>>,
    out: Option<RawBuf>,
    is_root: bool,
    state: OpState,
    request_id: u16,
    phase: Phase,
}

impl ReduceTreeOp {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        vgroup: Vgroup,
        sendbuf: Option<RawBuf>,
        recvbuf: Option<RawBuf>,
        count: usize,
        dt: Datatype,
        op: ReduceOp,
        root: i32,
    ) -> Self {
        let size = vgroup.size();
        let mut tree = BinomialTreeIter::new(vgroup.myrank, root, size);
        let parent = tree.parent();
        let mut children = Vec::new();
        while let Some(c) = tree.next_bcast_child() {
            children.push(c);
        }
        let elem_bytes = count * dt.size();
        let accum = match sendbuf {
            Some(b) => b.as_slice()[..elem_bytes].to_vec(),
            None => vec![0u8; elem_bytes],
        };
        let scratch = children.iter().map(|_| vec![0u8; elem_bytes]).collect();
        let is_root = vgroup.myrank == root;
        ReduceTreeOp {
            transport,
            vgroup,
            children,
            parent,
            count,
            dt,
            op,
            accum,
            scratch,
            out: recvbuf,
            is_root,
            state: OpState::new(),
            request_id: 0,
            phase: Phase::Collecting,
        }
    }

    fn post_collect(&mut self) -> Status {
        for (i, &child) in self.children.clone().iter().enumerate() {
            let peer = self.vgroup.group_rank(child as usize);
            let tag = Tag::new(self.request_id, child as u32, self.vgroup.group_id);
            if let Err(e) = self.state.irecv(self.transport.as_ref(), &mut self.scratch[i], peer, tag) {
                return Status::Err(e);
            }
        }
        self.phase = Phase::Collecting;
        if self.children.is_empty() {
            self.after_collect()
        } else {
            Status::InProgress
        }
    }

    fn after_collect(&mut self) -> Status {
        for i in 0..self.children.len() {
            if let Err(e) = op_reduce(&self.op, &self.scratch[i], &mut self.accum, self.count, &self.dt) {
                return Status::Err(e);
            }
        }
        if self.is_root {
            if let Some(mut out) = self.out {
                // SAFETY: `out` is the root's own recvbuf, exclusively
                // owned by this op.
                unsafe { out.as_mut_slice() }.copy_from_slice(&self.accum);
            }
            self.phase = Phase::Done;
            Status::Ok
        } else {
            let parent = self.parent.expect("non-root reduce participant has a parent");
            let peer = self.vgroup.group_rank(parent as usize);
            let tag = Tag::new(self.request_id, self.vgroup.myrank as u32, self.vgroup.group_id);
            self.phase = Phase::Sending;
            match self.state.isend(self.transport.as_ref(), &self.accum, peer, tag) {
                Ok(()) => Status::InProgress,
                Err(e) => Status::Err(e),
            }
        }
    }
}

impl PlanOp for ReduceTreeOp {
    fn trigger(&mut self) -> Status {
        self.post_collect()
    }

    fn progress(&mut self) -> Status {
        match self.phase {
            Phase::Collecting => match self.state.testall(self.transport.as_ref()) {
                Status::Ok => self.after_collect(),
                other => other,
            },
            Phase::Sending => self.state.testall(self.transport.as_ref()),
            Phase::Done => Status::Ok,
        }
    }

    fn discard(&mut self) {
        self.phase = Phase::Done;
    }

    fn set_request_id(&mut self, id: u16) {
        self.request_id = id;
    }
}

/// The built-in reduce algorithm: binomial tree to a single root.
pub struct ReduceBinomialTree;

impl PrepareFn for ReduceBinomialTree {
    fn prepare(&self, vgroup: &Vgroup, transport: &Arc<dyn Transport>, args: &CollArgs) -> UcgResult<Box<dyn PlanOp>> {
        match args {
            CollArgs::Reduce { sendbuf, recvbuf, count, dt, op, root } => Ok(Box::new(ReduceTreeOp::new(
                transport.clone(),
                vgroup.clone(),
                *sendbuf,
                *recvbuf,
                *count,
                dt.clone(),
                op.clone(),
                *root,
            ))),
            _ => Err(UcgError::InvalidParam),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{dt_predefined, PredefinedKind, PredefinedReduceOp};
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
            Ok((8, 8))
        }
    }

    #[test]
    fn root_with_no_children_writes_own_value() {
        let vgroup = Vgroup { myrank: 0, rank_map: RankMap::full(1), group_id: 0 };
        let mut send = 9i32.to_ne_bytes();
        let mut recv = [0u8; 4];
        let op = ReduceOp::Predefined(PredefinedReduceOp::Sum);
        let mut reduce_op = ReduceTreeOp::new(
            Arc::new(NoopTransport),
            vgroup,
            Some(RawBuf::from_mut_slice(&mut send)),
            Some(RawBuf::from_mut_slice(&mut recv)),
            1,
            dt_predefined(PredefinedKind::I32),
            op,
            0,
        );
        assert_eq!(reduce_op.trigger(), Status::Ok);
        assert_eq!(i32::from_ne_bytes(recv), 9);
    }

    #[test]
    fn non_root_drains_to_ok() {
        let vgroup = Vgroup { myrank: 5, rank_map: RankMap::full(8), group_id: 0 };
        let mut send = 1i32.to_ne_bytes();
        let op = ReduceOp::Predefined(PredefinedReduceOp::Sum);
        let mut reduce_op = ReduceTreeOp::new(
            Arc::new(NoopTransport),
            vgroup,
            Some(RawBuf::from_mut_slice(&mut send)),
            None,
            1,
            dt_predefined(PredefinedKind::I32),
            op,
            0,
        );
        let mut s = reduce_op.trigger();
        while s == Status::InProgress {
            s = reduce_op.progress();
        }
        assert_eq!(s, Status::Ok);
    }
}
