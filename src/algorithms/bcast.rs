//! Broadcast via a binomial tree rooted at the caller's `root`
//! (`spec.md` §4.I). Interior nodes wait on their parent, then forward
//! to every child named by [`BinomialTreeIter::next_bcast_child`].

use super::iter::BinomialTreeIter;
use crate::datatype::RawBuf;
use crate::error::{Status, UcgError, UcgResult};
use crate::p2p::{OpState, Tag, Transport};
use crate::plan::{CollArgs, PlanOp, PrepareFn};
use crate::topology::Vgroup;
use std::sync::Arc;

pub struct BcastOp {
    transport: Arc<dyn Transport>,
    vgroup: Vgroup,
    buf: RawBuf,
    tree: BinomialTreeIter,
    is_root: bool,
    parent_local: Option<i32>,
    state: OpState,
    request_id: u16,
    forwarded: bool,
}

impl BcastOp {
    pub(crate) fn new(transport: Arc<dyn Transport>, vgroup: Vgroup, buf: RawBuf, root: i32) -> Self {
        let tree = BinomialTreeIter::new(vgroup.myrank, root, vgroup.size());
        let parent_local = tree.parent();
        let is_root = vgroup.myrank == root;
        BcastOp { transport, vgroup, buf, tree, is_root, parent_local, state: OpState::new(), request_id: 0, forwarded: false }
    }

    fn post_children(&mut self) -> Status {
        let mut any = false;
        while let Some(child) = self.tree.next_bcast_child() {
            any = true;
            let peer = self.vgroup.group_rank(child as usize);
            let tag = Tag::new(self.request_id, self.vgroup.myrank as u32, self.vgroup.group_id);
            if let Err(e) = self.state.isend(self.transport.as_ref(), self.buf.as_slice(), peer, tag) {
                return Status::Err(e);
            }
        }
        self.forwarded = true;
        if any {
            Status::InProgress
        } else {
            Status::Ok
        }
    }
}

impl PlanOp for BcastOp {
    fn trigger(&mut self) -> Status {
        if self.is_root {
            self.post_children()
        } else {
            let parent = self.parent_local.expect("non-root bcast participant has a parent");
            let peer = self.vgroup.group_rank(parent as usize);
            let tag = Tag::new(self.request_id, parent as u32, self.vgroup.group_id);
            // SAFETY: `buf` is the caller's bcast buffer, exclusively
            // owned by this op for the duration of the collective.
            let slice = unsafe { self.buf.as_mut_slice() };
            match self.state.irecv(self.transport.as_ref(), slice, peer, tag) {
                Ok(()) => Status::InProgress,
                Err(e) => Status::Err(e),
            }
        }
    }

    fn progress(&mut self) -> Status {
        if self.forwarded {
            return self.state.testall(self.transport.as_ref());
        }
        match self.state.testall(self.transport.as_ref()) {
            Status::Ok => self.post_children(),
            other => other,
        }
    }

    fn discard(&mut self) {
        self.forwarded = true;
    }

    fn set_request_id(&mut self, id: u16) {
        self.request_id = id;
    }
}

/// The built-in bcast algorithm: a binomial tree, applicable at any
/// message size.
pub struct BcastBinomialTree;

impl PrepareFn for BcastBinomialTree {
    fn prepare(&self, vgroup: &Vgroup, transport: &Arc<dyn Transport>, args: &CollArgs) -> UcgResult<Box<dyn PlanOp>> {
        match args {
            CollArgs::Bcast { buf, root, .. } => Ok(Box::new(BcastOp::new(transport.clone(), vgroup.clone(), *buf, *root))),
            _ => Err(UcgError::InvalidParam),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn root_with_no_peers_completes_immediately() {
        let vgroup = Vgroup { myrank: 0, rank_map: RankMap::full(1), group_id: 0 };
        let mut data = [1u8, 2, 3, 4];
        let buf = RawBuf::from_mut_slice(&mut data);
        let mut op = BcastOp::new(Arc::new(NoopTransport), vgroup, buf, 0);
        assert_eq!(op.trigger(), Status::Ok);
    }

    #[test]
    fn non_root_drains_to_ok() {
        let vgroup = Vgroup { myrank: 3, rank_map: RankMap::full(8), group_id: 0 };
        let mut data = [0u8; 4];
        let buf = RawBuf::from_mut_slice(&mut data);
        let mut op = BcastOp::new(Arc::new(NoopTransport), vgroup, buf, 0);
        let mut s = op.trigger();
        while s == Status::InProgress {
            s = op.progress();
        }
        assert_eq!(s, Status::Ok);
    }
}
