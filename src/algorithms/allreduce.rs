//! Allreduce as a meta-op: reduce every contribution to rank 0 of the
//! vgroup, then broadcast the result back out (`spec.md` §4.F meta-op
//! composition, §4.I "Allreduce (composed of reduce + bcast)"). The
//! sequencing is exactly [`MetaOp`]'s contract: the bcast child's
//! `trigger` never runs until the reduce child has latched `Ok`, so it
//! always reads the fully-reduced buffer.

use super::bcast::BcastOp;
use super::reduce::ReduceTreeOp;
use crate::error::{UcgError, UcgResult};
use crate::plan::{CollArgs, PlanOp, PrepareFn};
use crate::request::MetaOp;
use crate::topology::Vgroup;
use std::sync::Arc;

/// The flat allreduce: reduce-to-root-0 followed by bcast-from-root-0
/// over the vgroup directly.
pub struct AllreduceFlatTree;

impl PrepareFn for AllreduceFlatTree {
    fn prepare(&self, vgroup: &Vgroup, transport: &Arc<dyn crate::p2p::Transport>, args: &CollArgs) -> UcgResult<Box<dyn PlanOp>> {
        let CollArgs::Allreduce { sendbuf, recvbuf, count, dt, op } = args else {
            return Err(UcgError::InvalidParam);
        };

        let reduce_op = ReduceTreeOp::new(
            transport.clone(),
            vgroup.clone(),
            *sendbuf,
            Some(*recvbuf),
            *count,
            dt.clone(),
            op.clone(),
            0,
        );
        let bcast_op = BcastOp::new(transport.clone(), vgroup.clone(), *recvbuf, 0);
        let meta = MetaOp::new(vec![Box::new(reduce_op), Box::new(bcast_op)])?;
        Ok(Box::new(meta))
    }
}
