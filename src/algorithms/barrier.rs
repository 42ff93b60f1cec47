//! Barrier via recursive-doubling dissemination (`spec.md` §4.I).
//!
//! Each rank exchanges a zero-byte message with a partner computed by
//! [`RecursiveDoublingIter`]; once every step's send and recv have both
//! completed the call has synchronised with the whole group.

use super::iter::RecursiveDoublingIter;
use crate::error::{Status, UcgError, UcgResult};
use crate::p2p::{OpState, Tag, Transport};
use crate::plan::{CollArgs, PlanOp, PrepareFn};
use crate::topology::Vgroup;
use std::sync::Arc;

pub struct BarrierOp {
    transport: Arc<dyn Transport>,
    group_id: u32,
    local_rank: i32,
    doubling: RecursiveDoublingIter,
    current: Option<i32>,
    state: OpState,
    request_id: u16,
}

impl BarrierOp {
    fn new(transport: Arc<dyn Transport>, vgroup: &Vgroup) -> Self {
        BarrierOp {
            transport,
            group_id: vgroup.group_id,
            local_rank: vgroup.myrank,
            doubling: RecursiveDoublingIter::new(vgroup.myrank, vgroup.size()),
            current: None,
            state: OpState::new(),
            request_id: 0,
        }
    }

    fn post_next(&mut self) -> Status {
        match self.doubling.next_partner() {
            None => {
                self.current = None;
                Status::Ok
            }
            Some(partner) => {
                self.current = Some(partner);
                let tag_out = Tag::new(self.request_id, self.local_rank as u32, self.group_id);
                let tag_in = Tag::new(self.request_id, partner as u32, self.group_id);
                if let Err(e) = self.state.isend(self.transport.as_ref(), &[], partner, tag_out) {
                    return Status::Err(e);
                }
                if let Err(e) = self.state.irecv(self.transport.as_ref(), &mut [], partner, tag_in) {
                    return Status::Err(e);
                }
                Status::InProgress
            }
        }
    }
}

impl PlanOp for BarrierOp {
    fn trigger(&mut self) -> Status {
        self.post_next()
    }

    fn progress(&mut self) -> Status {
        if self.current.is_none() {
            return Status::Ok;
        }
        match self.state.testall(self.transport.as_ref()) {
            Status::Ok => self.post_next(),
            other => other,
        }
    }

    fn discard(&mut self) {
        self.current = None;
    }

    fn set_request_id(&mut self, id: u16) {
        self.request_id = id;
    }
}

/// The built-in barrier algorithm, unconditionally applicable to any
/// message size (barrier carries no payload).
pub struct BarrierDissemination;

impl PrepareFn for BarrierDissemination {
    fn prepare(&self, vgroup: &Vgroup, transport: &Arc<dyn Transport>, args: &CollArgs) -> UcgResult<Box<dyn PlanOp>> {
        match args {
            CollArgs::Barrier => Ok(Box::new(BarrierOp::new(transport.clone(), vgroup))),
            _ => Err(UcgError::InvalidParam),
        }
    }
}
