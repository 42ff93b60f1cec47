//! Built-in collective algorithms (component I): the default
//! `planc-ucx` plugin's contribution to the plan catalog.
//!
//! Each submodule is one algorithm family, structured the way
//! `spec.md` §4.I groups them: a communication-peer iterator
//! ([`iter`]) shared by whichever algorithms need it, plus one
//! [`crate::plan::PlanOp`]/[`crate::plan::PrepareFn`] pair per
//! algorithm.

pub mod allgatherv;
pub mod allreduce;
pub mod alltoallv;
pub mod barrier;
pub mod bcast;
pub mod gatherv;
pub mod iter;
pub mod reduce;
pub mod scatterv;

use crate::plan::{CollType, MemType, Plan, PlanList, PlanRange, PLAN_RANGE_MAX};
use crate::plugin::PlanCPlugin;
use std::collections::HashMap;
use std::sync::Arc;

/// The default plugin: one first-class plan per collective, each
/// covering the whole message-size range. A real plugin would carry
/// several score-ranked algorithms per range (`spec.md` §4.D); this
/// one keeps a single entry per slot since there is exactly one
/// built-in implementation of each collective.
pub struct UcxPlugin;

impl UcxPlugin {
    #[must_use]
    pub fn new() -> Self {
        UcxPlugin
    }
}

impl Default for UcxPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn whole_range_list(id: &str, prepare: Arc<dyn crate::plan::PrepareFn>) -> PlanList {
    let mut list = PlanList::new();
    let plan = Plan::new(id, "planc-ucx", 100, PlanRange::new(0, PLAN_RANGE_MAX), prepare);
    list.add(plan).expect("single whole-range plan never fails to add");
    list
}

impl PlanCPlugin for UcxPlugin {
    fn name(&self) -> &'static str {
        "ucx"
    }

    fn get_plans(&self) -> HashMap<(CollType, MemType), PlanList> {
        let mut plans = HashMap::new();
        plans.insert(
            (CollType::Barrier, MemType::Host),
            whole_range_list("barrier.dissemination", Arc::new(barrier::BarrierDissemination)),
        );
        plans.insert((CollType::Bcast, MemType::Host), whole_range_list("bcast.binomial", Arc::new(bcast::BcastBinomialTree)));
        plans.insert((CollType::Reduce, MemType::Host), whole_range_list("reduce.binomial", Arc::new(reduce::ReduceBinomialTree)));
        plans.insert(
            (CollType::Allreduce, MemType::Host),
            whole_range_list("allreduce.flat_tree", Arc::new(allreduce::AllreduceFlatTree)),
        );
        plans.insert(
            (CollType::Scatterv, MemType::Host),
            whole_range_list("scatterv.linear", Arc::new(scatterv::ScattervLinear)),
        );
        plans.insert((CollType::Gatherv, MemType::Host), whole_range_list("gatherv.linear", Arc::new(gatherv::GathervLinear)));
        plans.insert(
            (CollType::Alltoallv, MemType::Host),
            whole_range_list("alltoallv.linear", Arc::new(alltoallv::AlltoallvLinear)),
        );
        plans.insert(
            (CollType::Allgatherv, MemType::Host),
            whole_range_list("allgatherv.ring", Arc::new(allgatherv::AllgathervRing)),
        );
        plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_a_plan_for_every_collective() {
        let plugin = UcxPlugin::new();
        let plans = plugin.get_plans();
        for coll in [
            CollType::Barrier,
            CollType::Bcast,
            CollType::Reduce,
            CollType::Allreduce,
            CollType::Scatterv,
            CollType::Gatherv,
            CollType::Alltoallv,
            CollType::Allgatherv,
        ] {
            assert!(plans.contains_key(&(coll, MemType::Host)), "missing plan for {coll:?}");
        }
    }
}
