//! Per-communicator state (component H): the plan catalog a group
//! builds out of its loaded plugins, the topology subgroups derived
//! from the context's process-info table, and the request-id
//! allocator its collectives draw from.

use crate::context::Context;
use crate::error::{UcgError, UcgResult};
use crate::p2p::Transport;
use crate::plan::{CollArgs, CollType, MemType, PlanList};
use crate::plan_attr;
use crate::request::{Request, RequestIdAllocator, TrackedRequest};
use crate::topology::{ProcessInfo, Rank, RankMap, Topology, Vgroup};
use std::collections::HashMap;
use std::sync::Arc;

/// Public collectives' `<COLL>_ATTR` config key, or `None` for
/// `Reduce` (internal-only, `spec.md` §6, no public override key).
fn coll_attr_key(coll: CollType) -> Option<&'static str> {
    Some(match coll {
        CollType::Bcast => "BCAST",
        CollType::Allreduce => "ALLREDUCE",
        CollType::Barrier => "BARRIER",
        CollType::Alltoallv => "ALLTOALLV",
        CollType::Scatterv => "SCATTERV",
        CollType::Gatherv => "GATHERV",
        CollType::Allgatherv => "ALLGATHERV",
        CollType::Reduce => return None,
    })
}

/// A communicator: a `vgroup` plus everything needed to dispatch a
/// collective over it (`spec.md` §4.H).
pub struct Group {
    id: u32,
    vgroup: Vgroup,
    topology: Topology,
    plans: HashMap<(CollType, MemType), PlanList>,
    transport: Arc<dyn Transport>,
    id_alloc: RequestIdAllocator,
    plugins: Vec<String>,
}

impl Group {
    /// `group_create` (`spec.md` §4.H step 1-4), run under the caller's
    /// context lock.
    ///
    /// `oob_group_size` stands in for the full OOB sub-communicator
    /// handle the reference design threads through group create: this
    /// crate has no network layer of its own, so callers supply one
    /// pre-built `transport` (mirroring how [`Context::init`] takes an
    /// injected OOB-allgather) and we only validate the size the real
    /// handle would have reported.
    pub fn create(
        ctx: &Context,
        id: u32,
        size: usize,
        myrank: Rank,
        rank_map: RankMap,
        oob_group_size: usize,
        transport: Arc<dyn Transport>,
    ) -> UcgResult<Self> {
        if size == 0 || rank_map.size() != size || oob_group_size != size {
            return Err(UcgError::InvalidParam);
        }
        if myrank < 0 || myrank as usize >= size {
            return Err(UcgError::InvalidParam);
        }

        let plugins = ctx.selected_plugins().to_vec();
        let vgroup = Vgroup { myrank, rank_map: rank_map.clone(), group_id: id };

        // Step 2: per-plugin subgroup handles, rolling back whatever
        // already succeeded if one plugin declines.
        let mut created: Vec<String> = Vec::new();
        for name in &plugins {
            let plugin = ctx.registry().get(name).ok_or(UcgError::NoResource)?;
            if let Err(e) = plugin.group_create(&vgroup) {
                for done in &created {
                    if let Some(p) = ctx.registry().get(done) {
                        p.group_destroy();
                    }
                }
                return Err(e);
            }
            created.push(name.clone());
        }

        // Step 3: topology subgroups, built from the context's
        // process-info table reindexed through this group's rank_map.
        let world_infos = ctx.process_infos();
        let group_infos: Vec<ProcessInfo> = (0..size).map(|i| world_infos[rank_map.eval(i) as usize].clone()).collect();
        let topology = Topology::build(myrank, &group_infos, id);

        // Step 4: merge every plugin's plan contribution per (coll,
        // mem) slot, then apply the user's plan-attribute overrides.
        let mut plans: HashMap<(CollType, MemType), PlanList> = HashMap::new();
        for name in &plugins {
            let plugin = ctx.registry().get(name).expect("validated in step 2");
            for (key, list) in plugin.get_plans() {
                plans.entry(key).or_default().merge(&list)?;
            }
        }
        for (&(coll, _mem), list) in plans.iter_mut() {
            if let Some(attr_key) = coll_attr_key(coll) {
                if let Some(raw) = ctx.config().coll_attr.get(attr_key) {
                    let overrides = plan_attr::parse(raw)?;
                    plan_attr::apply_to_list(list, &overrides, size as u64);
                }
            }
        }

        Ok(Group { id, vgroup, topology, plans, transport, id_alloc: RequestIdAllocator::new(), plugins })
    }

    /// `group_destroy`: tear down per-plugin group handles. Topology,
    /// plans, and the rank map are freed by ordinary `Drop` once
    /// `self` goes out of scope (`spec.md` §4.H "Destroy").
    pub fn destroy(self, ctx: &Context) {
        for name in &self.plugins {
            if let Some(plugin) = ctx.registry().get(name) {
                plugin.group_destroy();
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn vgroup(&self) -> &Vgroup {
        &self.vgroup
    }

    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// `request_<coll>_init`: select a plan for `args` against this
    /// group's catalog, wrap the produced op in a fresh, unstarted
    /// [`Request`], and register it on `ctx`'s progress list. The
    /// returned [`TrackedRequest`] and `ctx`'s own `progress()` pump
    /// share the same underlying request, so either can drive it to
    /// completion (`spec.md` §9's dual progress mechanism).
    pub fn init_request(&self, ctx: &Context, coll: CollType, mem: MemType, args: CollArgs) -> UcgResult<TrackedRequest> {
        let list = self.plans.get(&(coll, mem)).ok_or(UcgError::NotFound)?;
        let msg_size = args.msg_size(self.vgroup.size());
        let op = list.select(msg_size, &self.vgroup, &self.transport, &args)?;
        Ok(ctx.track(Request::new(op)))
    }

    pub fn id_allocator_mut(&mut self) -> &mut RequestIdAllocator {
        &mut self.id_alloc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::{Status, UcgResult as Result};
    use crate::p2p::Tag;
    use crate::topology::Location;

    struct NoopTransport;
    impl Transport for NoopTransport {
        fn isend(&self, _: &[u8], _: Rank, _: Tag, _: crate::p2p::OpToken) -> Result<()> {
            Ok(())
        }
        fn irecv(&self, _: &mut [u8], _: Rank, _: Tag, _: crate::p2p::OpToken) -> Result<()> {
            Ok(())
        }
        fn progress(&self, _: crate::p2p::OpToken) -> Result<(usize, usize)> {
            Ok((0, 0))
        }
    }

    fn test_context() -> Context {
        let config = Config::default();
        Context::init(1, 0, config, 0, Location::default(), Box::new(|_| Ok(vec![ProcessInfo::default(); 4]))).unwrap()
    }

    #[test]
    fn create_builds_a_plan_catalog_for_every_collective() {
        let ctx = test_context();
        let group = Group::create(&ctx, 7, 4, 0, RankMap::full(4), 4, Arc::new(NoopTransport)).unwrap();
        assert_eq!(group.vgroup().group_id, 7);
        for coll in [CollType::Barrier, CollType::Bcast, CollType::Allreduce] {
            assert!(group.plans.contains_key(&(coll, MemType::Host)));
        }
        group.destroy(&ctx);
    }

    #[test]
    fn mismatched_rank_map_size_is_rejected() {
        let ctx = test_context();
        let err = Group::create(&ctx, 1, 4, 0, RankMap::full(3), 4, Arc::new(NoopTransport)).unwrap_err();
        assert_eq!(err, UcgError::InvalidParam);
    }

    #[test]
    fn barrier_request_runs_to_completion() {
        let ctx = test_context();
        let mut group = Group::create(&ctx, 1, 1, 0, RankMap::full(1), 1, Arc::new(NoopTransport)).unwrap();
        let req = group.init_request(&ctx, CollType::Barrier, MemType::Host, CollArgs::Barrier).unwrap();
        assert_eq!(ctx.progress_list_len(), 0, "not yet started, so not on the progress list");
        let mut s = req.start(group.id_allocator_mut());
        while s == Status::InProgress {
            s = req.test();
        }
        assert_eq!(s, Status::Ok);
        assert_eq!(ctx.progress_list_len(), 0, "a singleton barrier completes inline and is never left on the list");
        group.destroy(&ctx);
    }

    #[test]
    fn bcast_attr_override_changes_score() {
        let mut config = Config::default();
        config.modify("BCAST_ATTR", "I:bcast.binomial S:999");
        let ctx = Context::init(1, 0, config, 0, Location::default(), Box::new(|_| Ok(vec![ProcessInfo::default(); 2]))).unwrap();
        let group = Group::create(&ctx, 1, 2, 0, RankMap::full(2), 2, Arc::new(NoopTransport)).unwrap();
        let entry = &group.plans.get(&(CollType::Bcast, MemType::Host)).unwrap().entries()[0];
        assert_eq!(entry.plan.score, 999);
        group.destroy(&ctx);
    }
}
