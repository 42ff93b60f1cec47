//! End-to-end scenarios driving `Context`/`Group` together over the
//! real in-process transport, beyond the per-module unit tests.

use ucg::config::Config;
use ucg::context::Context;
use ucg::error::Status;
use ucg::plan::{CollArgs, CollType, MemType};
use ucg::testing::{fixed_oob, LoopbackBus};
use ucg::topology::{Location, ProcessInfo, RankMap};
use ucg::Group;

fn throwaway_context(n: usize) -> Context {
    let infos = vec![ProcessInfo::default(); n];
    Context::init(1, 0, Config::default(), 0, Location::default(), fixed_oob(infos)).unwrap()
}

/// A single barrier across four ranks on one shared bus runs to
/// completion for every rank.
#[test]
fn four_rank_barrier_runs_to_completion() {
    let bus = LoopbackBus::new(4);
    let transports = bus.transports();
    let ctx = throwaway_context(4);

    let mut groups: Vec<Group> =
        (0..4).map(|r| Group::create(&ctx, 1, 4, r, RankMap::full(4), 4, transports[r as usize].clone()).unwrap()).collect();

    let reqs: Vec<_> =
        groups.iter().map(|g| g.init_request(&ctx, CollType::Barrier, MemType::Host, CollArgs::Barrier).unwrap()).collect();
    let mut statuses: Vec<Status> = reqs.iter().zip(groups.iter_mut()).map(|(r, g)| r.start(g.id_allocator_mut())).collect();

    while statuses.iter().any(|s| *s == Status::InProgress) {
        for (s, r) in statuses.iter_mut().zip(reqs.iter()) {
            if *s == Status::InProgress {
                *s = r.test();
            }
        }
    }
    for s in statuses {
        assert_eq!(s, Status::Ok);
    }
    for g in groups {
        g.destroy(&ctx);
    }
}

/// Two ranks' barrier requests, registered by `init_request`, driven to
/// completion purely through `Context::progress()` -- neither request's
/// own `test()` is ever called directly, showing the context-wide pump
/// genuinely advances the same requests a caller would otherwise poll.
#[test]
fn context_progress_drives_requests_nobody_polls_directly() {
    let bus = LoopbackBus::new(2);
    let transports = bus.transports();
    let ctx = throwaway_context(2);
    let mut groups: Vec<Group> =
        (0..2).map(|r| Group::create(&ctx, 1, 2, r, RankMap::full(2), 2, transports[r as usize].clone()).unwrap()).collect();

    let reqs: Vec<_> =
        groups.iter().map(|g| g.init_request(&ctx, CollType::Barrier, MemType::Host, CollArgs::Barrier).unwrap()).collect();
    for (r, g) in reqs.iter().zip(groups.iter_mut()) {
        r.start(g.id_allocator_mut());
    }
    assert_eq!(ctx.progress_list_len(), 2);

    let mut turns = 0;
    while reqs.iter().any(|r| r.status() == Status::InProgress) {
        ctx.progress();
        turns += 1;
        assert!(turns < 10_000, "barrier never converged via Context::progress alone");
    }
    for r in &reqs {
        assert_eq!(r.status(), Status::Ok);
    }
    assert_eq!(ctx.progress_list_len(), 0);

    for g in groups {
        g.destroy(&ctx);
    }
}

/// Scenario 5: two groups with different `group_id`s, sharing the same
/// physical ranks (and so the same `LoopbackBus` inboxes), run the same
/// collective concurrently with interleaved progress. The tag's
/// `group_id` field must keep their messages from cross-talking.
#[test]
fn concurrent_disjoint_groups_do_not_cross_talk() {
    let bus = LoopbackBus::new(2);
    let transports = bus.transports();
    let ctx = throwaway_context(2);

    let mut group_a: Vec<Group> =
        (0..2).map(|r| Group::create(&ctx, 10, 2, r, RankMap::full(2), 2, transports[r as usize].clone()).unwrap()).collect();
    let mut group_b: Vec<Group> =
        (0..2).map(|r| Group::create(&ctx, 20, 2, r, RankMap::full(2), 2, transports[r as usize].clone()).unwrap()).collect();

    let req_a: Vec<_> =
        group_a.iter().map(|g| g.init_request(&ctx, CollType::Barrier, MemType::Host, CollArgs::Barrier).unwrap()).collect();
    let req_b: Vec<_> =
        group_b.iter().map(|g| g.init_request(&ctx, CollType::Barrier, MemType::Host, CollArgs::Barrier).unwrap()).collect();

    let mut status_a: Vec<Status> =
        req_a.iter().zip(group_a.iter_mut()).map(|(r, g)| r.start(g.id_allocator_mut())).collect();
    let mut status_b: Vec<Status> =
        req_b.iter().zip(group_b.iter_mut()).map(|(r, g)| r.start(g.id_allocator_mut())).collect();

    // Interleave: step group B a few times before group A even starts
    // progressing, so their sends land in the same inboxes out of order.
    let mut turns = 0;
    while status_a.iter().any(|s| *s == Status::InProgress) || status_b.iter().any(|s| *s == Status::InProgress) {
        if turns % 2 == 0 {
            for (s, r) in status_b.iter_mut().zip(req_b.iter()) {
                if *s == Status::InProgress {
                    *s = r.test();
                }
            }
        } else {
            for (s, r) in status_a.iter_mut().zip(req_a.iter()) {
                if *s == Status::InProgress {
                    *s = r.test();
                }
            }
        }
        turns += 1;
        assert!(turns < 10_000, "barrier never converged, group isolation likely broken");
    }

    for s in status_a.iter().chain(status_b.iter()) {
        assert_eq!(*s, Status::Ok);
    }

    for g in group_a {
        g.destroy(&ctx);
    }
    for g in group_b {
        g.destroy(&ctx);
    }
}
