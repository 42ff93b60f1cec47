//! `ucg_info`: a thin diagnostic CLI (ambient component 4.M).
//!
//! Not a feature area in its own right -- it exists so the crate is
//! runnable end to end, mirroring the four read-only flags `spec.md`
//! §6 documents for the reference tool: `-v` (version), `-t` (sizeof
//! of core structures), `-p` (plan catalog dump), `-c` (config table
//! dump with help text).

use clap::Parser;
use std::mem::size_of;
use std::process::ExitCode;
use ucg::config::Config;
use ucg::context::{Context, API_VERSION_MAJOR, API_VERSION_MINOR};
use ucg::datatype::{dt_predefined, PredefinedKind, RawBuf};
use ucg::plan::{CollArgs, CollType, MemType};
use ucg::testing::{fixed_oob, LoopbackBus};
use ucg::topology::{Location, ProcessInfo, RankMap};
use ucg::{Group, Request};

#[derive(Parser)]
#[command(name = "ucg_info", about = "Inspect a throwaway ucg context/group", version)]
struct Cli {
    /// Print the API version string
    #[arg(short = 'v', long = "version-info")]
    version: bool,
    /// Print sizeof of core structures (debug)
    #[arg(short = 't', long = "type-sizes")]
    type_sizes: bool,
    /// Print the plan catalog for a singleton group
    #[arg(short = 'p', long = "plans")]
    plans: bool,
    /// Print the full config table with help text
    #[arg(short = 'c', long = "config")]
    config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if !(cli.version || cli.type_sizes || cli.plans || cli.config) {
        print_usage();
        return ExitCode::FAILURE;
    }

    if cli.version {
        print_version();
    }
    if cli.type_sizes {
        print_type_sizes();
    }
    if cli.config {
        print_config();
    }
    if cli.plans {
        if let Err(e) = print_plans() {
            eprintln!("ucg_info: could not build a throwaway group: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

fn print_usage() {
    eprintln!("usage: ucg_info [-v] [-t] [-p] [-c]");
    eprintln!("  -v  print API version");
    eprintln!("  -t  print sizeof of core structures");
    eprintln!("  -p  print the plan catalog for a singleton group");
    eprintln!("  -c  print the full config table with help text");
}

fn print_version() {
    println!("ucg_info: API version {API_VERSION_MAJOR}.{API_VERSION_MINOR}");
}

fn print_type_sizes() {
    println!("sizeof(Request)   = {}", size_of::<Request>());
    println!("sizeof(Group)     = {}", size_of::<Group>());
    println!("sizeof(ProcessInfo) = {}", size_of::<ProcessInfo>());
    println!("sizeof(CollArgs)  = {}", size_of::<CollArgs>());
}

fn print_config() {
    let cfg = Config::default();
    println!("PLANC        = {:<12} -- comma-separated plugin allowlist, or \"all\"", cfg.planc);
    println!("LOG_LEVEL    = {:<12} -- tracing env-filter directive", cfg.log_level);
    println!("USE_MT_MUTEX = {:<12} -- \"y\" for parking_lot::Mutex, else a spin lock", format!("{:?}", cfg.use_mt_mutex));
    println!("PLANC_PATH   = {:<12} -- search path for plugin discovery", cfg.planc_path);
    for coll in ucg::config::COLLECTIVES {
        println!("{coll}_ATTR -- plan-attribute override string for {coll}");
    }
}

fn print_plans() -> anyhow::Result<()> {
    let bus = LoopbackBus::new(1);
    let transports = bus.transports();
    let infos = vec![ProcessInfo { location: Location::default(), plugin_addr: Vec::new() }];

    let ctx = Context::init(API_VERSION_MAJOR, API_VERSION_MINOR, Config::default(), 0, Location::default(), fixed_oob(infos))?;
    let group = Group::create(&ctx, 0, 1, 0, RankMap::full(1), 1, transports[0].clone())?;

    // One throwaway zero-length buffer, reused (RawBuf is Copy) across
    // every args shape below -- only the msg-size formula and the plan
    // lookup key matter here, not real data movement.
    let mut scratch = [0u8; 0];
    let buf = RawBuf::from_mut_slice(&mut scratch);
    let dt = dt_predefined(PredefinedKind::U8);

    for (coll, args) in [
        (CollType::Barrier, CollArgs::Barrier),
        (CollType::Bcast, CollArgs::Bcast { buf, count: 0, dt: dt.clone(), root: 0 }),
        (
            CollType::Allreduce,
            CollArgs::Allreduce { sendbuf: None, recvbuf: buf, count: 0, dt: dt.clone(), op: ucg::ReduceOp::Predefined(ucg::datatype::PredefinedReduceOp::Sum) },
        ),
        (
            CollType::Alltoallv,
            CollArgs::Alltoallv { sendbuf: buf, sendcounts: vec![0], senddispls: vec![0], recvbuf: buf, recvcounts: vec![0], recvdispls: vec![0], dt: dt.clone() },
        ),
        (
            CollType::Scatterv,
            CollArgs::Scatterv { sendbuf: Some(buf), sendcounts: vec![0], senddispls: vec![0], recvbuf: buf, recvcount: 0, dt: dt.clone(), root: 0 },
        ),
        (
            CollType::Gatherv,
            CollArgs::Gatherv { sendbuf: buf, sendcount: 0, recvbuf: Some(buf), recvcounts: vec![0], recvdispls: vec![0], dt: dt.clone(), root: 0 },
        ),
        (
            CollType::Allgatherv,
            CollArgs::Allgatherv { sendbuf: buf, sendcount: 0, recvbuf: buf, recvcounts: vec![0], recvdispls: vec![0], dt: dt.clone() },
        ),
    ] {
        if let Ok(req) = group.init_request(&ctx, coll, MemType::Host, args) {
            drop(req);
            println!("{coll:?}: plan available");
        } else {
            println!("{coll:?}: no plan");
        }
    }

    group.destroy(&ctx);
    ctx.cleanup();
    Ok(())
}
