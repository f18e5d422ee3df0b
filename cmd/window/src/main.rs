//! Sliding-window removal driver
//!
//! Simulates a bulk remove: one op per path, at most `np` in flight. A
//! started queue receives ops as slots free up; `wait_any` hands back the
//! finished op, whose `my_id` names the slot to reuse. Failures are
//! reported per path and make the process exit non-zero.
//!
//! Usage: `window [paths] [np] [fail_every]`
//!
//! # Environment Variables
//!
//! - `GOP_LOG=debug` - Log filter (default `info`)
//! - `GOP_NUM_WORKERS=N` - Worker threads

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gop::{Engine, Gop, OpQue, OpStatus, PoolConfig, OP_FAILURE, OP_SUCCESS, OP_TIMEOUT};
use tracing_subscriber::EnvFilter;

/// What one slot is working on
struct Slot {
    path: String,
}

fn arg_or(n: usize, default: usize) -> usize {
    std::env::args()
        .nth(n)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Pretend to remove `path`
fn remove(path: &str, index: usize, fail_every: usize) -> OpStatus {
    std::thread::sleep(Duration::from_micros(200 + (index as u64 % 7) * 100));
    if fail_every > 0 && index % fail_every == fail_every - 1 {
        if index % 2 == 0 {
            OP_TIMEOUT
        } else {
            OP_FAILURE.with_code(-2)
        }
    } else {
        tracing::trace!(path, "removed");
        OP_SUCCESS
    }
}

fn remove_op(engine: &Engine, path: String, index: usize, fail_every: usize, slot: usize) -> Gop {
    let target = path.clone();
    let gop = engine.op(move |_| remove(&target, index, fail_every));
    gop.set_my_id(slot as i64);
    gop.set_private(Arc::new(Slot { path }));
    gop
}

/// Report a finished op; returns its slot and whether it failed
fn reap(gop: &Gop) -> (usize, bool) {
    let slot = gop.my_id() as usize;
    let path = gop
        .private::<Slot>()
        .map(|s| s.path.clone())
        .unwrap_or_default();
    match gop.get_status() {
        Some(status) if status.is_success() => (slot, false),
        Some(status) => {
            eprintln!("ERROR removing {path}: {status}");
            (slot, true)
        }
        None => {
            eprintln!("ERROR removing {path}: no status");
            (slot, true)
        }
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("GOP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let npaths = arg_or(1, 1000);
    let np = arg_or(2, 32).max(1);
    let fail_every = arg_or(3, 0);

    let engine = match Engine::new(PoolConfig::from_env()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to start engine: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("=== Sliding Window Remove ===");
    println!("paths={npaths} np={np} fail_every={fail_every}\n");

    let start = Instant::now();
    let q = OpQue::new();
    q.start_execution();

    let mut failures = 0usize;
    let mut submitted = 0usize;
    for index in 0..npaths {
        let slot = if submitted < np {
            submitted
        } else {
            let Some(done) = q.wait_any() else {
                break;
            };
            let (slot, failed) = reap(&done);
            failures += usize::from(failed);
            slot
        };
        let path = format!("/lio/bulk/file-{index:06}");
        if let Err(e) = q.add(&remove_op(&engine, path, index, fail_every, slot)) {
            eprintln!("cannot queue op: {e}");
            return ExitCode::FAILURE;
        }
        submitted += 1;
    }
    q.finished_submission();

    while let Some(done) = q.wait_any() {
        let (_, failed) = reap(&done);
        failures += usize::from(failed);
    }

    let elapsed = start.elapsed();
    println!("\n=== Results ===");
    println!("Removed:  {}", q.tasks_finished());
    println!("Failed:   {}", q.tasks_failed());
    println!("Time:     {elapsed:?}");
    println!(
        "Rate:     {:.0} ops/sec",
        npaths as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    debug_assert_eq!(failures, q.tasks_failed());

    engine.shutdown();
    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
