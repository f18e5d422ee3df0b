//! Stress test - many ops in nested queues
//!
//! Builds `fanout` sub-queues of `per_queue` ops each under one top queue,
//! with a second thread adding a late sub-queue after execution started,
//! then drains everything and checks the counts.
//!
//! Usage: `stress [per_queue] [fanout]`

use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use gop::{ControlPool, Engine, OpQue, PoolConfig, OP_SUCCESS};
use tracing_subscriber::EnvFilter;

fn arg_or(n: usize, default: usize) -> usize {
    std::env::args()
        .nth(n)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn build_sub(engine: &Engine, per_queue: usize, completed: &Arc<AtomicU64>) -> gop::GopResult<OpQue> {
    let sub = engine.queue();
    for _ in 0..per_queue {
        let completed = Arc::clone(completed);
        sub.add(&engine.op(move |_| {
            let mut x = 0u64;
            for i in 0..100 {
                x = x.wrapping_mul(31).wrapping_add(i);
            }
            std::hint::black_box(x);
            completed.fetch_add(1, Ordering::Relaxed);
            OP_SUCCESS
        }))?;
    }
    sub.finished_submission();
    Ok(sub)
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("GOP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let per_queue = arg_or(1, 1000);
    let fanout = arg_or(2, 10).max(1);
    let expected = (per_queue * (fanout + 1)) as u64;

    println!("=== gop Stress Test ===\n");
    println!("{fanout} sub-queues x {per_queue} ops (+1 late sub-queue)");

    let engine = match Engine::new(PoolConfig::from_env()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to start engine: {e}");
            return ExitCode::FAILURE;
        }
    };
    let completed = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    let top = OpQue::new();
    for _ in 0..fanout {
        match build_sub(&engine, per_queue, &completed) {
            Ok(sub) => {
                if let Err(e) = top.add(&sub) {
                    eprintln!("add failed: {e}");
                    return ExitCode::FAILURE;
                }
            }
            Err(e) => {
                eprintln!("build failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    let build_time = start.elapsed();
    println!("Built {} tasks in {build_time:?}", top.tasks_left());

    top.start_execution();

    // Late submission while the first batch runs
    let late = std::thread::scope(|s| {
        s.spawn(|| build_sub(&engine, per_queue, &completed).and_then(|sub| top.add(&sub)))
            .join()
    });
    match late {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            eprintln!("late add failed: {e}");
            return ExitCode::FAILURE;
        }
        Err(_) => {
            eprintln!("late submitter panicked");
            return ExitCode::FAILURE;
        }
    }
    top.finished_submission();

    let status = top.wait_all();
    let total_time = start.elapsed();
    let done = completed.load(Ordering::Relaxed);

    println!("\n=== Results ===");
    println!("Status:        {status}");
    println!("Completed:     {done}/{expected}");
    println!("Sub-queues:    {}", top.tasks_finished());
    println!("Tasks left:    {}", top.tasks_left());
    println!("Total time:    {total_time:?}");
    println!(
        "Throughput:    {:.0} ops/sec",
        done as f64 / total_time.as_secs_f64().max(f64::EPSILON)
    );

    engine.shutdown();
    let stats = engine.pool_stats();
    let cb = ControlPool::global().stats();
    println!("Pool:          executed={} panicked={}", stats.executed, stats.panicked);
    println!(
        "Control pool:  allocated={} reused={} idle={}",
        cb.allocated, cb.reused, cb.idle
    );

    if status.is_success() && done == expected && top.tasks_left() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
