//! Basic gop walk-through
//!
//! Runs a single op, a queue with a failing child, a Direct op, a timed
//! wait and a retry loop.
//!
//! # Environment Variables
//!
//! - `GOP_LOG=debug` - Log filter (default `info`)
//! - `GOP_NUM_WORKERS=N` - Worker threads

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gop::{
    sync_exec_with_retry, Engine, ExecMode, Gop, GopResult, OpQue, PoolConfig, WaitOutcome,
    OP_FAILURE, OP_RETRY, OP_SUCCESS,
};
use tracing_subscriber::EnvFilter;

// GOP_LOG=debug cargo run -p gop-basic
fn main() -> GopResult<()> {
    let filter = EnvFilter::try_from_env("GOP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== gop Basic Example ===\n");

    let engine = Engine::new(PoolConfig::from_env().num_workers(4))?;

    // Single op with callbacks
    let gop = engine.op(|worker| {
        tracing::info!(worker, "hello from a pool worker");
        OP_SUCCESS
    });
    for n in 1..=3 {
        gop.add_callback(move |g, status| println!("  callback {n}: {g} -> {status}"));
    }
    println!("single op: {:?}", gop.sync_exec()?);

    // Queue with one failing child
    let q = engine.queue();
    q.set_failure_callback(|queue, child| {
        println!("  first failure in {}: my_id={}", queue.id(), child.my_id());
    });
    for my_id in 1..=5 {
        let status = if my_id == 3 { OP_FAILURE } else { OP_SUCCESS };
        let child = engine.op(move |_| {
            std::thread::sleep(Duration::from_millis(5 * my_id as u64));
            status
        });
        child.set_my_id(my_id);
        q.add(&child)?;
    }
    q.finished_submission();
    let status = q.wait_all();
    println!(
        "queue: {status} finished={} failed={} left={}",
        q.tasks_finished(),
        q.tasks_failed(),
        q.tasks_left()
    );
    while let Some(failed) = q.next_failed() {
        println!("  failed child my_id={} status={:?}", failed.my_id(), failed.get_status());
    }

    // Nested queues
    let top = OpQue::new();
    for _ in 0..2 {
        let sub = engine.queue();
        for _ in 0..3 {
            sub.add(&engine.op(|_| OP_SUCCESS))?;
        }
        sub.finished_submission();
        top.add(&sub)?;
    }
    top.finished_submission();
    println!("\nnested: tasks_left before start = {}", top.tasks_left());
    println!("nested: {} tasks_left after = {}", top.wait_all(), top.tasks_left());

    // Direct op runs on this thread
    let counter = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&counter);
    let direct = engine.op(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        OP_SUCCESS
    });
    direct.set_exec_mode(ExecMode::Direct)?;
    direct.sync_exec()?;
    println!("\ndirect: counter = {}", counter.load(Ordering::SeqCst));

    // Timed wait
    let slow = engine.op(|_| {
        std::thread::sleep(Duration::from_millis(100));
        OP_SUCCESS
    });
    match slow.wait_timed(Duration::from_millis(10)) {
        WaitOutcome::StillRunning => println!("timed wait: still running"),
        WaitOutcome::Done(status) => println!("timed wait: {status}"),
    }
    println!("timed wait: eventually {} in {:?}", slow.wait(), slow.exec_time());

    // Reset and rerun
    slow.reset()?;
    println!("rerun after reset: {:?}", slow.sync_exec()?);

    // Retry policy on top of fresh ops
    let attempts = Arc::new(AtomicUsize::new(0));
    let a = Arc::clone(&attempts);
    let (last, status) = sync_exec_with_retry(&engine.retry_policy(), || {
        let n = a.fetch_add(1, Ordering::SeqCst);
        Gop::dummy(if n == 0 { OP_RETRY } else { OP_SUCCESS })
    })?;
    println!("\nretry: {status} after {} retries", last.retry_count());

    engine.shutdown();
    println!("\n=== Done ===");
    Ok(())
}
