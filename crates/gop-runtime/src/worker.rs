//! Worker threads
//!
//! `ThreadPool` is the default [`Executor`]. It spawns N OS threads at
//! creation; workers pop jobs from a lock-free MPMC queue and park on a
//! [`WorkerParking`] when it runs dry. No dynamic scaling.

use crate::config::PoolConfig;
use crate::parking::{new_parking, WorkerParking};

use crossbeam_queue::SegQueue;
use gop_core::{GopError, GopResult};
use parking_lot::Mutex;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Index of a pool worker
pub type WorkerId = usize;

/// Worker id reported for work run on the calling thread
pub const INLINE_WORKER: WorkerId = usize::MAX;

/// A unit of work handed to an executor; receives the id of the worker running it
pub type Job = Box<dyn FnOnce(WorkerId) + Send + 'static>;

/// Something that runs jobs asynchronously
pub trait Executor: Send + Sync {
    /// Queue `job` for execution on some worker
    ///
    /// Fails with `PoolShutdown` once the executor stopped accepting work.
    fn submit(&self, job: Job) -> GopResult<()>;

    /// Number of worker threads
    fn num_workers(&self) -> usize;

    /// Name used in thread names and logs
    fn name(&self) -> &str;
}

thread_local! {
    static CURRENT_WORKER_ID: Cell<WorkerId> = const { Cell::new(INLINE_WORKER) };
}

fn set_current_worker_id(id: WorkerId) {
    CURRENT_WORKER_ID.with(|cell| cell.set(id));
}

/// Id of the pool worker running on this thread, or `INLINE_WORKER`
#[inline]
pub fn current_worker_id() -> WorkerId {
    CURRENT_WORKER_ID.with(|cell| cell.get())
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    /// Workers currently running a job
    pub active: usize,
    /// Jobs waiting in the queue
    pub queued: usize,
    pub submitted: u64,
    pub executed: u64,
    /// Jobs that panicked (the worker survives)
    pub panicked: u64,
}

/// Shared state between submitters and workers
struct PoolInner {
    name: String,
    queue: SegQueue<Job>,
    parking: Box<dyn WorkerParking>,
    park_timeout: Duration,
    shutdown: AtomicBool,
    active: AtomicUsize,
    submitted: AtomicU64,
    executed: AtomicU64,
    panicked: AtomicU64,
}

impl PoolInner {
    fn run(&self, job: Job, worker_id: WorkerId) {
        self.active.fetch_add(1, Ordering::Relaxed);
        let result = panic::catch_unwind(AssertUnwindSafe(|| job(worker_id)));
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.executed.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.panicked.fetch_add(1, Ordering::Relaxed);
            tracing::error!(pool = %self.name, worker = worker_id, "job panicked");
        }
    }
}

/// Fixed-size worker pool
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
}

impl ThreadPool {
    /// Spawn a pool sized and named by `config`
    pub fn new(config: &PoolConfig) -> GopResult<Self> {
        let n = config.resolved_workers();
        let inner = Arc::new(PoolInner {
            name: config.name.clone(),
            queue: SegQueue::new(),
            parking: new_parking(),
            park_timeout: config.park_timeout,
            shutdown: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            submitted: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker_inner = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.name, worker_id))
                .spawn(move || worker_loop(worker_inner, worker_id));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Stop whatever already started before reporting.
                    inner.shutdown.store(true, Ordering::SeqCst);
                    inner.parking.wake_all();
                    for h in handles {
                        let _ = h.join();
                    }
                    return Err(GopError::Spawn(e));
                }
            }
        }

        tracing::debug!(pool = %config.name, workers = n, "thread pool started");
        Ok(Self {
            inner,
            handles: Mutex::new(handles),
            workers: n,
        })
    }

    /// Pool built from environment configuration
    pub fn from_env() -> GopResult<Self> {
        Self::new(&PoolConfig::from_env())
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Workers currently running a job
    #[inline]
    pub fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn total_workers(&self) -> usize {
        self.workers
    }

    /// Jobs waiting for a worker
    #[inline]
    pub fn queued_jobs(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            active: self.inner.active.load(Ordering::Relaxed),
            queued: self.inner.queue.len(),
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            executed: self.inner.executed.load(Ordering::Relaxed),
            panicked: self.inner.panicked.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work, run what is queued, and join the workers
    ///
    /// Idempotent. Called from a worker thread, that worker is not joined.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.parking.wake_all();

        let me = thread::current().id();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            let _ = handle.join();
        }

        // A submit that raced the flag may have landed after the workers left.
        let mut leftovers = 0usize;
        while let Some(job) = self.inner.queue.pop() {
            self.inner.run(job, INLINE_WORKER);
            leftovers += 1;
        }
        tracing::debug!(
            pool = %self.inner.name,
            executed = self.inner.executed.load(Ordering::Relaxed),
            leftovers,
            "thread pool stopped"
        );
    }
}

impl Executor for ThreadPool {
    fn submit(&self, job: Job) -> GopResult<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(GopError::PoolShutdown(self.inner.name.clone()));
        }
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.queue.push(job);
        // Pairs with the fence in worker_loop. A wake that still slips
        // past a parking worker costs at most one park timeout.
        fence(Ordering::SeqCst);
        self.inner.parking.wake_one();
        Ok(())
    }

    fn num_workers(&self) -> usize {
        self.workers
    }

    fn name(&self) -> &str {
        &self.inner.name
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker thread main loop
///
/// Drains the queue before honoring shutdown.
fn worker_loop(inner: Arc<PoolInner>, worker_id: WorkerId) {
    set_current_worker_id(worker_id);
    tracing::trace!(pool = %inner.name, worker = worker_id, "worker started");

    loop {
        if let Some(job) = inner.queue.pop() {
            inner.run(job, worker_id);
            continue;
        }
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        fence(Ordering::SeqCst);
        if !inner.queue.is_empty() {
            continue;
        }
        inner.parking.park(Some(inner.park_timeout));
    }

    tracing::trace!(pool = %inner.name, worker = worker_id, "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn small_pool(n: usize) -> ThreadPool {
        ThreadPool::new(&PoolConfig::new().num_workers(n).name("test-pool")).unwrap()
    }

    #[test]
    fn test_submit_runs_on_worker() {
        let pool = small_pool(2);
        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move |wid| {
            tx.send((wid, current_worker_id())).unwrap();
        }))
        .unwrap();

        let (wid, tls) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(wid < 2);
        assert_eq!(wid, tls);
        assert_eq!(current_worker_id(), INLINE_WORKER);
    }

    #[test]
    fn test_many_jobs_all_execute() {
        let pool = small_pool(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..1000 {
            let c = Arc::clone(&counter);
            pool.submit(Box::new(move |_| {
                c.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 1000);

        let stats = pool.stats();
        assert_eq!(stats.submitted, 1000);
        assert_eq!(stats.executed, 1000);
        assert_eq!(stats.queued, 0);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = small_pool(1);
        pool.shutdown();
        assert!(pool.is_shutdown());
        let err = pool.submit(Box::new(|_| {})).unwrap_err();
        assert!(matches!(err, GopError::PoolShutdown(ref name) if name == "test-pool"));
        // Second shutdown is a no-op.
        pool.shutdown();
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = small_pool(1);
        pool.submit(Box::new(|_| panic!("boom"))).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move |_| tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.shutdown();
        assert_eq!(pool.stats().panicked, 1);
    }

    #[test]
    fn test_executor_trait_object() {
        let pool: Arc<dyn Executor> = Arc::new(small_pool(3));
        assert_eq!(pool.num_workers(), 3);
        assert_eq!(pool.name(), "test-pool");
    }
}
