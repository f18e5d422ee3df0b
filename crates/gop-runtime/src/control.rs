//! Control-block pool
//!
//! A control block is the condition variable a blocked waiter sleeps on.
//! Operations lease one lazily, the first time a thread has to block on
//! them, and hand it back once every waiter has observed completion.
//! Leases return their block on drop, so no exit path leaks one.
//!
//! Idle blocks sit in a bounded lock-free free list; when the list is
//! full a released block is simply dropped.

use crate::config::PoolConfig;

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, MutexGuard};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Wake-up primitive backing blocking waits on one operation
#[derive(Debug, Default)]
pub struct ControlBlock {
    condvar: Condvar,
}

impl ControlBlock {
    fn new() -> Self {
        Self::default()
    }

    /// Block on `guard` until notified
    #[inline]
    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>) {
        self.condvar.wait(guard);
    }

    /// Block on `guard` until notified or `deadline` passes
    ///
    /// Returns `true` if the deadline passed.
    #[inline]
    pub fn wait_until<T>(&self, guard: &mut MutexGuard<'_, T>, deadline: Instant) -> bool {
        self.condvar.wait_until(guard, deadline).timed_out()
    }

    /// Wake every thread blocked on this block
    #[inline]
    pub fn notify_all(&self) -> usize {
        self.condvar.notify_all()
    }
}

/// Counters for a [`ControlPool`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlPoolStats {
    /// Blocks created because the free list was empty
    pub allocated: u64,
    /// Acquisitions served from the free list
    pub reused: u64,
    /// Blocks currently leased out
    pub outstanding: u64,
    /// Blocks sitting in the free list
    pub idle: usize,
}

/// Thread-safe free list of control blocks
pub struct ControlPool {
    free: ArrayQueue<Box<ControlBlock>>,
    allocated: AtomicU64,
    reused: AtomicU64,
    released: AtomicU64,
}

static GLOBAL_POOL: OnceLock<ControlPool> = OnceLock::new();

impl ControlPool {
    /// Pool retaining at most `capacity` idle blocks
    pub fn new(capacity: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Process-wide pool, sized by `GOP_CONTROL_POOL_CAPACITY` on first use
    pub fn global() -> &'static ControlPool {
        GLOBAL_POOL.get_or_init(|| {
            let capacity = PoolConfig::from_env().control_pool_capacity;
            tracing::debug!(capacity, "control-block pool initialized");
            ControlPool::new(capacity)
        })
    }

    /// Lease a block, allocating one if none is idle
    pub fn acquire(&self) -> ControlLease<'_> {
        let block = match self.free.pop() {
            Some(block) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                block
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Box::new(ControlBlock::new())
            }
        };
        ControlLease {
            block: Some(block),
            pool: self,
        }
    }

    /// Return a lease early; same as dropping it
    pub fn release(&self, lease: ControlLease<'_>) {
        drop(lease);
    }

    fn put_back(&self, block: Box<ControlBlock>) {
        self.released.fetch_add(1, Ordering::Relaxed);
        // Full free list: let the block go.
        let _ = self.free.push(block);
    }

    pub fn stats(&self) -> ControlPoolStats {
        let allocated = self.allocated.load(Ordering::Relaxed);
        let reused = self.reused.load(Ordering::Relaxed);
        let released = self.released.load(Ordering::Relaxed);
        ControlPoolStats {
            allocated,
            reused,
            outstanding: (allocated + reused).saturating_sub(released),
            idle: self.free.len(),
        }
    }
}

/// Exclusive checkout of a [`ControlBlock`]; returns it to its pool on drop
pub struct ControlLease<'p> {
    block: Option<Box<ControlBlock>>,
    pool: &'p ControlPool,
}

impl Deref for ControlLease<'_> {
    type Target = ControlBlock;

    fn deref(&self) -> &ControlBlock {
        // Only `drop` takes the block out.
        match &self.block {
            Some(block) => block,
            None => unreachable!("control lease used after release"),
        }
    }
}

impl Drop for ControlLease<'_> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            self.pool.put_back(block);
        }
    }
}

impl std::fmt::Debug for ControlLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLease").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_acquire_allocates_then_reuses() {
        let pool = ControlPool::new(4);
        let lease = pool.acquire();
        assert_eq!(pool.stats().allocated, 1);
        assert_eq!(pool.stats().outstanding, 1);
        drop(lease);
        assert_eq!(pool.stats().idle, 1);

        let lease = pool.acquire();
        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.idle, 0);
        pool.release(lease);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_overflow_is_dropped() {
        let pool = ControlPool::new(2);
        let leases: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
        drop(leases);
        let stats = pool.stats();
        assert_eq!(stats.allocated, 5);
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn test_wait_and_notify() {
        let pool = ControlPool::new(1);
        let lease = pool.acquire();
        let state = Arc::new(Mutex::new(false));

        thread::scope(|s| {
            let waiter_state = Arc::clone(&state);
            let block: &ControlBlock = &lease;
            s.spawn(move || {
                let mut done = waiter_state.lock();
                while !*done {
                    block.wait(&mut done);
                }
            });

            thread::sleep(Duration::from_millis(20));
            *state.lock() = true;
            lease.notify_all();
        });
    }

    #[test]
    fn test_wait_until_times_out() {
        let pool = ControlPool::new(1);
        let lease = pool.acquire();
        let m = Mutex::new(());
        let mut guard = m.lock();
        let timed_out = lease.wait_until(&mut guard, Instant::now() + Duration::from_millis(10));
        assert!(timed_out);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = Arc::new(ControlPool::new(8));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let lease = pool.acquire();
                        lease.notify_all();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.allocated + stats.reused, 2000);
        assert!(stats.allocated <= 4 + 8);
    }
}
