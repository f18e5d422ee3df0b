//! Condvar parking
//!
//! Portable, built on `parking_lot`'s mutex and condvar.

use super::WorkerParking;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Condvar-based parking
pub struct CondvarParking {
    /// Wake tokens not yet consumed by a parked worker
    pending: Mutex<usize>,

    condvar: Condvar,

    /// Count of parked workers
    parked: AtomicUsize,
}

impl CondvarParking {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(0),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }
}

impl Default for CondvarParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for CondvarParking {
    fn park(&self, timeout: Option<Duration>) -> bool {
        let mut pending = self.pending.lock();
        self.parked.fetch_add(1, Ordering::SeqCst);

        if *pending > 0 {
            *pending -= 1;
            self.parked.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        match timeout {
            Some(t) => {
                let _ = self.condvar.wait_for(&mut pending, t);
            }
            None => self.condvar.wait(&mut pending),
        }

        // A wake token is only ever consumed by the worker that takes it.
        let woken = if *pending > 0 {
            *pending -= 1;
            true
        } else {
            false
        };

        self.parked.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake_one(&self) {
        if self.parked.load(Ordering::SeqCst) == 0 {
            return;
        }
        {
            let mut pending = self.pending.lock();
            *pending = (*pending + 1).min(self.parked.load(Ordering::SeqCst).max(1));
        }
        self.condvar.notify_one();
    }

    fn wake_all(&self) {
        {
            let mut pending = self.pending.lock();
            *pending = self.parked.load(Ordering::SeqCst);
        }
        self.condvar.notify_all();
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
