//! Worker parking mechanism
//!
//! Sleep/wake for idle pool workers. Submitters call `wake_one()` after
//! pushing a job; shutdown calls `wake_all()`.

mod condvar;

pub use condvar::CondvarParking;

use std::time::Duration;

/// Worker parking mechanism
///
/// Workers call `park()` when the job queue is empty.
pub trait WorkerParking: Send + Sync {
    /// Park the current worker until signaled or timeout
    ///
    /// Returns:
    /// - `true` if woken by signal
    /// - `false` if timeout or spurious wakeup
    ///
    /// Workers re-check the queue after returning regardless of the result.
    fn park(&self, timeout: Option<Duration>) -> bool;

    /// Wake one parked worker
    ///
    /// If no workers are parked the signal is dropped; they are busy and
    /// will see the job on their next pop.
    fn wake_one(&self);

    /// Wake all parked workers
    fn wake_all(&self);

    /// Number of currently parked workers (hint, may be stale)
    fn parked_count(&self) -> usize;
}

/// Create a new parking instance
pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(CondvarParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_park_timeout() {
        let parking = new_parking();
        let start = std::time::Instant::now();
        let woken = parking.park(Some(Duration::from_millis(50)));
        let elapsed = start.elapsed();

        assert!(!woken);
        assert!(elapsed >= Duration::from_millis(40));
        assert_eq!(parking.parked_count(), 0);
    }

    #[test]
    fn test_wake_one() {
        let parking = Arc::new(CondvarParking::new());
        let parking2 = Arc::clone(&parking);

        let handle = thread::spawn(move || parking2.park(Some(Duration::from_secs(10))));

        while parking.parked_count() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        parking.wake_one();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_wake_all_releases_everyone() {
        let parking = Arc::new(CondvarParking::new());
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let p = Arc::clone(&parking);
                thread::spawn(move || p.park(Some(Duration::from_secs(10))))
            })
            .collect();

        while parking.parked_count() < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        parking.wake_all();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(parking.parked_count(), 0);
    }
}
