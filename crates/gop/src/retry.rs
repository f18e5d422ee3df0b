//! Retry policy for transient outcomes
//!
//! The engine itself never retries. Command layers that want to wrap an
//! op in a retry loop build a fresh op per attempt and run it through
//! [`sync_exec_with_retry`], which resubmits while the outcome is
//! transient (`Retry`, `Dead`, `Timeout`) and the budget allows.

use std::time::Duration;

use gop_core::{GopResult, OpStatus};
use gop_runtime::PoolConfig;

use crate::op::Gop;

/// Retry budget and backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Resubmissions allowed after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PoolConfig::new())
    }
}

impl RetryPolicy {
    /// Budget and base delay taken from pool configuration
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay,
            multiplier: 2.0,
        }
    }

    /// Policy that retries immediately
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (1-indexed)
    ///
    /// `base_delay * multiplier^(attempt - 1)`
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Whether `status` deserves another attempt after `retries` retries
    pub fn should_retry(&self, status: &OpStatus, retries: u32, budget: Option<u32>) -> bool {
        status.outcome.is_transient() && retries < budget.unwrap_or(self.max_retries)
    }
}

/// Run a fresh op from `factory` until it ends non-transiently or the
/// budget runs out
///
/// Each new op carries the number of retries before it in
/// [`Gop::retry_count`]; a per-op [`Gop::set_max_retries`] set by the
/// factory overrides the policy budget. Returns the last op and its
/// status.
pub fn sync_exec_with_retry<F>(policy: &RetryPolicy, mut factory: F) -> GopResult<(Gop, OpStatus)>
where
    F: FnMut() -> Gop,
{
    let mut retries = 0u32;
    loop {
        let gop = factory();
        gop.set_retry_count(retries);
        let status = gop.sync_exec_status()?;

        if !policy.should_retry(&status, retries, gop.max_retries()) {
            if retries > 0 {
                tracing::debug!(op = %gop.id(), retries, %status, "retry loop done");
            }
            return Ok((gop, status));
        }

        retries += 1;
        let delay = policy.next_delay(retries);
        tracing::debug!(op = %gop.id(), %status, attempt = retries, ?delay, "retrying");
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gop_core::{Outcome, OP_DEAD, OP_FAILURE, OP_RETRY, OP_SUCCESS, OP_TIMEOUT};
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            multiplier: 2.0,
        };
        assert_eq!(policy.next_delay(1), Duration::from_millis(50));
        assert_eq!(policy.next_delay(2), Duration::from_millis(100));
        assert_eq!(policy.next_delay(3), Duration::from_millis(200));
        assert_eq!(policy.next_delay(0), Duration::from_millis(50));
    }

    #[rstest]
    #[case(OP_RETRY, 0, true)]
    #[case(OP_DEAD, 1, true)]
    #[case(OP_TIMEOUT, 2, false)]
    #[case(OP_FAILURE, 0, false)]
    #[case(OP_SUCCESS, 0, false)]
    fn test_should_retry(#[case] status: OpStatus, #[case] retries: u32, #[case] expected: bool) {
        let policy = RetryPolicy::immediate(2);
        assert_eq!(policy.should_retry(&status, retries, None), expected);
    }

    #[test]
    fn test_retries_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = Arc::clone(&attempts);
        let (gop, status) = sync_exec_with_retry(&RetryPolicy::immediate(5), || {
            let n = a.fetch_add(1, Ordering::SeqCst);
            Gop::dummy(if n < 2 { OP_TIMEOUT } else { OP_SUCCESS })
        })
        .unwrap();

        assert_eq!(status, OP_SUCCESS);
        assert_eq!(gop.retry_count(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_budget_exhausted_returns_last_status() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = Arc::clone(&attempts);
        let (gop, status) = sync_exec_with_retry(&RetryPolicy::immediate(2), || {
            a.fetch_add(1, Ordering::SeqCst);
            Gop::dummy(OP_DEAD)
        })
        .unwrap();

        assert_eq!(status.outcome, Outcome::Dead);
        assert_eq!(gop.retry_count(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_per_op_budget_overrides_policy() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = Arc::clone(&attempts);
        let (_, status) = sync_exec_with_retry(&RetryPolicy::immediate(10), || {
            a.fetch_add(1, Ordering::SeqCst);
            let gop = Gop::dummy(OP_RETRY);
            gop.set_max_retries(1);
            gop
        })
        .unwrap();

        assert_eq!(status, OP_RETRY);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = Arc::clone(&attempts);
        let (_, status) = sync_exec_with_retry(&RetryPolicy::immediate(3), || {
            a.fetch_add(1, Ordering::SeqCst);
            Gop::dummy(OP_FAILURE)
        })
        .unwrap();
        assert_eq!(status, OP_FAILURE);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
