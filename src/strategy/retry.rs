//! Retry policy: the sole authority on whether a failed result is final.

use crate::corpus::TestCase;

/// Decision for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// The test re-enters the pending queue for another attempt.
    Retry,
    /// The budget is exhausted; the failure is terminal.
    Exhaust,
}

/// Decides whether a failed test re-enters the pending queue.
///
/// `attempts` is the number of attempts already consumed, including the
/// one that just failed. `pre_seeded` is the flakiness allowance granted
/// for this test; it extends the budget without counting as retries.
pub trait RetryPolicy: Send + Sync {
    fn on_failure(&self, test: &TestCase, attempts: u32, pre_seeded: u32) -> RetryVerdict;
}

/// Retries each test up to a fixed quota, plus its flakiness pre-seed.
///
/// Total attempts for a test never exceed
/// `1 + max_retries + pre_seeded`.
pub struct FixedQuotaRetry {
    max_retries: u32,
}

impl FixedQuotaRetry {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

impl RetryPolicy for FixedQuotaRetry {
    fn on_failure(&self, _test: &TestCase, attempts: u32, pre_seeded: u32) -> RetryVerdict {
        if attempts <= self.max_retries + pre_seeded {
            RetryVerdict::Retry
        } else {
            RetryVerdict::Exhaust
        }
    }
}

/// Every failure is final; flakiness pre-seed still applies.
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn on_failure(&self, _test: &TestCase, attempts: u32, pre_seeded: u32) -> RetryVerdict {
        if attempts <= pre_seeded {
            RetryVerdict::Retry
        } else {
            RetryVerdict::Exhaust
        }
    }
}
