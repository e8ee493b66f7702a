//! Pre-seeded attempts for tests known to be flaky.

use crate::corpus::TestCase;

/// Grants extra attempt allowance to tests annotated as flaky, so a flaky
/// failure self-heals without consuming the standard retry budget.
pub trait FlakinessStrategy: Send + Sync {
    /// Extra attempts to pre-seed for this test, on top of the retry quota.
    fn pre_seeded_attempts(&self, test: &TestCase) -> u32;
}

/// Flakiness annotations carry no scheduling weight.
pub struct IgnoreFlakiness;

impl FlakinessStrategy for IgnoreFlakiness {
    fn pre_seeded_attempts(&self, _test: &TestCase) -> u32 {
        0
    }
}

/// Pre-seeds a fixed number of extra attempts for each flaky-flagged test.
pub struct PreSeedFlakiness {
    attempts: u32,
}

impl PreSeedFlakiness {
    pub fn new(attempts: u32) -> Self {
        Self { attempts }
    }
}

impl FlakinessStrategy for PreSeedFlakiness {
    fn pre_seeded_attempts(&self, test: &TestCase) -> u32 {
        if test.flaky { self.attempts } else { 0 }
    }
}
