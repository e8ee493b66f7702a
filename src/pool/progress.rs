//! Per-pool test accounting.
//!
//! Within a pool every test is, at any instant, in exactly one of three
//! places: pending (queued, including undispatched shard work), in flight
//! on exactly one device, or completed with a terminal result.
//! [`PoolProgress`] is the ledger that enforces that invariant and owns
//! the attempt counters. The queues themselves live in the pool executor;
//! this ledger is the authority on where each test currently is.

use std::collections::HashMap;

use crate::corpus::{TestCase, TestResult};
use crate::strategy::FlakinessStrategy;

/// Where a test currently is within its pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestLocation {
    /// Queued in the pool's pending queue or an undispatched shard.
    Pending,
    /// Dispatched in a batch to the device with this serial.
    InFlight(String),
    /// Reached a terminal result.
    Completed,
}

/// Mutable execution ledger for one pool.
pub struct PoolProgress {
    /// Attempts consumed per test name.
    attempts: HashMap<String, u32>,
    /// Flakiness pre-seed allowance per test name, fixed at pool birth.
    pre_seed: HashMap<String, u32>,
    /// Serial of the device currently running each in-flight test.
    in_flight: HashMap<String, String>,
    /// Terminal results.
    completed: HashMap<String, TestResult>,
    /// Corpus size, for the drained check.
    total: usize,
}

impl PoolProgress {
    /// Build the ledger for a corpus, computing each test's flakiness
    /// pre-seed up front.
    pub fn new(corpus: &[std::sync::Arc<TestCase>], flakiness: &dyn FlakinessStrategy) -> Self {
        let pre_seed = corpus
            .iter()
            .filter_map(|t| {
                let extra = flakiness.pre_seeded_attempts(t);
                (extra > 0).then(|| (t.name.clone(), extra))
            })
            .collect();
        Self {
            attempts: HashMap::new(),
            pre_seed,
            in_flight: HashMap::new(),
            completed: HashMap::new(),
            total: corpus.len(),
        }
    }

    /// Where the given test currently is.
    pub fn location(&self, name: &str) -> TestLocation {
        if self.completed.contains_key(name) {
            TestLocation::Completed
        } else if let Some(serial) = self.in_flight.get(name) {
            TestLocation::InFlight(serial.clone())
        } else {
            TestLocation::Pending
        }
    }

    /// Record that a test was dispatched to a device.
    ///
    /// Returns `false` if the test is already in flight or completed; the
    /// caller must treat that as a scheduling bug and not dispatch.
    pub fn mark_in_flight(&mut self, name: &str, serial: &str) -> bool {
        if self.completed.contains_key(name) || self.in_flight.contains_key(name) {
            return false;
        }
        self.in_flight.insert(name.to_string(), serial.to_string());
        true
    }

    /// Return an in-flight test to pending without consuming an attempt.
    ///
    /// Used when a batch is abandoned before the test produced a result.
    pub fn mark_returned(&mut self, name: &str) {
        self.in_flight.remove(name);
    }

    /// Consume one attempt for a test that produced a conclusive result,
    /// returning the attempts consumed so far (including this one).
    ///
    /// The test leaves the in-flight set; the caller decides between
    /// requeue and finalize.
    pub fn record_attempt(&mut self, name: &str) -> u32 {
        self.in_flight.remove(name);
        let attempts = self.attempts.entry(name.to_string()).or_insert(0);
        *attempts += 1;
        *attempts
    }

    /// Attempts consumed so far for a test.
    pub fn attempts(&self, name: &str) -> u32 {
        self.attempts.get(name).copied().unwrap_or(0)
    }

    /// Flakiness pre-seed allowance for a test.
    pub fn pre_seed(&self, name: &str) -> u32 {
        self.pre_seed.get(name).copied().unwrap_or(0)
    }

    /// Move a test to its terminal state.
    ///
    /// Returns `false` (and keeps the first result) if the test was
    /// already finalized; terminal results are delivered exactly once.
    pub fn finalize(&mut self, name: &str, result: TestResult) -> bool {
        self.in_flight.remove(name);
        if self.completed.contains_key(name) {
            return false;
        }
        self.completed.insert(name.to_string(), result);
        true
    }

    /// Whether every test in the corpus has a terminal result.
    pub fn is_complete(&self) -> bool {
        self.completed.len() == self.total
    }

    /// Number of tests currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Terminal results accumulated so far, keyed by test name.
    pub fn completed(&self) -> &HashMap<String, TestResult> {
        &self.completed
    }

    /// Take the terminal results, consuming the ledger.
    pub fn into_completed(self) -> HashMap<String, TestResult> {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::TestStatus;
    use crate::strategy::flakiness::{IgnoreFlakiness, PreSeedFlakiness};
    use std::sync::Arc;
    use std::time::Duration;

    fn corpus(names: &[&str]) -> Vec<Arc<TestCase>> {
        names.iter().map(|n| Arc::new(TestCase::new(*n))).collect()
    }

    fn result(status: TestStatus, attempt: u32) -> TestResult {
        TestResult::new(status, attempt, Duration::from_millis(5))
    }

    #[test]
    fn test_is_in_exactly_one_place() {
        let mut progress = PoolProgress::new(&corpus(&["a"]), &IgnoreFlakiness);
        assert_eq!(progress.location("a"), TestLocation::Pending);

        assert!(progress.mark_in_flight("a", "dev-1"));
        assert_eq!(progress.location("a"), TestLocation::InFlight("dev-1".into()));

        progress.record_attempt("a");
        assert_eq!(progress.location("a"), TestLocation::Pending);

        assert!(progress.mark_in_flight("a", "dev-2"));
        progress.record_attempt("a");
        assert!(progress.finalize("a", result(TestStatus::Passed, 2)));
        assert_eq!(progress.location("a"), TestLocation::Completed);
    }

    #[test]
    fn double_dispatch_is_rejected() {
        let mut progress = PoolProgress::new(&corpus(&["a"]), &IgnoreFlakiness);
        assert!(progress.mark_in_flight("a", "dev-1"));
        // No two devices may hold the same test at once.
        assert!(!progress.mark_in_flight("a", "dev-2"));
    }

    #[test]
    fn dispatch_after_completion_is_rejected() {
        let mut progress = PoolProgress::new(&corpus(&["a"]), &IgnoreFlakiness);
        assert!(progress.mark_in_flight("a", "dev-1"));
        progress.record_attempt("a");
        progress.finalize("a", result(TestStatus::Passed, 1));
        assert!(!progress.mark_in_flight("a", "dev-1"));
    }

    #[test]
    fn returned_tests_cost_no_attempts() {
        let mut progress = PoolProgress::new(&corpus(&["a"]), &IgnoreFlakiness);
        progress.mark_in_flight("a", "dev-1");
        progress.mark_returned("a");
        assert_eq!(progress.attempts("a"), 0);
        assert_eq!(progress.location("a"), TestLocation::Pending);
    }

    #[test]
    fn finalize_is_exactly_once() {
        let mut progress = PoolProgress::new(&corpus(&["a"]), &IgnoreFlakiness);
        progress.mark_in_flight("a", "dev-1");
        progress.record_attempt("a");
        assert!(progress.finalize("a", result(TestStatus::Failed, 1)));
        assert!(!progress.finalize("a", result(TestStatus::Passed, 1)));
        assert_eq!(
            progress.completed().get("a").unwrap().status,
            TestStatus::Failed
        );
    }

    #[test]
    fn pre_seed_comes_from_flakiness_strategy() {
        let tests = vec![
            Arc::new(TestCase::new("steady")),
            Arc::new(TestCase::new("shaky").flaky()),
        ];
        let progress = PoolProgress::new(&tests, &PreSeedFlakiness::new(2));
        assert_eq!(progress.pre_seed("steady"), 0);
        assert_eq!(progress.pre_seed("shaky"), 2);
    }

    #[test]
    fn complete_when_all_finalized() {
        let mut progress = PoolProgress::new(&corpus(&["a", "b"]), &IgnoreFlakiness);
        assert!(!progress.is_complete());
        for name in ["a", "b"] {
            progress.mark_in_flight(name, "dev-1");
            progress.record_attempt(name);
            progress.finalize(name, result(TestStatus::Passed, 1));
        }
        assert!(progress.is_complete());
    }
}
