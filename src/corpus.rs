//! The immutable test corpus model.
//!
//! A [`TestCase`] is loaded once, before scheduling starts, and never
//! mutated afterwards. All mutable execution state (attempts consumed,
//! results) lives in the owning pool, keyed by the test's fully qualified
//! name. Tests are shared between queues as `Arc<TestCase>`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single test case in the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Fully qualified test name (e.g. "com.example.LoginTest#testHappyPath").
    pub name: String,

    /// Whether this test is pre-annotated as flaky.
    ///
    /// Flaky tests are eligible for pre-seeded extra attempts before they
    /// start consuming the standard retry budget.
    #[serde(default)]
    pub flaky: bool,

    /// Expected duration hint, if known from previous runs.
    ///
    /// Used by sorting strategies (slowest-first) and duration-capped
    /// batching. Tests without a hint sort after tests with one.
    #[serde(default, with = "duration_millis")]
    pub expected_duration: Option<Duration>,
}

impl TestCase {
    /// Create a new test case with the given fully qualified name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flaky: false,
            expected_duration: None,
        }
    }

    /// Mark the test as flaky.
    pub fn flaky(mut self) -> Self {
        self.flaky = true;
        self
    }

    /// Set the expected duration hint.
    pub fn with_expected_duration(mut self, duration: Duration) -> Self {
        self.expected_duration = Some(duration);
        self
    }
}

/// Outcome of a single test attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Test ran and passed.
    Passed,
    /// Test ran and failed.
    Failed,
    /// Test was ignored by the framework on the device.
    Ignored,
    /// Synthetic status: the batch was abandoned before this test produced
    /// a real result (device lost mid-run). Never terminal, never reported
    /// to a result sink.
    Incomplete,
}

impl TestStatus {
    /// Whether this status may be finalized as-is.
    ///
    /// `Incomplete` always triggers a requeue instead.
    pub fn is_conclusive(&self) -> bool {
        !matches!(self, TestStatus::Incomplete)
    }
}

/// Result of one attempt of one test on one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Status of the attempt.
    pub status: TestStatus,
    /// 1-based attempt number within the owning pool.
    pub attempt: u32,
    /// Wall-clock time the attempt took.
    pub elapsed: Duration,
}

impl TestResult {
    /// Create a result for the given attempt.
    pub fn new(status: TestStatus, attempt: u32, elapsed: Duration) -> Self {
        Self {
            status,
            attempt,
            elapsed,
        }
    }
}

/// An ordered group of tests dispatched atomically to one device.
///
/// A batch either fully completes (every test gets a result) or is
/// abandoned as a whole when the device is lost mid-run.
#[derive(Debug, Clone, Default)]
pub struct TestBatch {
    /// Tests in execution order.
    pub tests: Vec<Arc<TestCase>>,
}

impl TestBatch {
    /// Create a batch from an ordered list of tests.
    pub fn new(tests: Vec<Arc<TestCase>>) -> Self {
        Self { tests }
    }

    /// Number of tests in the batch.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Whether the batch holds no tests.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Sum of the expected durations of the batch's tests.
    ///
    /// Tests without a hint contribute zero.
    pub fn expected_duration(&self) -> Duration {
        self.tests
            .iter()
            .filter_map(|t| t.expected_duration)
            .sum()
    }
}

mod duration_millis {
    //! Serde adapter storing optional durations as integer milliseconds.

    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let millis: Option<u64> = Option::deserialize(d)?;
        Ok(millis.map(Duration::from_millis))
    }
}
