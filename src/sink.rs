//! Terminal result delivery.
//!
//! A [`ResultSink`] receives every terminal per-test result exactly once,
//! in completion order within a pool (order across pools is unspecified),
//! plus one run summary at the end. Rendering, aggregation, and
//! persistence live behind this trait, outside the engine.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::corpus::{TestCase, TestResult};
use crate::scheduler::RunSummary;
use crate::strategy::DevicePoolId;

/// Consumer of terminal test results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Called once per test per pool when the test reaches a terminal
    /// state (passed, ignored, or failed with the budget exhausted).
    async fn on_test_finished(&self, test: &TestCase, pool: &DevicePoolId, result: &TestResult);

    /// Called once when the whole run completes or aborts.
    async fn on_run_complete(&self, summary: &RunSummary);
}

/// A sink that discards everything.
pub struct NullSink;

#[async_trait]
impl ResultSink for NullSink {
    async fn on_test_finished(&self, _test: &TestCase, _pool: &DevicePoolId, _result: &TestResult) {
    }

    async fn on_run_complete(&self, _summary: &RunSummary) {}
}

/// A sink that collects results in memory.
///
/// Handy for embedding applications that post-process results themselves
/// and for tests.
#[derive(Default)]
pub struct CollectingSink {
    finished: Mutex<Vec<(TestCase, DevicePoolId, TestResult)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far.
    pub fn finished(&self) -> Vec<(TestCase, DevicePoolId, TestResult)> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultSink for CollectingSink {
    async fn on_test_finished(&self, test: &TestCase, pool: &DevicePoolId, result: &TestResult) {
        self.finished
            .lock()
            .unwrap()
            .push((test.clone(), pool.clone(), result.clone()));
    }

    async fn on_run_complete(&self, _summary: &RunSummary) {}
}
