//! Cutting shards into bounded dispatch batches.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::corpus::{TestBatch, TestCase};

/// Groups the front of a shard into the next batch for one device
/// invocation.
///
/// Bounded batches cap how much work a device failure mid-run can lose:
/// an abandoned batch is requeued wholesale.
pub trait BatchingStrategy: Send + Sync {
    /// Remove up to one batch worth of tests from the front of the shard.
    ///
    /// Returns an empty batch iff the shard is empty.
    fn next_batch(&self, shard: &mut VecDeque<Arc<TestCase>>) -> TestBatch;
}

/// Caps batches at a fixed test count.
pub struct FixedSizeBatching {
    limit: usize,
}

impl FixedSizeBatching {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }
}

impl BatchingStrategy for FixedSizeBatching {
    fn next_batch(&self, shard: &mut VecDeque<Arc<TestCase>>) -> TestBatch {
        let take = self.limit.min(shard.len());
        TestBatch::new(shard.drain(..take).collect())
    }
}

/// Caps batches by estimated duration as well as count.
///
/// Tests are taken from the shard front until the summed expected
/// duration would exceed the cap. A batch always contains at least one
/// test, so a single over-budget test still gets dispatched. Tests
/// without a duration hint count as zero.
pub struct DurationCappedBatching {
    max_duration: Duration,
    count_limit: usize,
}

impl DurationCappedBatching {
    pub fn new(max_duration: Duration, count_limit: usize) -> Self {
        Self {
            max_duration,
            count_limit: count_limit.max(1),
        }
    }
}

impl BatchingStrategy for DurationCappedBatching {
    fn next_batch(&self, shard: &mut VecDeque<Arc<TestCase>>) -> TestBatch {
        let mut tests = Vec::new();
        let mut budget = Duration::ZERO;

        while let Some(next) = shard.front() {
            let cost = next.expected_duration.unwrap_or(Duration::ZERO);
            let over_budget = !tests.is_empty() && budget + cost > self.max_duration;
            if over_budget || tests.len() >= self.count_limit {
                break;
            }
            budget += cost;
            tests.push(shard.pop_front().unwrap());
        }
        TestBatch::new(tests)
    }
}
