//! Shard ordering.

use std::cmp::Reverse;
use std::sync::Arc;

use crate::corpus::TestCase;

/// Orders a shard to minimize the device's expected completion time.
pub trait SortingStrategy: Send + Sync {
    fn sort(&self, shard: &mut [Arc<TestCase>]);
}

/// Keeps insertion order.
pub struct NoSorting;

impl SortingStrategy for NoSorting {
    fn sort(&self, _shard: &mut [Arc<TestCase>]) {}
}

/// Longest expected duration first.
///
/// Running slow tests early shrinks pool makespan: a slow test started
/// last would leave the rest of the pool idle waiting for it. Tests
/// without a duration hint sort after tests with one.
pub struct SlowestFirstSorting;

impl SortingStrategy for SlowestFirstSorting {
    fn sort(&self, shard: &mut [Arc<TestCase>]) {
        shard.sort_by_key(|t| Reverse(t.expected_duration));
    }
}
