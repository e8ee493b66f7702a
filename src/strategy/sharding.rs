//! Partitioning pending tests across a pool's devices.

use std::sync::Arc;

use crate::corpus::TestCase;

/// Deterministically partitions the pool's pending tests across the
/// currently known devices.
///
/// Re-invoked whenever device membership changes, so newly joined devices
/// absorb a fair share of the remaining pending work. Returns exactly
/// `device_count` shards (some possibly empty); every input test appears
/// in exactly one shard.
pub trait ShardingStrategy: Send + Sync {
    fn shard(&self, pending: &[Arc<TestCase>], device_count: usize) -> Vec<Vec<Arc<TestCase>>>;
}

/// Deals tests out one at a time, like cards.
///
/// Keeps shard sizes within one of each other and interleaves the corpus,
/// which spreads slow suites across devices when the corpus is grouped by
/// suite.
pub struct RoundRobinSharding;

impl ShardingStrategy for RoundRobinSharding {
    fn shard(&self, pending: &[Arc<TestCase>], device_count: usize) -> Vec<Vec<Arc<TestCase>>> {
        let count = device_count.max(1);
        let mut shards: Vec<Vec<Arc<TestCase>>> = (0..count).map(|_| Vec::new()).collect();
        for (i, test) in pending.iter().enumerate() {
            shards[i % count].push(test.clone());
        }
        shards
    }
}

/// Splits the corpus into contiguous near-equal chunks.
///
/// Preserves corpus order within each shard, which matters when earlier
/// tests prepare fixtures later ones reuse.
pub struct EvenChunksSharding;

impl ShardingStrategy for EvenChunksSharding {
    fn shard(&self, pending: &[Arc<TestCase>], device_count: usize) -> Vec<Vec<Arc<TestCase>>> {
        let count = device_count.max(1);
        let base = pending.len() / count;
        let remainder = pending.len() % count;

        let mut shards = Vec::with_capacity(count);
        let mut offset = 0;
        for i in 0..count {
            let take = base + usize::from(i < remainder);
            shards.push(pending[offset..offset + take].to_vec());
            offset += take;
        }
        shards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(n: usize) -> Vec<Arc<TestCase>> {
        (0..n)
            .map(|i| Arc::new(TestCase::new(format!("test_{i}"))))
            .collect()
    }

    #[test]
    fn round_robin_interleaves() {
        let tests = corpus(5);
        let shards = RoundRobinSharding.shard(&tests, 2);
        assert_eq!(shards.len(), 2);
        let names: Vec<_> = shards[0].iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["test_0", "test_2", "test_4"]);
        assert_eq!(shards[1].len(), 2);
    }

    #[test]
    fn even_chunks_preserve_order() {
        let tests = corpus(7);
        let shards = EvenChunksSharding.shard(&tests, 3);
        assert_eq!(shards.iter().map(Vec::len).collect::<Vec<_>>(), [3, 2, 2]);
        assert_eq!(shards[0][0].name, "test_0");
        assert_eq!(shards[2][1].name, "test_6");
    }

    #[test]
    fn every_test_lands_in_exactly_one_shard() {
        let tests = corpus(11);
        for shards in [
            RoundRobinSharding.shard(&tests, 4),
            EvenChunksSharding.shard(&tests, 4),
        ] {
            let total: usize = shards.iter().map(Vec::len).sum();
            assert_eq!(total, 11);
        }
    }

    #[test]
    fn zero_devices_clamps_to_one_shard() {
        let tests = corpus(3);
        let shards = RoundRobinSharding.shard(&tests, 0);
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].len(), 3);
    }
}
