//! Pluggable scheduling strategies.
//!
//! The pipeline a pool applies to its pending work, in order:
//!
//! 1. Pooling:   group devices into pools
//! 2. Sharding:  split a pool's pending tests across its devices
//! 3. Flakiness: pre-seed extra attempts for tests known to be flaky
//! 4. Sorting:   order each shard to shrink pool makespan
//! 5. Batching:  cut shards into bounded per-dispatch batches
//! 6. Retry:     decide requeue vs finalize after each result
//!
//! Each stage is a small trait with a closed set of implementations
//! selected by configuration.

pub mod batching;
pub mod flakiness;
pub mod pooling;
pub mod retry;
pub mod sharding;
pub mod sorting;

use std::sync::Arc;

pub use batching::BatchingStrategy;
pub use flakiness::FlakinessStrategy;
pub use pooling::{DevicePoolId, PoolingStrategy};
pub use retry::RetryPolicy;
pub use sharding::ShardingStrategy;
pub use sorting::SortingStrategy;

use crate::config::Config;

/// The full strategy pipeline for one run, shared across pools.
#[derive(Clone)]
pub struct StrategySet {
    pub pooling: Arc<dyn PoolingStrategy>,
    pub sharding: Arc<dyn ShardingStrategy>,
    pub flakiness: Arc<dyn FlakinessStrategy>,
    pub sorting: Arc<dyn SortingStrategy>,
    pub batching: Arc<dyn BatchingStrategy>,
    pub retry: Arc<dyn RetryPolicy>,
}

impl StrategySet {
    /// Build the pipeline selected by the configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            pooling: config.strategy.pooling.build(),
            sharding: config.strategy.sharding.build(),
            flakiness: config.strategy.flakiness.build(),
            sorting: config.strategy.sorting.build(),
            batching: config.strategy.batching.build(&config.fleet),
            retry: config.strategy.retry.build(&config.fleet),
        }
    }
}
