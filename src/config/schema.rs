//! Configuration schema definitions for fleetrun.
//!
//! This module defines all configuration types that can be deserialized
//! from TOML configuration files. Strategy selection uses serde tagged
//! enums, one per pipeline stage.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── FleetConfig            - Core settings (retries, batching, timeouts)
//! └── StrategyConfig         - One tagged enum per pipeline stage
//!     ├── pooling            - omni | per-device
//!     ├── sharding           - round-robin | even-chunks
//!     ├── flakiness          - ignore | pre-seed
//!     ├── sorting            - no-sort | slowest-first
//!     ├── batching           - fixed-size | duration-capped
//!     └── retry              - fixed-quota | no-retry
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::strategy::batching::{BatchingStrategy, DurationCappedBatching, FixedSizeBatching};
use crate::strategy::flakiness::{FlakinessStrategy, IgnoreFlakiness, PreSeedFlakiness};
use crate::strategy::pooling::{OmniPooling, PerDevicePooling, PoolingStrategy};
use crate::strategy::retry::{FixedQuotaRetry, NoRetry, RetryPolicy};
use crate::strategy::sharding::{EvenChunksSharding, RoundRobinSharding, ShardingStrategy};
use crate::strategy::sorting::{NoSorting, SlowestFirstSorting, SortingStrategy};

/// Root configuration structure for fleetrun.
///
/// # TOML Structure
///
/// ```toml
/// [fleet]
/// max_retries_per_test = 1
/// batch_size_limit = 2
///
/// [strategy.sharding]
/// type = "round-robin"
///
/// [strategy.flakiness]
/// type = "pre-seed"
/// attempts = 1
/// ```
///
/// # Example
///
/// ```
/// use fleetrun::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [fleet]
///     batch_size_limit = 4
///
///     [strategy.sorting]
///     type = "slowest-first"
/// "#).unwrap();
/// assert_eq!(config.fleet.batch_size_limit, 4);
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Core execution settings (retries, batching, timeouts).
    #[serde(default)]
    pub fleet: FleetConfig,

    /// Strategy pipeline selection (optional, every stage has a default).
    #[serde(default)]
    pub strategy: StrategyConfig,
}

/// Core fleet execution settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `max_retries_per_test` | 3 |
/// | `batch_size_limit` | 10 |
/// | `pool_timeout_ms` | 900_000 (15 minutes) |
/// | `device_health_poll_interval_ms` | 1_000 |
/// | `startup_grace_ms` | 10_000 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FleetConfig {
    /// Number of times a failed test may be retried within a pool.
    ///
    /// Flaky-flagged tests may receive pre-seeded attempts on top of this
    /// quota. Set to 0 to finalize every failure immediately.
    ///
    /// Default: 3
    #[serde(default = "default_max_retries")]
    pub max_retries_per_test: u32,

    /// Maximum number of tests dispatched to a device in one batch.
    ///
    /// Smaller batches lose less work when a device drops mid-run, at the
    /// cost of more per-dispatch overhead.
    ///
    /// Default: 10
    #[serde(default = "default_batch_size")]
    pub batch_size_limit: usize,

    /// Overall run timeout in milliseconds.
    ///
    /// If the fleet has not drained every pool by then, the run aborts
    /// and partial results are surfaced to the caller.
    ///
    /// Default: 900_000 (15 minutes)
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_ms: u64,

    /// Minimum interval between device health probes in milliseconds.
    ///
    /// A device runner probes its device between tests, at most this
    /// often.
    ///
    /// Default: 1_000
    #[serde(default = "default_health_poll_interval")]
    pub device_health_poll_interval_ms: u64,

    /// How long to wait for the first device before declaring the run
    /// dead on arrival, in milliseconds.
    ///
    /// Default: 10_000
    #[serde(default = "default_startup_grace")]
    pub startup_grace_ms: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_retries_per_test: default_max_retries(),
            batch_size_limit: default_batch_size(),
            pool_timeout_ms: default_pool_timeout(),
            device_health_poll_interval_ms: default_health_poll_interval(),
            startup_grace_ms: default_startup_grace(),
        }
    }
}

impl FleetConfig {
    /// Overall run timeout as a [`Duration`].
    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }

    /// Health probe interval as a [`Duration`].
    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.device_health_poll_interval_ms)
    }

    /// Startup grace period as a [`Duration`].
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_batch_size() -> usize {
    10
}

fn default_pool_timeout() -> u64 {
    900_000
}

fn default_health_poll_interval() -> u64 {
    1_000
}

fn default_startup_grace() -> u64 {
    10_000
}

/// Strategy selection for every pipeline stage.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub pooling: PoolingConfig,

    #[serde(default)]
    pub sharding: ShardingConfig,

    #[serde(default)]
    pub flakiness: FlakinessConfig,

    #[serde(default)]
    pub sorting: SortingConfig,

    #[serde(default)]
    pub batching: BatchingConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Device-to-pool association strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PoolingConfig {
    /// One shared pool for the whole fleet.
    #[default]
    Omni,
    /// One pool per device serial; each runs the full corpus.
    PerDevice,
}

impl PoolingConfig {
    pub fn build(&self) -> Arc<dyn PoolingStrategy> {
        match self {
            PoolingConfig::Omni => Arc::new(OmniPooling),
            PoolingConfig::PerDevice => Arc::new(PerDevicePooling),
        }
    }
}

/// Pending-test partitioning strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ShardingConfig {
    /// Deal tests across devices one at a time.
    #[default]
    RoundRobin,
    /// Contiguous near-equal chunks, preserving corpus order.
    EvenChunks,
}

impl ShardingConfig {
    pub fn build(&self) -> Arc<dyn ShardingStrategy> {
        match self {
            ShardingConfig::RoundRobin => Arc::new(RoundRobinSharding),
            ShardingConfig::EvenChunks => Arc::new(EvenChunksSharding),
        }
    }
}

/// Pre-seeded attempt allowance for flaky-flagged tests.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FlakinessConfig {
    /// No pre-seeding.
    #[default]
    Ignore,
    /// Grant `attempts` extra attempts to every flaky-flagged test.
    PreSeed {
        #[serde(default = "default_pre_seed_attempts")]
        attempts: u32,
    },
}

fn default_pre_seed_attempts() -> u32 {
    1
}

impl FlakinessConfig {
    pub fn build(&self) -> Arc<dyn FlakinessStrategy> {
        match self {
            FlakinessConfig::Ignore => Arc::new(IgnoreFlakiness),
            FlakinessConfig::PreSeed { attempts } => Arc::new(PreSeedFlakiness::new(*attempts)),
        }
    }
}

/// Shard ordering strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SortingConfig {
    /// Keep insertion order.
    #[default]
    NoSort,
    /// Longest expected duration first.
    SlowestFirst,
}

impl SortingConfig {
    pub fn build(&self) -> Arc<dyn SortingStrategy> {
        match self {
            SortingConfig::NoSort => Arc::new(NoSorting),
            SortingConfig::SlowestFirst => Arc::new(SlowestFirstSorting),
        }
    }
}

/// Batch cutting strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BatchingConfig {
    /// Cap batches at `fleet.batch_size_limit` tests.
    #[default]
    FixedSize,
    /// Cap batches by summed expected duration; the count cap from
    /// `fleet.batch_size_limit` still applies.
    DurationCapped { max_millis: u64 },
}

impl BatchingConfig {
    pub fn build(&self, fleet: &FleetConfig) -> Arc<dyn BatchingStrategy> {
        match self {
            BatchingConfig::FixedSize => Arc::new(FixedSizeBatching::new(fleet.batch_size_limit)),
            BatchingConfig::DurationCapped { max_millis } => Arc::new(DurationCappedBatching::new(
                Duration::from_millis(*max_millis),
                fleet.batch_size_limit,
            )),
        }
    }
}

/// Retry policy selection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RetryConfig {
    /// Retry failures up to `fleet.max_retries_per_test` times.
    #[default]
    FixedQuota,
    /// Every failure is final (flakiness pre-seed still applies).
    NoRetry,
}

impl RetryConfig {
    pub fn build(&self, fleet: &FleetConfig) -> Arc<dyn RetryPolicy> {
        match self {
            RetryConfig::FixedQuota => Arc::new(FixedQuotaRetry::new(fleet.max_retries_per_test)),
            RetryConfig::NoRetry => Arc::new(NoRetry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_str;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = load_config_str("").unwrap();
        assert_eq!(config.fleet.max_retries_per_test, 3);
        assert_eq!(config.fleet.batch_size_limit, 10);
        assert_eq!(config.fleet.startup_grace_ms, 10_000);
        assert!(matches!(config.strategy.pooling, PoolingConfig::Omni));
        assert!(matches!(config.strategy.batching, BatchingConfig::FixedSize));
    }

    #[test]
    fn full_config_parses() {
        let config = load_config_str(
            r#"
            [fleet]
            max_retries_per_test = 1
            batch_size_limit = 2
            pool_timeout_ms = 60000
            device_health_poll_interval_ms = 500
            startup_grace_ms = 2000

            [strategy.pooling]
            type = "per-device"

            [strategy.sharding]
            type = "even-chunks"

            [strategy.flakiness]
            type = "pre-seed"
            attempts = 2

            [strategy.sorting]
            type = "slowest-first"

            [strategy.batching]
            type = "duration-capped"
            max_millis = 30000

            [strategy.retry]
            type = "no-retry"
        "#,
        )
        .unwrap();

        assert_eq!(config.fleet.pool_timeout(), Duration::from_secs(60));
        assert!(matches!(config.strategy.pooling, PoolingConfig::PerDevice));
        assert!(matches!(
            config.strategy.flakiness,
            FlakinessConfig::PreSeed { attempts: 2 }
        ));
        assert!(matches!(
            config.strategy.batching,
            BatchingConfig::DurationCapped { max_millis: 30000 }
        ));
        assert!(matches!(config.strategy.retry, RetryConfig::NoRetry));
    }

    #[test]
    fn pre_seed_attempts_default() {
        let config = load_config_str(
            r#"
            [strategy.flakiness]
            type = "pre-seed"
        "#,
        )
        .unwrap();
        assert!(matches!(
            config.strategy.flakiness,
            FlakinessConfig::PreSeed { attempts: 1 }
        ));
    }

    #[test]
    fn unknown_strategy_type_is_rejected() {
        let err = load_config_str(
            r#"
            [strategy.sharding]
            type = "hash-ring"
        "#,
        );
        assert!(err.is_err());
    }
}
