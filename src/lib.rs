//! fleetrun: a test orchestration engine for dynamic device fleets.
//!
//! This crate distributes a fixed corpus of test cases across a changing
//! fleet of execution targets (phones, boards, emulators) and guarantees
//! every test reaches a terminal result even as devices connect,
//! disconnect, or fail mid-run.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Provider**: streams device connect/disconnect events into the run
//! - **Strategies**: pluggable pooling, sharding, flakiness, sorting,
//!   batching, and retry policies
//! - **Pool executor**: actor owning one pool's scheduling state, one
//!   device runner actor per device
//! - **Scheduler**: routes fleet events to pools and joins their
//!   terminal states
//! - **Sink**: receives each terminal result exactly once
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetrun::config::Config;
//! use fleetrun::corpus::TestCase;
//! use fleetrun::provider::StaticProvider;
//! use fleetrun::scheduler::Scheduler;
//! use fleetrun::sink::CollectingSink;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let corpus = vec![TestCase::new("suite.Login#happy_path")];
//!     let provider = Arc::new(StaticProvider::new(vec![/* devices */]));
//!     let sink = Arc::new(CollectingSink::new());
//!     let scheduler = Scheduler::new(provider, Config::default(), corpus, sink);
//!     let summary = scheduler.execute().await?;
//!     println!("passed: {}", summary.count(fleetrun::corpus::TestStatus::Passed));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod corpus;
pub mod device;
pub mod pool;
pub mod provider;
pub mod scheduler;
pub mod sink;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use config::{Config, load_config, load_config_str};
pub use corpus::{TestBatch, TestCase, TestResult, TestStatus};
pub use device::{Device, DeviceHealth};
pub use provider::{DeviceEvent, DeviceProvider};
pub use scheduler::{ExecutionError, RunSummary, Scheduler};
pub use sink::ResultSink;
pub use strategy::{DevicePoolId, StrategySet};
