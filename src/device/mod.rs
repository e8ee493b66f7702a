//! Device traits and health model.
//!
//! A [`Device`] is an execution target a batch of tests can run against.
//! The engine never talks to hardware directly: how a command physically
//! reaches a device (adb, ssh, an emulator control socket) is behind this
//! trait, supplied by the embedding application together with its
//! [`DeviceProvider`](crate::provider::DeviceProvider).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::corpus::{TestCase, TestStatus};

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur while driving a device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Communication fault: {0}")]
    Communication(String),

    #[error("Device did not respond to health probe")]
    Unresponsive,

    #[error("Device connection lost")]
    Lost,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device-specific error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Health state of a device as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHealth {
    /// Device answers probes and can run tests.
    Healthy,
    /// Device stopped answering probes; in-flight work must be abandoned.
    Unresponsive,
    /// Device is gone; its runner is being torn down.
    Disconnected,
}

/// Outcome of running one test on a device.
#[derive(Debug, Clone)]
pub struct TestExecution {
    /// What the framework on the device reported.
    pub status: TestStatus,
    /// Wall-clock time the test took on the device.
    pub elapsed: Duration,
}

/// An execution target for test batches.
///
/// Implementations are exclusively owned by one device runner at a time;
/// the engine serializes all calls, so no interior synchronization is
/// required beyond `Send + Sync`.
#[async_trait]
pub trait Device: Send + Sync {
    /// Stable identity for this device (serial number or handle).
    fn serial(&self) -> &str;

    /// Run a single test to completion and report its outcome.
    ///
    /// An `Err` means the device itself misbehaved (communication fault,
    /// crash of the harness), not that the test failed; test failures are
    /// ordinary `Ok` results with [`TestStatus::Failed`].
    async fn execute(&self, test: &TestCase) -> DeviceResult<TestExecution>;

    /// Probe whether the device still responds.
    async fn probe(&self) -> DeviceResult<DeviceHealth>;
}

/// A shared, type-erased device handle.
pub type DynDevice = Arc<dyn Device>;
