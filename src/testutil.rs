//! Shared fixtures for unit tests: a scriptable in-process device.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::corpus::{TestCase, TestStatus};
use crate::device::{Device, DeviceError, DeviceHealth, DeviceResult, TestExecution};

/// What a [`FakeDevice`] does when asked to run a given test.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Pass,
    Fail,
    Ignore,
    /// Fail the device itself (communication fault), not the test.
    DeviceError,
    /// Never return; only a cancelled runner gets past this.
    Hang,
}

/// An in-process device with per-test scripted behavior.
///
/// Unscripted tests pass. Scripted behaviors for a test are consumed
/// front to back, then fall back to the default, so "fail twice, then
/// pass" is `fail_times(name, 2)`.
pub struct FakeDevice {
    serial: String,
    script: Mutex<HashMap<String, VecDeque<Behavior>>>,
    healthy: AtomicBool,
    probe_hangs: AtomicBool,
    executed: Mutex<Vec<String>>,
}

impl FakeDevice {
    /// A healthy device that passes everything unscripted.
    pub fn passing(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            script: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            probe_hangs: AtomicBool::new(false),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Script the next `n` attempts of `test` to fail.
    pub fn fail_times(self, test: &str, n: usize) -> Self {
        self.push_behaviors(test, vec![Behavior::Fail; n]);
        self
    }

    /// Script every attempt of `test` to fail.
    pub fn always_failing(self, test: &str) -> Self {
        // More than any sane retry budget.
        self.push_behaviors(test, vec![Behavior::Fail; 1000]);
        self
    }

    /// Script `test` to be ignored by the framework.
    pub fn ignoring(self, test: &str) -> Self {
        self.push_behaviors(test, vec![Behavior::Ignore]);
        self
    }

    /// Script a communication fault when `test` is attempted.
    pub fn with_device_error_on(self, test: &str) -> Self {
        self.push_behaviors(test, vec![Behavior::DeviceError]);
        self
    }

    /// Script `test` to hang until the runner is cancelled.
    pub fn hanging_on(self, test: &str) -> Self {
        self.push_behaviors(test, vec![Behavior::Hang]);
        self
    }

    fn push_behaviors(&self, test: &str, behaviors: Vec<Behavior>) {
        self.script
            .lock()
            .unwrap()
            .entry(test.to_string())
            .or_default()
            .extend(behaviors);
    }

    /// Make every health probe hang until the caller is cancelled.
    pub fn with_hanging_probe(self) -> Self {
        self.probe_hangs.store(true, Ordering::SeqCst);
        self
    }

    /// Flip the health probe outcome.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Names of tests executed on this device, in order. Hung and
    /// device-faulted attempts are recorded too.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Device for FakeDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    async fn execute(&self, test: &TestCase) -> DeviceResult<TestExecution> {
        self.executed.lock().unwrap().push(test.name.clone());
        let behavior = self
            .script
            .lock()
            .unwrap()
            .get_mut(&test.name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Behavior::Pass);

        let status = match behavior {
            Behavior::Pass => TestStatus::Passed,
            Behavior::Fail => TestStatus::Failed,
            Behavior::Ignore => TestStatus::Ignored,
            Behavior::DeviceError => {
                return Err(DeviceError::Communication("connection reset".into()));
            }
            Behavior::Hang => std::future::pending().await,
        };
        Ok(TestExecution {
            status,
            elapsed: Duration::from_millis(1),
        })
    }

    async fn probe(&self) -> DeviceResult<DeviceHealth> {
        if self.probe_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.healthy.load(Ordering::SeqCst) {
            Ok(DeviceHealth::Healthy)
        } else {
            Ok(DeviceHealth::Unresponsive)
        }
    }
}
