//! The per-device runner actor.
//!
//! A [`DeviceRunner`] is a sequential executor bound to one device. It
//! accepts one [`TestBatch`] at a time from its owning pool, runs the
//! batch's tests strictly in order, and reports the whole batch back in a
//! single message. If the device misbehaves mid-batch the runner stops
//! immediately: concluded results are reported as-is and the remainder is
//! flagged unexecuted, so the pool can requeue it at zero attempt cost.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::corpus::{TestBatch, TestCase, TestStatus};
use crate::device::{DeviceHealth, DynDevice};

use super::PoolMessage;

/// Everything a device had to say about one dispatched batch.
#[derive(Debug)]
pub struct BatchOutcome {
    /// Serial of the device that ran (or dropped) the batch.
    pub serial: String,
    /// Identity of the runner that produced this outcome. A serial can be
    /// reused across disconnect/rejoin, so the pool matches on this id to
    /// drop outcomes from runners it has already replaced.
    pub runner_id: u64,
    /// Tests that produced a conclusive result, in execution order.
    pub completed: Vec<(Arc<TestCase>, TestStatus, Duration)>,
    /// Tests the device never got to. Non-empty means the device failed
    /// mid-batch and must be torn down.
    pub unexecuted: Vec<Arc<TestCase>>,
}

/// Pool-side handle to a spawned runner.
pub struct RunnerHandle {
    pub serial: String,
    pub runner_id: u64,
    batch_tx: mpsc::Sender<TestBatch>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl RunnerHandle {
    /// Hand the runner its next batch.
    ///
    /// The pool only dispatches to idle runners, so the slot is always
    /// free; a full channel indicates a bookkeeping bug upstream.
    pub fn dispatch(&self, batch: TestBatch) -> bool {
        match self.batch_tx.try_send(batch) {
            Ok(()) => true,
            Err(e) => {
                warn!("Runner {} refused batch: {}", self.serial, e);
                false
            }
        }
    }

    /// Stop the runner, abandoning any in-flight work.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the runner task to exit.
    pub async fn join(self) {
        self.cancel.cancel();
        let _ = self.join.await;
    }
}

/// Sequential test runner owning one device.
pub struct DeviceRunner {
    device: DynDevice,
    runner_id: u64,
    batch_rx: mpsc::Receiver<TestBatch>,
    pool_tx: mpsc::UnboundedSender<PoolMessage>,
    cancel: CancellationToken,
    health_interval: Duration,
    last_probe: Option<Instant>,
}

impl DeviceRunner {
    /// Spawn a runner task for the device, reporting back to `pool_tx`.
    ///
    /// `runner_id` must be unique within the pool's lifetime; it stamps
    /// every outcome so the pool can tell this runner apart from an
    /// earlier runner of the same serial.
    pub fn spawn(
        device: DynDevice,
        runner_id: u64,
        pool_tx: mpsc::UnboundedSender<PoolMessage>,
        health_interval: Duration,
    ) -> RunnerHandle {
        let serial = device.serial().to_string();
        let cancel = CancellationToken::new();
        // One slot: a runner holds at most one batch at a time.
        let (batch_tx, batch_rx) = mpsc::channel(1);

        let runner = Self {
            device,
            runner_id,
            batch_rx,
            pool_tx,
            cancel: cancel.clone(),
            health_interval,
            last_probe: None,
        };
        let join = tokio::spawn(runner.run());

        RunnerHandle {
            serial,
            runner_id,
            batch_tx,
            cancel,
            join,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                batch = self.batch_rx.recv() => match batch {
                    Some(batch) => self.run_batch(batch).await,
                    None => break,
                },
            }
        }
        debug!("Runner {} stopped", self.device.serial());
    }

    async fn run_batch(&mut self, batch: TestBatch) {
        let serial = self.device.serial().to_string();
        let mut completed = Vec::new();
        let mut tests = batch.tests.into_iter();

        while let Some(test) = tests.next() {
            match self.device_responsive().await {
                None => {
                    // Cancelled mid-probe; pool already requeued the batch.
                    return;
                }
                Some(false) => {
                    warn!("Device {} unresponsive, abandoning batch", serial);
                    let mut unexecuted = vec![test];
                    unexecuted.extend(tests);
                    self.report(serial, completed, unexecuted);
                    return;
                }
                Some(true) => {}
            }

            let execution = tokio::select! {
                _ = self.cancel.cancelled() => {
                    // Pool already requeued the batch; nothing to report.
                    return;
                }
                execution = self.device.execute(&test) => execution,
            };

            match execution {
                Ok(execution) => {
                    debug!(
                        "Device {} finished {} ({:?}) in {:?}",
                        serial, test.name, execution.status, execution.elapsed
                    );
                    completed.push((test, execution.status, execution.elapsed));
                }
                Err(e) => {
                    warn!("Device {} failed mid-batch on {}: {}", serial, test.name, e);
                    let mut unexecuted = vec![test];
                    unexecuted.extend(tests);
                    self.report(serial, completed, unexecuted);
                    return;
                }
            }
        }

        self.report(serial, completed, Vec::new());
    }

    /// Probe device health, at most once per configured interval.
    ///
    /// `None` means the runner was cancelled while the probe was pending;
    /// a hung probe must not outlive cancellation, or teardown would
    /// never finish joining this runner.
    async fn device_responsive(&mut self) -> Option<bool> {
        let due = self
            .last_probe
            .is_none_or(|at| at.elapsed() >= self.health_interval);
        if !due {
            return Some(true);
        }
        self.last_probe = Some(Instant::now());
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            health = self.device.probe() => {
                Some(matches!(health, Ok(DeviceHealth::Healthy)))
            }
        }
    }

    fn report(
        &self,
        serial: String,
        completed: Vec<(Arc<TestCase>, TestStatus, Duration)>,
        unexecuted: Vec<Arc<TestCase>>,
    ) {
        let outcome = BatchOutcome {
            serial,
            runner_id: self.runner_id,
            completed,
            unexecuted,
        };
        // The pool dropping its mailbox means the run is over; the
        // outcome is moot then.
        let _ = self.pool_tx.send(PoolMessage::BatchCompleted(outcome));
    }
}
