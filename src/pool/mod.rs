//! The pool executor actor.
//!
//! A [`PoolExecutor`] is the single-threaded owner of one pool's
//! test-to-device assignment. All pool state lives on one tokio task and
//! is only touched while processing the pool's mailbox, one message at a
//! time, in arrival order; no locks, no cross-pool mutation. Devices are
//! driven by per-device [`DeviceRunner`](runner::DeviceRunner) actors the
//! pool supervises.

pub mod progress;
pub mod runner;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::corpus::{TestBatch, TestCase, TestResult, TestStatus};
use crate::device::DynDevice;
use crate::sink::ResultSink;
use crate::strategy::retry::RetryVerdict;
use crate::strategy::{DevicePoolId, StrategySet};

use progress::PoolProgress;
use runner::{BatchOutcome, DeviceRunner, RunnerHandle};

/// Mailbox protocol for a pool executor.
pub enum PoolMessage {
    /// A device joined this pool; start scheduling onto it.
    AddDevice(DynDevice),
    /// The device with this serial left. No-op if the pool never had it.
    RemoveDevice(String),
    /// A device runner finished (or dropped) a dispatched batch.
    BatchCompleted(BatchOutcome),
    /// Abort: stop all runners and report whatever state exists.
    Terminate,
}

impl std::fmt::Debug for PoolMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolMessage::AddDevice(d) => f.debug_tuple("AddDevice").field(&d.serial()).finish(),
            PoolMessage::RemoveDevice(s) => f.debug_tuple("RemoveDevice").field(s).finish(),
            PoolMessage::BatchCompleted(o) => f.debug_tuple("BatchCompleted").field(o).finish(),
            PoolMessage::Terminate => f.write_str("Terminate"),
        }
    }
}

/// Terminal state of one pool.
#[derive(Debug, Clone)]
pub struct PoolSummary {
    /// Which pool this is.
    pub pool: DevicePoolId,
    /// Terminal result per test name.
    pub results: std::collections::HashMap<String, TestResult>,
    /// Tests that never reached a terminal state because the run aborted.
    pub unexecuted: Vec<String>,
    /// Whether the pool was aborted rather than drained.
    pub aborted: bool,
}

impl PoolSummary {
    /// Number of terminal results with the given status.
    pub fn count(&self, status: TestStatus) -> usize {
        self.results.values().filter(|r| r.status == status).count()
    }

    /// True when every test concluded and none failed.
    pub fn is_success(&self) -> bool {
        self.unexecuted.is_empty() && self.count(TestStatus::Failed) == 0
    }
}

/// A device the pool currently owns.
struct DeviceSlot {
    handle: RunnerHandle,
    /// Undispatched work assigned to this device.
    shard: VecDeque<Arc<TestCase>>,
    /// The batch currently on the device, if any.
    in_flight: Option<TestBatch>,
}

/// Single-threaded owner of one pool's scheduling state.
pub struct PoolExecutor {
    id: DevicePoolId,
    corpus: Vec<Arc<TestCase>>,
    strategies: StrategySet,
    sink: Arc<dyn ResultSink>,
    rx: mpsc::UnboundedReceiver<PoolMessage>,
    /// Handed to runners so batch outcomes come back through the mailbox.
    self_tx: mpsc::UnboundedSender<PoolMessage>,
    progress: PoolProgress,
    pending: VecDeque<Arc<TestCase>>,
    /// BTreeMap so resharding iterates devices in a deterministic order.
    devices: BTreeMap<String, DeviceSlot>,
    /// Monotonic runner id source. Serials can be reused across
    /// disconnect/rejoin; outcomes are matched on runner id, not serial.
    runner_seq: u64,
    health_interval: Duration,
}

impl PoolExecutor {
    /// Spawn the pool actor. Returns its mailbox sender and the join
    /// handle that resolves to the pool's terminal summary.
    pub fn spawn(
        id: DevicePoolId,
        corpus: Vec<Arc<TestCase>>,
        strategies: StrategySet,
        sink: Arc<dyn ResultSink>,
        health_interval: Duration,
    ) -> (mpsc::UnboundedSender<PoolMessage>, JoinHandle<PoolSummary>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let progress = PoolProgress::new(&corpus, strategies.flakiness.as_ref());
        let pending = corpus.iter().cloned().collect();

        let executor = Self {
            id,
            corpus,
            strategies,
            sink,
            rx,
            self_tx: tx.clone(),
            progress,
            pending,
            devices: BTreeMap::new(),
            runner_seq: 0,
            health_interval,
        };
        let join = tokio::spawn(executor.run());
        (tx, join)
    }

    async fn run(mut self) -> PoolSummary {
        info!("Pool {} started with {} tests", self.id, self.corpus.len());

        while let Some(msg) = self.rx.recv().await {
            match msg {
                PoolMessage::AddDevice(device) => self.on_add_device(device),
                PoolMessage::RemoveDevice(serial) => self.on_remove_device(&serial),
                PoolMessage::BatchCompleted(outcome) => self.on_batch_completed(outcome).await,
                PoolMessage::Terminate => return self.conclude(true).await,
            }
            if self.progress.is_complete() {
                break;
            }
        }
        self.conclude(false).await
    }

    fn on_add_device(&mut self, device: DynDevice) {
        let serial = device.serial().to_string();
        if self.devices.contains_key(&serial) {
            warn!("Pool {} already owns device {}, ignoring", self.id, serial);
            return;
        }
        info!("Pool {}: device {} joined", self.id, serial);

        self.runner_seq += 1;
        let handle = DeviceRunner::spawn(
            device,
            self.runner_seq,
            self.self_tx.clone(),
            self.health_interval,
        );
        self.devices.insert(
            serial,
            DeviceSlot {
                handle,
                shard: VecDeque::new(),
                in_flight: None,
            },
        );
        self.reshard();
        self.dispatch_ready();
    }

    fn on_remove_device(&mut self, serial: &str) {
        let Some(slot) = self.devices.remove(serial) else {
            debug!("Pool {}: RemoveDevice for unknown {}, no-op", self.id, serial);
            return;
        };
        info!("Pool {}: device {} left", self.id, serial);
        slot.handle.cancel();

        // The in-flight batch is abandoned wholesale: no result was
        // observed, so the tests go back to the queue front at zero
        // attempt cost.
        if let Some(batch) = slot.in_flight {
            debug!(
                "Pool {}: requeueing {} in-flight tests from {}",
                self.id,
                batch.len(),
                serial
            );
            for test in batch.tests.into_iter().rev() {
                self.progress.mark_returned(&test.name);
                self.pending.push_front(test);
            }
        }
        self.pending.extend(slot.shard);

        if self.devices.is_empty() && !self.progress.is_complete() {
            warn!(
                "Pool {} starved: {} tests waiting, no devices; staying open",
                self.id,
                self.pending.len()
            );
        }
        self.reshard();
        self.dispatch_ready();
    }

    async fn on_batch_completed(&mut self, outcome: BatchOutcome) {
        let BatchOutcome {
            serial,
            runner_id,
            completed,
            unexecuted,
        } = outcome;

        match self.devices.get_mut(&serial) {
            Some(slot) if slot.handle.runner_id == runner_id => slot.in_flight = None,
            _ => {
                // The runner was removed (and possibly replaced by a
                // rejoin of the same serial) while this outcome sat in
                // the mailbox; its batch is already requeued, and the
                // current runner's in-flight state must not be touched.
                debug!("Pool {}: stale batch outcome from {}", self.id, serial);
                return;
            }
        }

        let device_failed = !unexecuted.is_empty();
        for (test, status, elapsed) in completed {
            self.process_result(test, status, elapsed).await;
        }
        for test in unexecuted.into_iter().rev() {
            self.progress.mark_returned(&test.name);
            self.pending.push_front(test);
        }

        if device_failed {
            warn!(
                "Pool {}: device {} dropped mid-batch, tearing it down",
                self.id, serial
            );
            self.on_remove_device(&serial);
            return;
        }
        self.dispatch_ready();
    }

    /// Route one conclusive result through the retry policy.
    async fn process_result(&mut self, test: Arc<TestCase>, status: TestStatus, elapsed: Duration) {
        match status {
            TestStatus::Incomplete => {
                // Runners report unexecuted work separately; an explicit
                // Incomplete is treated the same way.
                self.progress.mark_returned(&test.name);
                self.pending.push_front(test);
            }
            TestStatus::Passed | TestStatus::Ignored => {
                let attempt = self.progress.record_attempt(&test.name);
                let result = TestResult::new(status, attempt, elapsed);
                self.finalize(&test, result).await;
            }
            TestStatus::Failed => {
                let attempt = self.progress.record_attempt(&test.name);
                let pre_seed = self.progress.pre_seed(&test.name);
                match self.strategies.retry.on_failure(&test, attempt, pre_seed) {
                    RetryVerdict::Retry => {
                        debug!(
                            "Pool {}: {} failed attempt {}, requeueing",
                            self.id, test.name, attempt
                        );
                        self.pending.push_back(test);
                    }
                    RetryVerdict::Exhaust => {
                        debug!(
                            "Pool {}: {} exhausted its budget after {} attempts",
                            self.id, test.name, attempt
                        );
                        let result = TestResult::new(TestStatus::Failed, attempt, elapsed);
                        self.finalize(&test, result).await;
                    }
                }
            }
        }
    }

    async fn finalize(&mut self, test: &Arc<TestCase>, result: TestResult) {
        if self.progress.finalize(&test.name, result.clone()) {
            self.sink.on_test_finished(test, &self.id, &result).await;
        } else {
            error!(
                "Pool {}: dropped duplicate terminal result for {}",
                self.id, test.name
            );
        }
    }

    /// Repartition all undispatched work across the current device set.
    ///
    /// Called on every membership change so new devices absorb a fair
    /// share. In-flight batches are never touched.
    fn reshard(&mut self) {
        let mut recalled: Vec<Arc<TestCase>> = self.pending.drain(..).collect();
        for slot in self.devices.values_mut() {
            recalled.extend(slot.shard.drain(..));
        }
        if self.devices.is_empty() {
            self.pending = recalled.into();
            return;
        }

        let sorting = self.strategies.sorting.clone();
        let shards = self.strategies.sharding.shard(&recalled, self.devices.len());
        for (slot, mut shard) in self.devices.values_mut().zip(shards) {
            sorting.sort(&mut shard);
            slot.shard = shard.into();
        }
    }

    /// Hand the next batch to every free device that has shard work,
    /// folding requeued pending work back into shards first.
    fn dispatch_ready(&mut self) {
        // Requeued tests (retries, abandoned batches) accumulate in
        // pending; spread them across devices not currently mid-batch,
        // ahead of their remaining shard work so retries run promptly.
        if !self.pending.is_empty() {
            let free: Vec<String> = self
                .devices
                .iter()
                .filter(|(_, slot)| slot.in_flight.is_none())
                .map(|(serial, _)| serial.clone())
                .collect();
            if !free.is_empty() {
                let pending: Vec<_> = self.pending.drain(..).collect();
                let sorting = self.strategies.sorting.clone();
                let shards = self.strategies.sharding.shard(&pending, free.len());
                for (serial, mut shard) in free.into_iter().zip(shards) {
                    sorting.sort(&mut shard);
                    if let Some(slot) = self.devices.get_mut(&serial) {
                        for test in shard.into_iter().rev() {
                            slot.shard.push_front(test);
                        }
                    }
                }
            }
        }

        let batching = self.strategies.batching.clone();
        let progress = &mut self.progress;
        for (serial, slot) in self.devices.iter_mut() {
            if slot.in_flight.is_some() || slot.shard.is_empty() {
                continue;
            }
            let cut = batching.next_batch(&mut slot.shard);
            let tests: Vec<_> = cut
                .tests
                .into_iter()
                .filter(|t| {
                    let ok = progress.mark_in_flight(&t.name, serial);
                    if !ok {
                        error!("Test {} dispatched twice, dropping duplicate", t.name);
                    }
                    ok
                })
                .collect();
            if tests.is_empty() {
                continue;
            }
            let batch = TestBatch::new(tests);
            debug!("Dispatching {} tests to {}", batch.len(), serial);
            slot.in_flight = Some(batch.clone());
            if !slot.handle.dispatch(batch) {
                // Undo: the runner refused the batch (it is shutting down).
                if let Some(batch) = slot.in_flight.take() {
                    for test in batch.tests.into_iter().rev() {
                        progress.mark_returned(&test.name);
                        slot.shard.push_front(test);
                    }
                }
            }
        }
    }

    /// Tear everything down and produce the pool's terminal summary.
    async fn conclude(mut self, aborted: bool) -> PoolSummary {
        for (_, slot) in std::mem::take(&mut self.devices) {
            slot.handle.join().await;
        }

        let unexecuted: Vec<String> = self
            .corpus
            .iter()
            .filter(|t| !self.progress.completed().contains_key(&t.name))
            .map(|t| t.name.clone())
            .collect();

        if aborted {
            warn!(
                "Pool {} aborted: {} tests never concluded",
                self.id,
                unexecuted.len()
            );
        } else {
            info!("Pool {} drained", self.id);
        }

        PoolSummary {
            pool: self.id,
            results: self.progress.into_completed(),
            unexecuted,
            aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CollectingSink, NullSink};
    use crate::strategy::batching::FixedSizeBatching;
    use crate::strategy::flakiness::{IgnoreFlakiness, PreSeedFlakiness};
    use crate::strategy::pooling::OmniPooling;
    use crate::strategy::retry::FixedQuotaRetry;
    use crate::strategy::sharding::RoundRobinSharding;
    use crate::strategy::sorting::NoSorting;
    use crate::testutil::FakeDevice;

    fn strategies(batch_size: usize, max_retries: u32) -> StrategySet {
        StrategySet {
            pooling: Arc::new(OmniPooling),
            sharding: Arc::new(RoundRobinSharding),
            flakiness: Arc::new(IgnoreFlakiness),
            sorting: Arc::new(NoSorting),
            batching: Arc::new(FixedSizeBatching::new(batch_size)),
            retry: Arc::new(FixedQuotaRetry::new(max_retries)),
        }
    }

    fn corpus(names: &[&str]) -> Vec<Arc<TestCase>> {
        names.iter().map(|n| Arc::new(TestCase::new(*n))).collect()
    }

    fn pool(
        corpus: Vec<Arc<TestCase>>,
        strategies: StrategySet,
        sink: Arc<dyn ResultSink>,
    ) -> (mpsc::UnboundedSender<PoolMessage>, JoinHandle<PoolSummary>) {
        PoolExecutor::spawn(
            DevicePoolId::new("test-pool"),
            corpus,
            strategies,
            sink,
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn retry_budget_scenario() {
        // Corpus {A, B, C}, one device, batch size 2, one retry, A fails
        // twice: batch1={A,B} (A requeued, B passes), batch2={A,C}
        // (A exhausts, C passes).
        let sink = Arc::new(CollectingSink::new());
        let (tx, join) = pool(corpus(&["A", "B", "C"]), strategies(2, 1), sink.clone());

        let device = Arc::new(FakeDevice::passing("dev-1").fail_times("A", 2));
        tx.send(PoolMessage::AddDevice(device.clone())).unwrap();

        let summary = join.await.unwrap();
        assert!(!summary.aborted);
        assert!(summary.unexecuted.is_empty());
        assert_eq!(summary.results["A"].status, TestStatus::Failed);
        assert_eq!(summary.results["A"].attempt, 2);
        assert_eq!(summary.results["B"].status, TestStatus::Passed);
        assert_eq!(summary.results["C"].status, TestStatus::Passed);

        // Batch order on the device: {A, B} then {A, C}.
        assert_eq!(device.executed(), ["A", "B", "A", "C"]);

        // Terminal results reach the sink exactly once per test.
        let finished = sink.finished();
        assert_eq!(finished.len(), 3);
    }

    #[tokio::test]
    async fn two_devices_share_the_corpus() {
        let (tx, join) = pool(
            corpus(&["t0", "t1", "t2", "t3"]),
            strategies(2, 1),
            Arc::new(NullSink),
        );

        let d1 = Arc::new(FakeDevice::passing("dev-1"));
        let d2 = Arc::new(FakeDevice::passing("dev-2"));
        tx.send(PoolMessage::AddDevice(d1.clone())).unwrap();
        tx.send(PoolMessage::AddDevice(d2.clone())).unwrap();

        let summary = join.await.unwrap();
        assert_eq!(summary.count(TestStatus::Passed), 4);

        // Every test ran on exactly one device.
        let mut all = d1.executed();
        all.extend(d2.executed());
        all.sort();
        assert_eq!(all, ["t0", "t1", "t2", "t3"]);
        assert!(!d1.executed().is_empty());
        assert!(!d2.executed().is_empty());
    }

    #[tokio::test]
    async fn disconnect_requeues_in_flight_at_zero_cost() {
        let (tx, mut join) = pool(corpus(&["a", "b"]), strategies(2, 1), Arc::new(NullSink));

        // The first device hangs on "a"; its whole batch is in flight.
        let d1 = Arc::new(FakeDevice::passing("dev-1").hanging_on("a"));
        tx.send(PoolMessage::AddDevice(d1)).unwrap();
        tokio::task::yield_now().await;
        tx.send(PoolMessage::RemoveDevice("dev-1".into())).unwrap();

        // No result ever arrived and no device is left: the pool stays
        // open awaiting a late device.
        let still_open = tokio::time::timeout(Duration::from_millis(50), &mut join).await;
        assert!(still_open.is_err());

        let d2 = Arc::new(FakeDevice::passing("dev-2"));
        tx.send(PoolMessage::AddDevice(d2.clone())).unwrap();

        let summary = join.await.unwrap();
        assert_eq!(summary.count(TestStatus::Passed), 2);
        // The abandoned attempt cost nothing: both finished on attempt 1.
        assert_eq!(summary.results["a"].attempt, 1);
        assert_eq!(summary.results["b"].attempt, 1);
        assert_eq!(d2.executed(), ["a", "b"]);
    }

    #[tokio::test]
    async fn stale_outcome_from_replaced_runner_is_dropped() {
        let tests = corpus(&["a"]);
        let (tx, join) = pool(tests.clone(), strategies(1, 0), Arc::new(NullSink));

        // The first runner of dev-1 hangs holding {a}; it is removed, and
        // the same serial rejoins with a fresh runner that also holds {a}.
        let hung = Arc::new(FakeDevice::passing("dev-1").hanging_on("a"));
        tx.send(PoolMessage::AddDevice(hung)).unwrap();
        tokio::task::yield_now().await;
        tx.send(PoolMessage::RemoveDevice("dev-1".into())).unwrap();
        let rejoined = Arc::new(FakeDevice::passing("dev-1").hanging_on("a"));
        tx.send(PoolMessage::AddDevice(rejoined)).unwrap();

        // The dead runner's failure arrives late. Matched by serial alone
        // it would be charged against the live runner's in-flight attempt
        // and, with no retries, finalize "a" as failed.
        tx.send(PoolMessage::BatchCompleted(BatchOutcome {
            serial: "dev-1".into(),
            runner_id: 1,
            completed: vec![(tests[0].clone(), TestStatus::Failed, Duration::from_millis(1))],
            unexecuted: Vec::new(),
        }))
        .unwrap();

        // Swap in a healthy device; "a" must still be runnable at zero cost.
        tx.send(PoolMessage::RemoveDevice("dev-1".into())).unwrap();
        tx.send(PoolMessage::AddDevice(Arc::new(FakeDevice::passing("dev-2"))))
            .unwrap();

        let summary = join.await.unwrap();
        assert_eq!(summary.results["a"].status, TestStatus::Passed);
        assert_eq!(summary.results["a"].attempt, 1);
    }

    #[tokio::test]
    async fn remove_unknown_device_is_a_noop() {
        let (tx, join) = pool(corpus(&["a"]), strategies(2, 1), Arc::new(NullSink));

        tx.send(PoolMessage::RemoveDevice("ghost".into())).unwrap();
        tx.send(PoolMessage::RemoveDevice("ghost".into())).unwrap();
        tx.send(PoolMessage::AddDevice(Arc::new(FakeDevice::passing("dev-1"))))
            .unwrap();

        let summary = join.await.unwrap();
        assert!(summary.is_success());
    }

    #[tokio::test]
    async fn device_fault_mid_batch_keeps_concluded_results() {
        // "b" trips a communication fault: "a" concluded and is kept,
        // "b" and "c" are requeued at zero cost, the device is dropped.
        let (tx, mut join) = pool(corpus(&["a", "b", "c"]), strategies(3, 0), Arc::new(NullSink));

        let d1 = Arc::new(FakeDevice::passing("dev-1").with_device_error_on("b"));
        tx.send(PoolMessage::AddDevice(d1.clone())).unwrap();

        let still_open = tokio::time::timeout(Duration::from_millis(50), &mut join).await;
        assert!(still_open.is_err());

        let d2 = Arc::new(FakeDevice::passing("dev-2"));
        tx.send(PoolMessage::AddDevice(d2.clone())).unwrap();

        let summary = join.await.unwrap();
        assert_eq!(summary.count(TestStatus::Passed), 3);
        assert_eq!(summary.results["a"].attempt, 1);
        // Only the unconcluded tests reran, on the healthy device.
        assert_eq!(d2.executed(), ["b", "c"]);
    }

    #[tokio::test]
    async fn flakiness_pre_seed_extends_the_budget() {
        let sink = Arc::new(CollectingSink::new());
        let mut set = strategies(2, 0);
        set.flakiness = Arc::new(PreSeedFlakiness::new(2));

        let tests = vec![
            Arc::new(TestCase::new("shaky").flaky()),
            Arc::new(TestCase::new("broken")),
        ];
        let (tx, join) = pool(tests, set, sink.clone());

        // "shaky" needs three attempts; "broken" fails its only one.
        let device = Arc::new(
            FakeDevice::passing("dev-1")
                .fail_times("shaky", 2)
                .always_failing("broken"),
        );
        tx.send(PoolMessage::AddDevice(device)).unwrap();

        let summary = join.await.unwrap();
        assert_eq!(summary.results["shaky"].status, TestStatus::Passed);
        assert_eq!(summary.results["shaky"].attempt, 3);
        assert_eq!(summary.results["broken"].status, TestStatus::Failed);
        assert_eq!(summary.results["broken"].attempt, 1);
    }

    #[tokio::test]
    async fn ignored_tests_are_terminal() {
        let (tx, join) = pool(corpus(&["skipped", "run"]), strategies(2, 3), Arc::new(NullSink));

        let device = Arc::new(FakeDevice::passing("dev-1").ignoring("skipped"));
        tx.send(PoolMessage::AddDevice(device)).unwrap();

        let summary = join.await.unwrap();
        assert_eq!(summary.results["skipped"].status, TestStatus::Ignored);
        assert_eq!(summary.results["run"].status, TestStatus::Passed);
        assert!(summary.is_success());
    }

    #[tokio::test]
    async fn terminate_reports_outstanding_work_as_unexecuted() {
        let (tx, join) = pool(corpus(&["a", "b"]), strategies(1, 1), Arc::new(NullSink));

        let device = Arc::new(FakeDevice::passing("dev-1").hanging_on("a"));
        tx.send(PoolMessage::AddDevice(device)).unwrap();
        tokio::task::yield_now().await;
        tx.send(PoolMessage::Terminate).unwrap();

        let summary = join.await.unwrap();
        assert!(summary.aborted);
        assert!(summary.results.is_empty());
        let mut unexecuted = summary.unexecuted.clone();
        unexecuted.sort();
        assert_eq!(unexecuted, ["a", "b"]);
    }
}
