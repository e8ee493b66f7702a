//! Top-level run orchestration.
//!
//! The scheduling pipeline, applied in order:
//!
//! 1. Pooling:   group devices into pools
//! 2. Sharding:  split each pool's pending tests across its devices
//! 3. Flakiness: pre-seed attempts for tests known to be flaky
//! 4. Sorting:   order each shard
//! 5. Batching:  cut shards into bounded batches
//! 6. Retries:   requeue failures the flakiness pre-seed didn't cover
//!
//! The [`Scheduler`] owns none of that logic itself; it consumes the
//! device provider's event stream on a router task, creates pool actors
//! on demand, and waits for every pool to reach its terminal state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::corpus::{TestCase, TestStatus};
use crate::pool::{PoolExecutor, PoolMessage, PoolSummary};
use crate::provider::{DeviceEvent, DeviceProvider, ProviderError};
use crate::sink::ResultSink;
use crate::strategy::{DevicePoolId, StrategySet};

/// Fallback liveness re-check interval for the quiescence confirmation,
/// guarding against device events racing the all-pools-done observation.
const LIVENESS_RECHECK: Duration = Duration::from_millis(100);

/// Fatal conditions a run can end with.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("No devices became available within the startup grace period")]
    NoDevicesAvailable,

    #[error("Run timed out with work outstanding ({} tests unexecuted)", .summary.unexecuted())]
    Timeout {
        /// Partial state: every result that concluded before the abort.
        summary: RunSummary,
    },

    #[error("Device provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Aggregate outcome of a whole run, across pools.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Terminal state of each pool, in completion order.
    pub pools: Vec<PoolSummary>,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Whether the run was aborted by the overall timeout.
    pub aborted: bool,
}

impl RunSummary {
    /// Total terminal results with the given status, across pools.
    pub fn count(&self, status: TestStatus) -> usize {
        self.pools.iter().map(|p| p.count(status)).sum()
    }

    /// Tests that never concluded because the run aborted.
    pub fn unexecuted(&self) -> usize {
        self.pools.iter().map(|p| p.unexecuted.len()).sum()
    }

    /// True when every pool drained cleanly with no failures.
    pub fn is_success(&self) -> bool {
        !self.aborted && self.pools.iter().all(PoolSummary::is_success)
    }
}

/// Shared registry of live pool mailboxes.
///
/// Written by the router task as pools are born; read by the scheduler
/// to broadcast `Terminate` on abort. Lock scope is a single map access.
type PoolRegistry = Arc<Mutex<HashMap<DevicePoolId, mpsc::UnboundedSender<PoolMessage>>>>;

/// Drives one run of the corpus over a dynamic device fleet.
pub struct Scheduler {
    provider: Arc<dyn DeviceProvider>,
    config: Config,
    strategies: StrategySet,
    corpus: Vec<Arc<TestCase>>,
    sink: Arc<dyn ResultSink>,
}

impl Scheduler {
    /// Create a scheduler with the strategy pipeline selected by the
    /// configuration.
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        config: Config,
        corpus: Vec<TestCase>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let strategies = StrategySet::from_config(&config);
        Self::with_strategies(provider, config, strategies, corpus, sink)
    }

    /// Create a scheduler with an explicit (possibly custom) pipeline.
    pub fn with_strategies(
        provider: Arc<dyn DeviceProvider>,
        config: Config,
        strategies: StrategySet,
        corpus: Vec<TestCase>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            provider,
            config,
            strategies,
            corpus: corpus.into_iter().map(Arc::new).collect(),
            sink,
        }
    }

    /// Run the corpus to completion.
    ///
    /// Resolves once every pool has reached its terminal state. Fails
    /// with [`ExecutionError::NoDevicesAvailable`] if no device shows up
    /// within the startup grace period, or
    /// [`ExecutionError::Timeout`] (carrying all partial results) if the
    /// overall timeout fires first.
    pub async fn execute(&self) -> Result<RunSummary, ExecutionError> {
        let start = std::time::Instant::now();
        let events = self.provider.subscribe().await?;
        info!(
            "Run started: {} tests, provider '{}'",
            self.corpus.len(),
            self.provider.name()
        );

        let registry: PoolRegistry = Arc::new(Mutex::new(HashMap::new()));
        let (spawned_tx, mut spawned_rx) = mpsc::unbounded_channel();
        let router = tokio::spawn(route_events(
            events,
            registry.clone(),
            spawned_tx,
            self.strategies.clone(),
            self.corpus.clone(),
            self.sink.clone(),
            self.config.fleet.health_poll_interval(),
        ));

        let mut pool_results: FuturesUnordered<JoinHandle<PoolSummary>> = FuturesUnordered::new();
        let mut summaries = Vec::new();
        let mut router_done = false;

        let grace = tokio::time::sleep(self.config.fleet.startup_grace());
        tokio::pin!(grace);
        let deadline = tokio::time::sleep(self.config.fleet.pool_timeout());
        tokio::pin!(deadline);

        loop {
            let saw_pool = !pool_results.is_empty() || !summaries.is_empty();
            let quiescent = router_done && saw_pool && pool_results.is_empty();
            if quiescent {
                break;
            }

            tokio::select! {
                spawned = spawned_rx.recv(), if !router_done => match spawned {
                    Some(join) => pool_results.push(join),
                    None => router_done = true,
                },
                Some(result) = pool_results.next() => {
                    match result {
                        Ok(summary) => summaries.push(summary),
                        Err(e) => error!("Pool task failed: {}", e),
                    }
                    // All known pools done; confirm nothing new is being
                    // born before declaring the run quiescent.
                    if pool_results.is_empty() && !router_done {
                        tokio::select! {
                            spawned = spawned_rx.recv() => match spawned {
                                Some(join) => pool_results.push(join),
                                None => router_done = true,
                            },
                            _ = tokio::time::sleep(LIVENESS_RECHECK) => break,
                        }
                    }
                }
                _ = &mut grace, if summaries.is_empty() && pool_results.is_empty() => {
                    // A pool spawned at the very edge of the grace period
                    // may still be queued; it counts as a device arriving.
                    if let Ok(join) = spawned_rx.try_recv() {
                        pool_results.push(join);
                        continue;
                    }
                    router.abort();
                    error!("No devices available, giving up");
                    return Err(ExecutionError::NoDevicesAvailable);
                }
                _ = &mut deadline => {
                    warn!("Run timeout reached, aborting all pools");
                    router.abort();
                    let summary = self
                        .abort_pools(
                            &registry,
                            &mut spawned_rx,
                            pool_results,
                            summaries,
                            start.elapsed(),
                        )
                        .await;
                    self.sink.on_run_complete(&summary).await;
                    return Err(ExecutionError::Timeout { summary });
                }
            }
        }
        router.abort();

        let summary = RunSummary {
            pools: summaries,
            duration: start.elapsed(),
            aborted: false,
        };
        info!(
            "Run finished in {:?}: {} passed, {} failed, {} ignored",
            summary.duration,
            summary.count(TestStatus::Passed),
            summary.count(TestStatus::Failed),
            summary.count(TestStatus::Ignored)
        );
        self.sink.on_run_complete(&summary).await;
        Ok(summary)
    }

    /// Broadcast `Terminate` and collect every pool's partial state.
    async fn abort_pools(
        &self,
        registry: &PoolRegistry,
        spawned_rx: &mut mpsc::UnboundedReceiver<JoinHandle<PoolSummary>>,
        mut pool_results: FuturesUnordered<JoinHandle<PoolSummary>>,
        mut summaries: Vec<PoolSummary>,
        duration: Duration,
    ) -> RunSummary {
        // Pools spawned by the router but not yet picked up by the select
        // loop still hold results; their handles are waiting in the
        // channel. The router is aborted by now, so this drains them all.
        while let Ok(join) = spawned_rx.try_recv() {
            pool_results.push(join);
        }
        {
            let pools = registry.lock().unwrap();
            for tx in pools.values() {
                let _ = tx.send(PoolMessage::Terminate);
            }
        }
        while let Some(result) = pool_results.next().await {
            match result {
                Ok(summary) => summaries.push(summary),
                Err(e) => error!("Pool task failed during abort: {}", e),
            }
        }
        RunSummary {
            pools: summaries,
            duration,
            aborted: true,
        }
    }
}

/// Router task: consumes the provider event stream and forwards each
/// event to the right pool, creating pools on demand.
async fn route_events(
    mut events: mpsc::UnboundedReceiver<DeviceEvent>,
    registry: PoolRegistry,
    spawned_tx: mpsc::UnboundedSender<JoinHandle<PoolSummary>>,
    strategies: StrategySet,
    corpus: Vec<Arc<TestCase>>,
    sink: Arc<dyn ResultSink>,
    health_interval: Duration,
) {
    while let Some(event) = events.recv().await {
        match event {
            DeviceEvent::Connected(device) => {
                let pool_id = strategies.pooling.associate(device.as_ref());
                debug!("Device {} -> pool {}", device.serial(), pool_id);

                let tx = {
                    let mut pools = registry.lock().unwrap();
                    pools
                        .entry(pool_id.clone())
                        .or_insert_with(|| {
                            let (tx, join) = PoolExecutor::spawn(
                                pool_id.clone(),
                                corpus.clone(),
                                strategies.clone(),
                                sink.clone(),
                                health_interval,
                            );
                            let _ = spawned_tx.send(join);
                            tx
                        })
                        .clone()
                };
                let _ = tx.send(PoolMessage::AddDevice(device));
            }
            DeviceEvent::Disconnected(serial) => {
                // Pools don't know in advance which serials they will
                // receive, so removal is attempted everywhere; pools
                // treat unknown serials as a no-op.
                let pools = registry.lock().unwrap();
                for tx in pools.values() {
                    let _ = tx.send(PoolMessage::RemoveDevice(serial.clone()));
                }
            }
        }
    }
    debug!("Device event stream closed");
}
