//! Cluster change aggregation
//!
//! Merges the node and pod watch streams into one channel of
//! [`ClusterEvent`]s. Each stream runs in its own task; events from the two
//! streams interleave in arrival order with no ordering between them.
//!
//! Every emitted resource carries a position computed by the layout engine
//! from a fresh listing, so positions stay a function of the listing order
//! rather than of anything cached here.
//!
//! Streams start at the collection's current version, so nothing is
//! replayed at startup; subscribers fetch the initial state from a
//! [`ClusterSnapshot`](crate::snapshot::ClusterSnapshot).

mod stream;


use crate::cluster::ClusterApi;
use crate::error::ConnectError;
use crate::health::{components, HealthRegistry};
use crate::models::{ClusterEvent, Node, Pod};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::pipeline::Producer;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use stream::{StreamWorker, Watched};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Configuration for the watch streams
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Re-establish a stream after it ends (default: true)
    pub resubscribe: bool,
    /// Delay before the first resubscription attempt (default: 500ms)
    pub initial_backoff: Duration,
    /// Upper bound for the doubling backoff (default: 30 seconds)
    pub max_backoff: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            resubscribe: true,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff between resubscription attempts
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the following one up to the cap
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Streams currently down, reported as one aggregator health entry
///
/// The aggregator is healthy only while no stream is down.
pub(crate) struct Outages {
    health: Option<HealthRegistry>,
    down: Mutex<BTreeSet<&'static str>>,
}

impl Outages {
    pub(crate) fn new(health: Option<HealthRegistry>) -> Self {
        Self {
            health,
            down: Mutex::new(BTreeSet::new()),
        }
    }

    pub(crate) async fn down(&self, resource: &'static str) {
        let mut down = self.down.lock().await;
        down.insert(resource);
        self.report(&down).await;
    }

    pub(crate) async fn up(&self, resource: &'static str) {
        let mut down = self.down.lock().await;
        down.remove(resource);
        self.report(&down).await;
    }

    // called with the lock held so reports land in mutation order
    async fn report(&self, down: &BTreeSet<&'static str>) {
        let Some(health) = &self.health else {
            return;
        };
        if down.is_empty() {
            health.set_healthy(components::AGGREGATOR).await;
        } else {
            let streams: Vec<&str> = down.iter().copied().collect();
            health
                .set_degraded(
                    components::AGGREGATOR,
                    format!("{} watch resubscribing", streams.join(", ")),
                )
                .await;
        }
    }
}

/// Producer of node and pod change events
pub struct ClusterAggregator {
    api: Arc<dyn ClusterApi>,
    config: WatchConfig,
    health: Option<HealthRegistry>,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
    running: Option<WatchHandle>,
}

impl ClusterAggregator {
    pub fn new(api: Arc<dyn ClusterApi>, config: WatchConfig) -> Self {
        Self {
            api,
            config,
            health: None,
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new("lantern"),
            running: None,
        }
    }

    /// Report stream outages to `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Open both watch streams and start forwarding their changes to `sink`
    ///
    /// Both streams are established before anything is spawned; failing to
    /// open either one is returned and nothing keeps running. Once running,
    /// a stream that ends is either re-established with backoff or left
    /// stopped, depending on [`WatchConfig::resubscribe`].
    pub async fn watch(
        &self,
        sink: mpsc::Sender<ClusterEvent>,
    ) -> Result<WatchHandle, ConnectError> {
        let nodes = self.api.watch_nodes(None).await?;
        let pods = self.api.watch_pods(None).await?;

        let outages = Arc::new(Outages::new(self.health.clone()));
        let (shutdown, _) = broadcast::channel(1);
        let tasks = vec![
            tokio::spawn(
                self.worker::<Node>(sink.clone(), outages.clone())
                    .run(nodes, shutdown.subscribe()),
            ),
            tokio::spawn(
                self.worker::<Pod>(sink, outages)
                    .run(pods, shutdown.subscribe()),
            ),
        ];

        if let Some(health) = &self.health {
            health.set_healthy(components::AGGREGATOR).await;
        }
        info!(resubscribe = self.config.resubscribe, "Watching nodes and pods");

        Ok(WatchHandle { shutdown, tasks })
    }

    fn worker<T: Watched>(
        &self,
        sink: mpsc::Sender<ClusterEvent>,
        outages: Arc<Outages>,
    ) -> StreamWorker<T> {
        StreamWorker::new(
            self.api.clone(),
            self.config.clone(),
            sink,
            outages,
            self.metrics.clone(),
            self.logger.clone(),
        )
    }
}

#[async_trait]
impl Producer for ClusterAggregator {
    fn name(&self) -> &'static str {
        "aggregator"
    }

    async fn spawn(&mut self, sink: mpsc::Sender<ClusterEvent>) -> Result<(), ConnectError> {
        let handle = self.watch(sink).await?;
        self.running = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(handle) = self.running.take() {
            handle.stop().await;
        }
    }
}

/// Running watch tasks. Dropping the handle stops them without waiting.
pub struct WatchHandle {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl WatchHandle {
    /// Stop both watch tasks and wait for them to finish
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(());
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Watch task ended abnormally");
            }
        }
    }

    /// True once both watch tasks have ended on their own
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|task| task.is_finished())
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}
