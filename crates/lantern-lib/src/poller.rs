//! Periodic metrics polling
//!
//! On every tick the poller lists pods, fetches each pod's usage from the
//! metrics API and emits the converted samples as one [`MetricsUpdate`].
//! Pods without metrics (pending, terminated, not yet scraped) are skipped
//! for that tick; a tick where nothing could be sampled emits nothing.

use crate::cluster::ClusterApi;
use crate::error::ConnectError;
use crate::health::{components, HealthRegistry};
use crate::models::{
    ClusterEvent, ContainerMetricsSample, MetricsUpdate, Node, NodeMetricsSample, Pod,
    PodMetricsSample, RawNodeMetrics, RawPodMetrics,
};
use crate::observability::PipelineMetrics;
use crate::pipeline::Producer;
use crate::units::{cpu_usage_millicores, memory_usage_mb};
use async_trait::async_trait;
use chrono::Utc;
use futures::{future, stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the metrics poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Poll interval (default: 5 seconds)
    pub interval: Duration,
    /// Capacity of the update channel
    pub buffer_size: usize,
    /// Include node samples in each batch (default: false)
    pub poll_nodes: bool,
    /// Metrics requests in flight at once within a tick
    pub fetch_concurrency: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            buffer_size: 256,
            poll_nodes: false,
            fetch_concurrency: 8,
        }
    }
}

/// Convert one pod's raw usage into a sample in millicores / MB
pub fn pod_sample(pod: &Pod, raw: RawPodMetrics) -> PodMetricsSample {
    let containers: Vec<ContainerMetricsSample> = raw
        .containers
        .into_iter()
        .map(|c| ContainerMetricsSample {
            cpu: cpu_usage_millicores(&c.usage.cpu),
            memory: memory_usage_mb(&c.usage.memory),
            name: c.name,
        })
        .collect();

    PodMetricsSample {
        pod_id: pod.id.clone(),
        name: pod.name.clone(),
        namespace: pod.namespace.clone(),
        total_cpu: containers.iter().map(|c| c.cpu).sum(),
        total_memory: containers.iter().map(|c| c.memory).sum(),
        containers,
        timestamp: raw.timestamp.unwrap_or_else(Utc::now),
    }
}

/// Convert one node's raw usage into a sample in millicores / MB
pub fn node_sample(node: &Node, raw: RawNodeMetrics) -> NodeMetricsSample {
    NodeMetricsSample {
        name: node.name.clone(),
        cpu: cpu_usage_millicores(&raw.usage.cpu),
        memory: memory_usage_mb(&raw.usage.memory),
        timestamp: raw.timestamp.unwrap_or_else(Utc::now),
    }
}

/// Collects one batch of samples from the cluster API
#[derive(Clone)]
struct Sampler {
    api: Arc<dyn ClusterApi>,
    poll_nodes: bool,
    concurrency: usize,
    metrics: PipelineMetrics,
    health: Option<HealthRegistry>,
}

impl Sampler {
    async fn sample(&self) -> MetricsUpdate {
        let start = Instant::now();

        let pods = self.sample_pods().await;
        let nodes = if self.poll_nodes {
            self.sample_nodes().await
        } else {
            Vec::new()
        };

        let elapsed = start.elapsed();
        self.metrics.observe_poll_duration(elapsed.as_secs_f64());
        debug!(
            pods = pods.len(),
            nodes = nodes.len(),
            elapsed_ms = elapsed.as_millis(),
            "Metrics poll complete"
        );

        MetricsUpdate { pods, nodes }
    }

    async fn sample_pods(&self) -> Vec<PodMetricsSample> {
        let pods = match self.api.list_pods().await {
            Ok(pods) => {
                self.set_healthy().await;
                pods
            }
            Err(e) => {
                warn!(error = %e, "Failed to list pods for metrics poll");
                self.set_degraded("pod listing failed").await;
                return Vec::new();
            }
        };

        // buffered keeps listing order while fetching concurrently
        let fetches: Vec<_> = pods.iter().map(|pod| self.fetch_pod(pod)).collect();
        stream::iter(fetches)
            .buffered(self.concurrency.max(1))
            .filter_map(future::ready)
            .collect()
            .await
    }

    async fn fetch_pod(&self, pod: &Pod) -> Option<PodMetricsSample> {
        match self.api.fetch_pod_metrics(&pod.namespace, &pod.name).await {
            Ok(raw) => Some(pod_sample(pod, raw)),
            Err(e) => {
                self.metrics.inc_metrics_fetch_failures();
                debug!(
                    pod = %pod.name,
                    namespace = %pod.namespace,
                    error = %e,
                    "Skipping pod without metrics"
                );
                None
            }
        }
    }

    async fn sample_nodes(&self) -> Vec<NodeMetricsSample> {
        let nodes = match self.api.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "Failed to list nodes for metrics poll");
                return Vec::new();
            }
        };

        let fetches: Vec<_> = nodes.iter().map(|node| self.fetch_node(node)).collect();
        stream::iter(fetches)
            .buffered(self.concurrency.max(1))
            .filter_map(future::ready)
            .collect()
            .await
    }

    async fn fetch_node(&self, node: &Node) -> Option<NodeMetricsSample> {
        match self.api.fetch_node_metrics(&node.name).await {
            Ok(raw) => Some(node_sample(node, raw)),
            Err(e) => {
                self.metrics.inc_metrics_fetch_failures();
                debug!(node = %node.name, error = %e, "Skipping node without metrics");
                None
            }
        }
    }

    async fn set_healthy(&self) {
        if let Some(health) = &self.health {
            health.set_healthy(components::POLLER).await;
        }
    }

    async fn set_degraded(&self, message: &str) {
        if let Some(health) = &self.health {
            health.set_degraded(components::POLLER, message).await;
        }
    }

    async fn run(
        self,
        period: Duration,
        updates: mpsc::Sender<MetricsUpdate>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(interval_ms = period.as_millis(), "Starting metrics poller");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }

            // an in-flight tick is abandoned on shutdown
            let update = tokio::select! {
                update = self.sample() => update,
                _ = shutdown.recv() => break,
            };

            if update.is_empty() {
                debug!("No samples this tick, nothing to emit");
                continue;
            }

            tokio::select! {
                sent = updates.send(update) => {
                    if sent.is_err() {
                        debug!("Update receiver dropped, stopping poller");
                        break;
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        info!("Metrics poller stopped");
    }
}

struct PollerHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Producer of [`MetricsUpdate`] batches on a fixed interval
pub struct MetricsPoller {
    sampler: Sampler,
    config: PollerConfig,
    running: Option<PollerHandle>,
    forwarder: Option<JoinHandle<()>>,
}

impl MetricsPoller {
    pub fn new(api: Arc<dyn ClusterApi>, config: PollerConfig) -> Self {
        Self {
            sampler: Sampler {
                api,
                poll_nodes: config.poll_nodes,
                concurrency: config.fetch_concurrency,
                metrics: PipelineMetrics::new(),
                health: None,
            },
            config,
            running: None,
            forwarder: None,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.sampler.health = Some(health);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Collect one batch now, outside the interval loop
    pub async fn poll_once(&self) -> MetricsUpdate {
        self.sampler.sample().await
    }

    /// Start polling every `interval`; the first batch comes one interval in
    ///
    /// The returned channel closes once the poller is stopped. Starting an
    /// already running poller signals the previous loop to stop.
    pub fn start(&mut self, interval: Duration) -> mpsc::Receiver<MetricsUpdate> {
        if self.running.is_some() {
            warn!("Metrics poller restarted while running");
        }

        let (tx, rx) = mpsc::channel(self.config.buffer_size.max(1));
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(self.sampler.clone().run(interval, tx, shutdown_rx));

        // dropping the previous handle closes its shutdown channel
        self.running = Some(PollerHandle { shutdown, task });
        rx
    }

    /// Stop the interval loop and wait for it to exit
    ///
    /// No update is sent after this returns. Calling it again, or before
    /// [`start`](Self::start), does nothing.
    pub async fn stop(&mut self) {
        let Some(handle) = self.running.take() else {
            return;
        };

        let _ = handle.shutdown.send(());
        if let Err(e) = handle.task.await {
            warn!(error = %e, "Metrics poller task ended abnormally");
        }
    }
}

#[async_trait]
impl Producer for MetricsPoller {
    fn name(&self) -> &'static str {
        "poller"
    }

    async fn spawn(&mut self, sink: mpsc::Sender<ClusterEvent>) -> Result<(), ConnectError> {
        let mut updates = self.start(self.config.interval);
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                if sink.send(ClusterEvent::MetricsUpdate(update)).await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.stop().await;
        // the update channel is closed now, so the forwarder drains and exits
        if let Some(forwarder) = self.forwarder.take() {
            if let Err(e) = forwarder.await {
                warn!(error = %e, "Metrics forwarder ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::{raw_pod_metrics, test_node, test_pod, MockClusterApi};
    use crate::models::RawUsage;
    use std::sync::atomic::Ordering;
    use tokio::time::timeout;

    const TICK: Duration = Duration::from_millis(20);

    fn mock_with_pods(names: &[&str]) -> Arc<MockClusterApi> {
        let api = Arc::new(MockClusterApi::new());
        api.set_pods(names.iter().map(|name| test_pod(name, "worker-1")).collect());
        api
    }

    #[test]
    fn test_pod_sample_converts_units_and_sums() {
        let pod = test_pod("web", "worker-1");
        let raw = raw_pod_metrics(&[
            ("app", "500000000n", "1048576Ki"),
            ("sidecar", "250m", "512Mi"),
        ]);

        let sample = pod_sample(&pod, raw);

        assert_eq!(sample.pod_id, "pod-web");
        assert_eq!(sample.containers[0].cpu, 500.0);
        assert_eq!(sample.containers[0].memory, 1024.0);
        assert_eq!(sample.containers[1].cpu, 250.0);
        assert_eq!(sample.containers[1].memory, 512.0);
        assert_eq!(sample.total_cpu, 750.0);
        assert_eq!(sample.total_memory, 1536.0);
    }

    #[test]
    fn test_unrecognised_suffix_yields_zero() {
        let pod = test_pod("odd", "worker-1");
        let sample = pod_sample(&pod, raw_pod_metrics(&[("app", "1", "2Gi")]));

        assert_eq!(sample.total_cpu, 0.0);
        assert_eq!(sample.total_memory, 0.0);
    }

    #[test]
    fn test_node_sample_conversion() {
        let node = test_node("worker-1");
        let raw = RawNodeMetrics {
            timestamp: None,
            usage: RawUsage {
                cpu: "1500m".to_string(),
                memory: "2048Mi".to_string(),
            },
        };

        let sample = node_sample(&node, raw);
        assert_eq!(sample.name, "worker-1");
        assert_eq!(sample.cpu, 1500.0);
        assert_eq!(sample.memory, 2048.0);
    }

    #[test]
    fn test_poller_config_default() {
        let config = PollerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert!(!config.poll_nodes);
        assert_eq!(config.fetch_concurrency, 8);
    }

    #[tokio::test]
    async fn test_poll_skips_pods_without_metrics() {
        let api = mock_with_pods(&["a", "b", "c"]);
        api.set_pod_metrics("default", "a", raw_pod_metrics(&[("app", "100m", "64Mi")]));
        api.set_pod_metrics("default", "c", raw_pod_metrics(&[("app", "300m", "128Mi")]));

        let poller = MetricsPoller::new(api, PollerConfig::default());
        let update = poller.poll_once().await;

        let names: Vec<&str> = update.pods.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(update.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_started_poller_emits_converted_batches() {
        let api = mock_with_pods(&["web"]);
        api.set_pod_metrics(
            "default",
            "web",
            raw_pod_metrics(&[("app", "500000000n", "1048576Ki")]),
        );

        let mut poller = MetricsPoller::new(api, PollerConfig::default());
        let mut updates = poller.start(TICK);

        let update = timeout(Duration::from_secs(1), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.pods[0].total_cpu, 500.0);
        assert_eq!(update.pods[0].total_memory, 1024.0);

        poller.stop().await;
    }

    #[tokio::test]
    async fn test_all_fetches_failing_emits_nothing() {
        let api = mock_with_pods(&["a", "b"]);
        let mut poller = MetricsPoller::new(api, PollerConfig::default());
        let mut updates = poller.start(TICK);

        // several ticks elapse without a batch
        assert!(timeout(TICK * 6, updates.recv()).await.is_err());

        poller.stop().await;
        assert!(updates.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_listing_degrades_health() {
        let api = mock_with_pods(&["a"]);
        api.fail_list_pods.store(true, Ordering::SeqCst);
        let health = HealthRegistry::new();

        let poller = MetricsPoller::new(api, PollerConfig::default()).with_health(health.clone());
        assert!(poller.poll_once().await.is_empty());

        let status = health.health().await.components[components::POLLER].status;
        assert_eq!(status, crate::health::ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_node_samples_are_opt_in() {
        let api = Arc::new(MockClusterApi::new());
        api.set_nodes(vec![test_node("worker-1")]);
        api.set_node_metrics(
            "worker-1",
            RawNodeMetrics {
                timestamp: None,
                usage: RawUsage {
                    cpu: "250m".to_string(),
                    memory: "1024Ki".to_string(),
                },
            },
        );

        let without = MetricsPoller::new(api.clone(), PollerConfig::default());
        assert!(without.poll_once().await.is_empty());

        let config = PollerConfig {
            poll_nodes: true,
            ..PollerConfig::default()
        };
        let with = MetricsPoller::new(api, config);
        let update = with.poll_once().await;

        assert!(update.pods.is_empty());
        assert_eq!(update.nodes.len(), 1);
        assert_eq!(update.nodes[0].memory, 1.0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let api = mock_with_pods(&[]);
        let mut poller = MetricsPoller::new(api, PollerConfig::default());

        poller.stop().await;
        let mut updates = poller.start(TICK);
        assert!(poller.is_running());

        poller.stop().await;
        poller.stop().await;
        assert!(!poller.is_running());
        assert!(updates.recv().await.is_none());
    }
}
