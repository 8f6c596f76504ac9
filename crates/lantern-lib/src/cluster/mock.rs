//! In-memory [`ClusterApi`] for tests

use super::{async_trait, ClusterApi, Listing, WatchNotice, WatchStream};
use crate::error::{ConnectError, FetchError};
use crate::models::{
    ChangeKind, Node, NodeStatus, Pod, PodPhase, Position, RawContainerUsage, RawNodeMetrics,
    RawPodMetrics, RawUsage, ResourceUsage,
};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type Feed<T> = Mutex<Option<mpsc::UnboundedSender<WatchNotice<T>>>>;

#[derive(Default)]
pub(crate) struct MockClusterApi {
    nodes: Mutex<Vec<Node>>,
    pods: Mutex<Vec<Pod>>,
    pod_metrics: Mutex<HashMap<String, RawPodMetrics>>,
    node_metrics: Mutex<HashMap<String, RawNodeMetrics>>,
    node_feed: Feed<Node>,
    pod_feed: Feed<Pod>,
    /// Collection version, bumped by every pushed change
    version: AtomicU64,
    node_watch_since: Mutex<Vec<Option<String>>>,
    pod_watch_since: Mutex<Vec<Option<String>>>,
    pub fail_node_watch: AtomicBool,
    pub fail_pod_watch: AtomicBool,
    /// Refuse the next resume as if its version had been compacted
    pub expire_on_resume: AtomicBool,
    pub fail_list_pods: AtomicBool,
    pub node_watch_calls: AtomicUsize,
    pub pod_watch_calls: AtomicUsize,
}

impl MockClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) {
        *self.nodes.lock().unwrap() = nodes;
    }

    pub fn set_pods(&self, pods: Vec<Pod>) {
        *self.pods.lock().unwrap() = pods;
    }

    pub fn set_pod_metrics(&self, namespace: &str, name: &str, metrics: RawPodMetrics) {
        self.pod_metrics
            .lock()
            .unwrap()
            .insert(format!("{namespace}/{name}"), metrics);
    }

    pub fn set_node_metrics(&self, name: &str, metrics: RawNodeMetrics) {
        self.node_metrics
            .lock()
            .unwrap()
            .insert(name.to_string(), metrics);
    }

    fn bump_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn current_version(&self) -> String {
        self.version.load(Ordering::SeqCst).to_string()
    }

    /// Deliver a node change on the open node stream at a new version
    pub fn push_node(&self, kind: ChangeKind, node: Node) {
        let version = self.bump_version();
        if let Some(feed) = self.node_feed.lock().unwrap().as_ref() {
            let _ = feed.send(WatchNotice::change(kind, node, Some(version)));
        }
    }

    pub fn push_pod(&self, kind: ChangeKind, pod: Pod) {
        let version = self.bump_version();
        if let Some(feed) = self.pod_feed.lock().unwrap().as_ref() {
            let _ = feed.send(WatchNotice::change(kind, pod, Some(version)));
        }
    }

    /// Report the node stream's version as compacted, then end it
    pub fn expire_node_stream(&self) {
        if let Some(feed) = self.node_feed.lock().unwrap().take() {
            let _ = feed.send(WatchNotice::Expired);
        }
    }

    pub fn node_stream_open(&self) -> bool {
        self.node_feed.lock().unwrap().is_some()
    }

    pub fn pod_stream_open(&self) -> bool {
        self.pod_feed.lock().unwrap().is_some()
    }

    /// Versions each node watch was opened after, in call order
    pub fn node_watch_since(&self) -> Vec<Option<String>> {
        self.node_watch_since.lock().unwrap().clone()
    }

    pub fn pod_watch_since(&self) -> Vec<Option<String>> {
        self.pod_watch_since.lock().unwrap().clone()
    }

    /// End the open node stream as a server-side timeout would
    pub fn close_node_stream(&self) {
        self.node_feed.lock().unwrap().take();
    }

    pub fn close_pod_stream(&self) {
        self.pod_feed.lock().unwrap().take();
    }

    fn open<T: Send + 'static>(&self, feed: &Feed<T>, since: Option<&str>) -> WatchStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        if since.is_none() {
            let _ = tx.send(WatchNotice::Progress(self.current_version()));
        }
        *feed.lock().unwrap() = Some(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }
}

#[async_trait]
impl ClusterApi for MockClusterApi {
    async fn list_nodes(&self) -> Result<Vec<Node>, FetchError> {
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, FetchError> {
        if self.fail_list_pods.load(Ordering::SeqCst) {
            return Err(FetchError::api("list pods refused"));
        }
        Ok(self.pods.lock().unwrap().clone())
    }

    async fn node_listing(&self) -> Result<Listing<Node>, FetchError> {
        Ok(Listing {
            items: self.list_nodes().await?,
            version: Some(self.current_version()),
        })
    }

    async fn pod_listing(&self) -> Result<Listing<Pod>, FetchError> {
        Ok(Listing {
            items: self.list_pods().await?,
            version: Some(self.current_version()),
        })
    }

    async fn watch_nodes(&self, since: Option<&str>) -> Result<WatchStream<Node>, ConnectError> {
        self.node_watch_calls.fetch_add(1, Ordering::SeqCst);
        self.node_watch_since
            .lock()
            .unwrap()
            .push(since.map(str::to_string));
        if self.fail_node_watch.load(Ordering::SeqCst) {
            return Err(ConnectError::new("node", "connection refused"));
        }
        if since.is_some() && self.expire_on_resume.swap(false, Ordering::SeqCst) {
            return Err(ConnectError::expired("node", "too old resource version"));
        }
        Ok(self.open(&self.node_feed, since))
    }

    async fn watch_pods(&self, since: Option<&str>) -> Result<WatchStream<Pod>, ConnectError> {
        self.pod_watch_calls.fetch_add(1, Ordering::SeqCst);
        self.pod_watch_since
            .lock()
            .unwrap()
            .push(since.map(str::to_string));
        if self.fail_pod_watch.load(Ordering::SeqCst) {
            return Err(ConnectError::new("pod", "forbidden"));
        }
        if since.is_some() && self.expire_on_resume.swap(false, Ordering::SeqCst) {
            return Err(ConnectError::expired("pod", "too old resource version"));
        }
        Ok(self.open(&self.pod_feed, since))
    }

    async fn fetch_pod_metrics(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<RawPodMetrics, FetchError> {
        self.pod_metrics
            .lock()
            .unwrap()
            .get(&format!("{namespace}/{name}"))
            .cloned()
            .ok_or_else(|| FetchError::NotAvailable(format!("pod {namespace}/{name}")))
    }

    async fn fetch_node_metrics(&self, name: &str) -> Result<RawNodeMetrics, FetchError> {
        self.node_metrics
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| FetchError::NotAvailable(format!("node {name}")))
    }
}

pub(crate) fn test_node(name: &str) -> Node {
    Node {
        id: format!("node-{name}"),
        name: name.to_string(),
        status: NodeStatus::Ready,
        cpu: ResourceUsage::with_total(4.0),
        memory: ResourceUsage::with_total(16.0),
        pods: Vec::new(),
        labels: BTreeMap::new(),
        position: Position::ORIGIN,
    }
}

pub(crate) fn test_pod(name: &str, node_name: &str) -> Pod {
    Pod {
        id: format!("pod-{name}"),
        namespace: "default".to_string(),
        name: name.to_string(),
        status: PodPhase::Running,
        node_name: node_name.to_string(),
        containers: Vec::new(),
        created_at: None,
        position: Position::ORIGIN,
    }
}

pub(crate) fn raw_pod_metrics(usages: &[(&str, &str, &str)]) -> RawPodMetrics {
    RawPodMetrics {
        timestamp: None,
        containers: usages
            .iter()
            .map(|(name, cpu, memory)| RawContainerUsage {
                name: name.to_string(),
                usage: RawUsage {
                    cpu: cpu.to_string(),
                    memory: memory.to_string(),
                },
            })
            .collect(),
    }
}
