//! Core data models shared by the producers, the hub and the frontend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 3D coordinate used by the frontend scene
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const ORIGIN: Position = Position {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Used/total pair for a node resource (cores or GiB)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub used: f64,
    pub total: f64,
}

impl ResourceUsage {
    pub fn with_total(total: f64) -> Self {
        Self { used: 0.0, total }
    }
}

/// Node readiness derived from the condition list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Ready,
    NotReady,
}

impl NodeStatus {
    /// `Ready` iff a condition of type Ready has status True
    pub fn from_conditions<'a, I>(conditions: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let ready = conditions
            .into_iter()
            .any(|(kind, status)| kind == "Ready" && status == "True");

        if ready {
            NodeStatus::Ready
        } else {
            NodeStatus::NotReady
        }
    }
}

/// Cluster node as rendered by the frontend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    pub status: NodeStatus,
    pub cpu: ResourceUsage,
    pub memory: ResourceUsage,
    /// IDs of pods scheduled here; only filled by the snapshot path
    pub pods: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub position: Position,
}

/// Pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Container state as reported in the pod status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    Running,
    Waiting,
    Terminated,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub status: ContainerStatus,
    pub restarts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub id: String,
    pub namespace: String,
    pub name: String,
    pub status: PodPhase,
    /// Empty while the pod is unscheduled
    pub node_name: String,
    pub containers: Vec<Container>,
    pub created_at: Option<DateTime<Utc>>,
    pub position: Position,
}

/// Kind of change delivered by a watch stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// Raw usage strings as served by the metrics API (e.g. `"250m"`, `"512Mi"`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawUsage {
    pub cpu: String,
    pub memory: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContainerUsage {
    pub name: String,
    pub usage: RawUsage,
}

/// Unconverted pod metrics sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPodMetrics {
    pub timestamp: Option<DateTime<Utc>>,
    pub containers: Vec<RawContainerUsage>,
}

/// Unconverted node metrics sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNodeMetrics {
    pub timestamp: Option<DateTime<Utc>>,
    pub usage: RawUsage,
}

/// Per-container usage in millicores / MB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetricsSample {
    pub name: String,
    pub cpu: f64,
    pub memory: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMetricsSample {
    pub pod_id: String,
    pub name: String,
    pub namespace: String,
    pub total_cpu: f64,
    pub total_memory: f64,
    pub containers: Vec<ContainerMetricsSample>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetricsSample {
    pub name: String,
    pub cpu: f64,
    pub memory: f64,
    pub timestamp: DateTime<Utc>,
}

/// One poll tick worth of samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub pods: Vec<PodMetricsSample>,
    pub nodes: Vec<NodeMetricsSample>,
}

impl MetricsUpdate {
    pub fn is_empty(&self) -> bool {
        self.pods.is_empty() && self.nodes.is_empty()
    }
}

/// Event pushed through the hub to every subscriber
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterEvent {
    PodAdded { pod: Pod },
    PodModified { pod: Pod },
    PodDeleted { pod: Pod },
    NodeAdded { node: Node },
    NodeModified { node: Node },
    NodeDeleted { node: Node },
    MetricsUpdate(MetricsUpdate),
}

impl ClusterEvent {
    pub fn pod(kind: ChangeKind, pod: Pod) -> Self {
        match kind {
            ChangeKind::Added => ClusterEvent::PodAdded { pod },
            ChangeKind::Modified => ClusterEvent::PodModified { pod },
            ChangeKind::Deleted => ClusterEvent::PodDeleted { pod },
        }
    }

    pub fn node(kind: ChangeKind, node: Node) -> Self {
        match kind {
            ChangeKind::Added => ClusterEvent::NodeAdded { node },
            ChangeKind::Modified => ClusterEvent::NodeModified { node },
            ChangeKind::Deleted => ClusterEvent::NodeDeleted { node },
        }
    }

    /// Wire tag of this event
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterEvent::PodAdded { .. } => "pod_added",
            ClusterEvent::PodModified { .. } => "pod_modified",
            ClusterEvent::PodDeleted { .. } => "pod_deleted",
            ClusterEvent::NodeAdded { .. } => "node_added",
            ClusterEvent::NodeModified { .. } => "node_modified",
            ClusterEvent::NodeDeleted { .. } => "node_deleted",
            ClusterEvent::MetricsUpdate(_) => "metrics_update",
        }
    }
}
