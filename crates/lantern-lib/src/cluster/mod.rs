//! Access to the cluster API
//!
//! The pipeline only talks to the cluster through [`ClusterApi`]. The
//! production implementation is [`KubeClusterApi`]; tests use an in-memory
//! mock.

mod convert;
mod kube_api;
mod metrics_resources;

#[cfg(test)]
pub(crate) mod mock;

pub use convert::{container_status, node_from_kube, pod_from_kube};
pub use kube_api::KubeClusterApi;
pub use metrics_resources::{ContainerUsage, NodeMetrics, PodMetrics, Usage};

use crate::error::{ConnectError, FetchError};
use crate::models::{ChangeKind, Node, Pod, RawNodeMetrics, RawPodMetrics};
use futures::stream::BoxStream;

pub use async_trait::async_trait;

/// One notification from a watch stream
#[derive(Debug, Clone, PartialEq)]
pub enum WatchNotice<T> {
    /// A resource was added, modified or deleted at `version`
    Change {
        kind: ChangeKind,
        resource: T,
        version: Option<String>,
    },
    /// Everything up to `version` has been delivered
    Progress(String),
    /// The version the stream started from is gone; list again before watching
    Expired,
}

impl<T> WatchNotice<T> {
    pub fn change(kind: ChangeKind, resource: T, version: Option<String>) -> Self {
        WatchNotice::Change {
            kind,
            resource,
            version,
        }
    }
}

/// Stream of recognised notifications for one resource collection
pub type WatchStream<T> = BoxStream<'static, WatchNotice<T>>;

/// A listing and the collection version it was read at
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub version: Option<String>,
}

/// Operations the pipeline needs from the cluster API
///
/// Listed and watched resources come back with a default position; the
/// layout engine assigns coordinates afterwards.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Full node listing in API order
    async fn list_nodes(&self) -> Result<Vec<Node>, FetchError>;

    /// Full pod listing across all namespaces in API order
    async fn list_pods(&self) -> Result<Vec<Pod>, FetchError>;

    /// Node listing with the version a watch can start from
    async fn node_listing(&self) -> Result<Listing<Node>, FetchError> {
        Ok(Listing {
            items: self.list_nodes().await?,
            version: None,
        })
    }

    /// Pod listing with the version a watch can start from
    async fn pod_listing(&self) -> Result<Listing<Pod>, FetchError> {
        Ok(Listing {
            items: self.list_pods().await?,
            version: None,
        })
    }

    /// Open a node watch stream
    ///
    /// With `since` the stream resumes after that version. Without it the
    /// stream starts at the collection's current version and opens with a
    /// [`WatchNotice::Progress`] naming it; existing nodes are not replayed.
    async fn watch_nodes(&self, since: Option<&str>) -> Result<WatchStream<Node>, ConnectError>;

    /// Open a pod watch stream; `since` as for [`ClusterApi::watch_nodes`]
    async fn watch_pods(&self, since: Option<&str>) -> Result<WatchStream<Pod>, ConnectError>;

    /// Current usage of one pod, per container
    async fn fetch_pod_metrics(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<RawPodMetrics, FetchError>;

    /// Current usage of one node
    async fn fetch_node_metrics(&self, name: &str) -> Result<RawNodeMetrics, FetchError>;
}
