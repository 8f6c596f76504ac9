//! [`ClusterApi`] backed by a live `kube::Client`

use super::convert::{node_from_kube, pod_from_kube};
use super::metrics_resources::{NodeMetrics, PodMetrics};
use super::{async_trait, ClusterApi, Listing, WatchNotice, WatchStream};
use crate::error::{ConnectError, FetchError};
use crate::models::{
    ChangeKind, Node, Pod, RawContainerUsage, RawNodeMetrics, RawPodMetrics, RawUsage,
};
use futures::{future, stream, StreamExt};
use k8s_openapi::api::core::v1::{Node as KubeNode, Pod as KubePod};
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::core::ObjectList;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::{debug, info, warn};

/// Status code of a watch whose resource version has been compacted away
const GONE: u16 = 410;

pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster configuration or the local kubeconfig
    pub async fn try_default() -> Result<Self, kube::Error> {
        let client = Client::try_default().await?;
        info!("Connected to Kubernetes cluster");
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn list_all<K>(&self) -> Result<ObjectList<K>, FetchError>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        let api: Api<K> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map_err(FetchError::api)
    }

    /// Open a watch after `since`, or at the collection's current version
    ///
    /// Starting from the current version rather than `"0"` keeps the server
    /// from replaying an added notification for every existing object.
    async fn open_watch<K, T>(
        &self,
        resource: &'static str,
        since: Option<&str>,
        convert: fn(&K) -> T,
    ) -> Result<WatchStream<T>, ConnectError>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
        T: Send + 'static,
    {
        let api: Api<K> = Api::all(self.client.clone());

        let (version, opening) = match since {
            Some(version) => (version.to_string(), None),
            None => {
                let current = api
                    .list_metadata(&ListParams::default().limit(1))
                    .await
                    .map_err(|e| ConnectError::new(resource, e))?;
                let version = current.metadata.resource_version.unwrap_or_default();
                (version.clone(), Some(WatchNotice::Progress(version)))
            }
        };

        let events = api
            .watch(&WatchParams::default(), &version)
            .await
            .map_err(|e| {
                if is_gone(&e) {
                    ConnectError::expired(resource, e)
                } else {
                    ConnectError::new(resource, e)
                }
            })?;

        debug!(resource, version = %version, "Opened watch");
        let notices =
            events.filter_map(move |event| future::ready(recognise(resource, event, convert)));
        Ok(stream::iter(opening).chain(notices).boxed())
    }
}

/// Map a native watch notification to a recognised notice, dropping the rest
fn recognise<K: Resource, T>(
    resource: &'static str,
    event: kube::Result<WatchEvent<K>>,
    convert: fn(&K) -> T,
) -> Option<WatchNotice<T>> {
    let change = |kind: ChangeKind, obj: K| {
        WatchNotice::change(kind, convert(&obj), obj.meta().resource_version.clone())
    };

    match event {
        Ok(WatchEvent::Added(obj)) => Some(change(ChangeKind::Added, obj)),
        Ok(WatchEvent::Modified(obj)) => Some(change(ChangeKind::Modified, obj)),
        Ok(WatchEvent::Deleted(obj)) => Some(change(ChangeKind::Deleted, obj)),
        Ok(WatchEvent::Bookmark(bookmark)) => {
            Some(WatchNotice::Progress(bookmark.metadata.resource_version))
        }
        Ok(WatchEvent::Error(status)) if status.code == GONE => {
            debug!(resource, message = %status.message, "Watch version expired");
            Some(WatchNotice::Expired)
        }
        Ok(WatchEvent::Error(status)) => {
            warn!(
                resource,
                code = status.code,
                reason = %status.reason,
                message = %status.message,
                "Watch stream reported an error"
            );
            None
        }
        Err(e) => {
            warn!(resource, error = %e, "Failed to decode watch notification");
            None
        }
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

fn is_gone(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == GONE)
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_nodes(&self) -> Result<Vec<Node>, FetchError> {
        Ok(self.node_listing().await?.items)
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, FetchError> {
        Ok(self.pod_listing().await?.items)
    }

    async fn node_listing(&self) -> Result<Listing<Node>, FetchError> {
        let list = self.list_all::<KubeNode>().await?;
        debug!(count = list.items.len(), "Listed nodes");
        Ok(Listing {
            items: list.items.iter().map(node_from_kube).collect(),
            version: list.metadata.resource_version,
        })
    }

    async fn pod_listing(&self) -> Result<Listing<Pod>, FetchError> {
        let list = self.list_all::<KubePod>().await?;
        debug!(count = list.items.len(), "Listed pods");
        Ok(Listing {
            items: list.items.iter().map(pod_from_kube).collect(),
            version: list.metadata.resource_version,
        })
    }

    async fn watch_nodes(&self, since: Option<&str>) -> Result<WatchStream<Node>, ConnectError> {
        self.open_watch("node", since, node_from_kube).await
    }

    async fn watch_pods(&self, since: Option<&str>) -> Result<WatchStream<Pod>, ConnectError> {
        self.open_watch("pod", since, pod_from_kube).await
    }

    async fn fetch_pod_metrics(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<RawPodMetrics, FetchError> {
        let api: Api<PodMetrics> = Api::namespaced(self.client.clone(), namespace);
        let metrics = api.get(name).await.map_err(|e| {
            if is_not_found(&e) {
                FetchError::NotAvailable(format!("pod {namespace}/{name}"))
            } else {
                FetchError::api(e)
            }
        })?;

        Ok(RawPodMetrics {
            timestamp: metrics.timestamp.map(|t| t.0),
            containers: metrics
                .containers
                .into_iter()
                .map(|c| RawContainerUsage {
                    name: c.name,
                    usage: RawUsage {
                        cpu: c.usage.cpu.0,
                        memory: c.usage.memory.0,
                    },
                })
                .collect(),
        })
    }

    async fn fetch_node_metrics(&self, name: &str) -> Result<RawNodeMetrics, FetchError> {
        let api: Api<NodeMetrics> = Api::all(self.client.clone());
        let metrics = api.get(name).await.map_err(|e| {
            if is_not_found(&e) {
                FetchError::NotAvailable(format!("node {name}"))
            } else {
                FetchError::api(e)
            }
        })?;

        Ok(RawNodeMetrics {
            timestamp: metrics.timestamp.map(|t| t.0),
            usage: RawUsage {
                cpu: metrics.usage.cpu.0,
                memory: metrics.usage.memory.0,
            },
        })
    }
}
