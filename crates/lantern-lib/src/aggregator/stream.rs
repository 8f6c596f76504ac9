//! Per-resource watch loop

use super::{Backoff, Outages, WatchConfig};
use crate::cluster::{ClusterApi, Listing, WatchNotice, WatchStream};
use crate::error::{ConnectError, FetchError};
use crate::layout::{self, Layout};
use crate::models::{ChangeKind, ClusterEvent, Node, Pod};
use crate::observability::{PipelineMetrics, StructuredLogger};
use async_trait::async_trait;
use futures::StreamExt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// A resource collection the aggregator can watch
#[async_trait]
pub(super) trait Watched: Sized + Send + 'static {
    const RESOURCE: &'static str;

    async fn subscribe(
        api: &dyn ClusterApi,
        since: Option<&str>,
    ) -> Result<WatchStream<Self>, ConnectError>;

    /// Full laid-out listing from a single read, used to reconcile
    async fn listing(api: &dyn ClusterApi) -> Result<Listing<Self>, FetchError>;

    /// Assign this resource's position from a fresh listing
    async fn locate(&mut self, api: &dyn ClusterApi);

    fn into_event(self, kind: ChangeKind) -> ClusterEvent;
}

#[async_trait]
impl Watched for Node {
    const RESOURCE: &'static str = "node";

    async fn subscribe(
        api: &dyn ClusterApi,
        since: Option<&str>,
    ) -> Result<WatchStream<Self>, ConnectError> {
        api.watch_nodes(since).await
    }

    async fn listing(api: &dyn ClusterApi) -> Result<Listing<Self>, FetchError> {
        let mut listing = api.node_listing().await?;
        layout::layout_nodes(&mut listing.items);
        Ok(listing)
    }

    async fn locate(&mut self, api: &dyn ClusterApi) {
        match api.list_nodes().await {
            Ok(nodes) => match nodes.iter().position(|n| n.name == self.name) {
                Some(index) => self.position = layout::node_position(index, nodes.len()),
                None => debug!(node = %self.name, "Node not in listing, keeping default position"),
            },
            Err(e) => warn!(node = %self.name, error = %e, "Failed to list nodes for layout"),
        }
    }

    fn into_event(self, kind: ChangeKind) -> ClusterEvent {
        ClusterEvent::node(kind, self)
    }
}

#[async_trait]
impl Watched for Pod {
    const RESOURCE: &'static str = "pod";

    async fn subscribe(
        api: &dyn ClusterApi,
        since: Option<&str>,
    ) -> Result<WatchStream<Self>, ConnectError> {
        api.watch_pods(since).await
    }

    async fn listing(api: &dyn ClusterApi) -> Result<Listing<Self>, FetchError> {
        let (nodes, mut listing) = futures::try_join!(api.list_nodes(), api.pod_listing())?;
        layout::layout_pods(&nodes, &mut listing.items);
        Ok(listing)
    }

    async fn locate(&mut self, api: &dyn ClusterApi) {
        match futures::try_join!(api.list_nodes(), api.list_pods()) {
            Ok((nodes, pods)) => {
                let layout = Layout::compute(&nodes, &pods);
                // a deleted pod is gone from the listing; give it the first slot
                self.position = layout.pod(&self.id).unwrap_or_else(|| {
                    layout::pod_position(layout.center_of(&self.node_name), 0, 1)
                });
            }
            Err(e) => warn!(pod = %self.name, error = %e, "Failed to list cluster for layout"),
        }
    }

    fn into_event(self, kind: ChangeKind) -> ClusterEvent {
        ClusterEvent::pod(kind, self)
    }
}

enum StreamEnd {
    Closed,
    SinkClosed,
    Shutdown,
}

enum Reopened<T> {
    Stream(WatchStream<T>),
    Failed,
    SinkClosed,
}

/// Forwards one watch stream into the event sink, resubscribing if configured
///
/// The worker remembers the last resource version it saw. A stream that the
/// server ends (watches time out every few minutes) is reopened from that
/// version straight away. Only when the version has expired does it list the
/// collection again and emit an added event per resource. Backoff and the
/// degraded health state are reserved for streams that cannot be reopened.
pub(super) struct StreamWorker<T> {
    api: Arc<dyn ClusterApi>,
    config: WatchConfig,
    sink: mpsc::Sender<ClusterEvent>,
    outages: Arc<Outages>,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
    _resource: PhantomData<fn() -> T>,
}

impl<T: Watched> StreamWorker<T> {
    pub(super) fn new(
        api: Arc<dyn ClusterApi>,
        config: WatchConfig,
        sink: mpsc::Sender<ClusterEvent>,
        outages: Arc<Outages>,
        metrics: PipelineMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            api,
            config,
            sink,
            outages,
            metrics,
            logger,
            _resource: PhantomData,
        }
    }

    pub(super) async fn run(
        self,
        mut stream: WatchStream<T>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut cursor: Option<String> = None;

        loop {
            match self.forward(&mut stream, &mut cursor, &mut shutdown).await {
                StreamEnd::Shutdown => {
                    debug!(resource = T::RESOURCE, "Watch stopped");
                    return;
                }
                StreamEnd::SinkClosed => {
                    debug!(resource = T::RESOURCE, "Event sink closed, stopping watch");
                    return;
                }
                StreamEnd::Closed if !self.config.resubscribe => {
                    info!(resource = T::RESOURCE, "Watch stream ended");
                    return;
                }
                StreamEnd::Closed => {
                    debug!(resource = T::RESOURCE, version = ?cursor, "Watch stream ended, reopening");
                }
            }

            match self.reopen(&mut cursor).await {
                Reopened::Stream(next) => {
                    stream = next;
                    continue;
                }
                Reopened::SinkClosed => return,
                Reopened::Failed => {}
            }

            self.outages.down(T::RESOURCE).await;
            match self.recover(&mut backoff, &mut cursor, &mut shutdown).await {
                Some(next) => stream = next,
                None => return,
            }
            self.outages.up(T::RESOURCE).await;
        }
    }

    async fn forward(
        &self,
        stream: &mut WatchStream<T>,
        cursor: &mut Option<String>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> StreamEnd {
        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = shutdown.recv() => return StreamEnd::Shutdown,
            };

            let (kind, mut resource) = match next {
                None => return StreamEnd::Closed,
                Some(WatchNotice::Progress(version)) => {
                    *cursor = Some(version);
                    continue;
                }
                Some(WatchNotice::Expired) => {
                    *cursor = None;
                    return StreamEnd::Closed;
                }
                Some(WatchNotice::Change {
                    kind,
                    resource,
                    version,
                }) => {
                    if version.is_some() {
                        *cursor = version;
                    }
                    (kind, resource)
                }
            };

            resource.locate(self.api.as_ref()).await;
            if !self.emit(resource.into_event(kind)).await {
                return StreamEnd::SinkClosed;
            }
        }
    }

    async fn emit(&self, event: ClusterEvent) -> bool {
        let kind = event.kind();
        if self.sink.send(event).await.is_err() {
            return false;
        }
        self.metrics.inc_watch_event(kind);
        true
    }

    /// Reopen after the last seen version, or relist when there is none
    async fn reopen(&self, cursor: &mut Option<String>) -> Reopened<T> {
        let Some(version) = cursor.clone() else {
            return self.relist(cursor).await;
        };

        match T::subscribe(self.api.as_ref(), Some(&version)).await {
            Ok(stream) => {
                self.metrics.inc_watch_restart(T::RESOURCE);
                debug!(resource = T::RESOURCE, version = %version, "Watch resumed");
                Reopened::Stream(stream)
            }
            Err(e) if e.expired => {
                debug!(resource = T::RESOURCE, version = %version, "Resume version expired");
                *cursor = None;
                self.relist(cursor).await
            }
            Err(e) => {
                warn!(resource = T::RESOURCE, error = %e, "Failed to re-establish watch");
                Reopened::Failed
            }
        }
    }

    /// List the collection, watch from the listing's version and emit an
    /// added event for every listed resource
    async fn relist(&self, cursor: &mut Option<String>) -> Reopened<T> {
        let listing = match T::listing(self.api.as_ref()).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(resource = T::RESOURCE, error = %e, "Failed to list for reconciliation");
                return Reopened::Failed;
            }
        };

        let stream = match T::subscribe(self.api.as_ref(), listing.version.as_deref()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(resource = T::RESOURCE, error = %e, "Failed to re-establish watch");
                return Reopened::Failed;
            }
        };
        self.metrics.inc_watch_restart(T::RESOURCE);

        let reconciled = listing.items.len();
        for resource in listing.items {
            if !self.emit(resource.into_event(ChangeKind::Added)).await {
                return Reopened::SinkClosed;
            }
        }
        *cursor = listing.version;
        self.logger.log_watch_resumed(T::RESOURCE, reconciled);
        Reopened::Stream(stream)
    }

    /// Retry [`Self::reopen`] with backoff until it succeeds
    ///
    /// Returns `None` if shutdown was requested or the sink closed.
    async fn recover(
        &self,
        backoff: &mut Backoff,
        cursor: &mut Option<String>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Option<WatchStream<T>> {
        loop {
            let delay = backoff.next_delay();
            self.logger.log_watch_dropped(T::RESOURCE, delay.as_millis());

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => return None,
            }

            match self.reopen(cursor).await {
                Reopened::Stream(stream) => {
                    backoff.reset();
                    return Some(stream);
                }
                Reopened::SinkClosed => return None,
                Reopened::Failed => {}
            }
        }
    }
}
