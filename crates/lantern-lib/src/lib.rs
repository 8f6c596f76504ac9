//! Live cluster state synchronisation for the Lantern frontend
//!
//! This crate provides the core functionality for:
//! - Watching nodes and pods and emitting positioned change events
//! - Polling per-pod (and optionally per-node) resource usage
//! - Deterministic 3D layout of nodes and pods
//! - Fan-out of the event feed to many subscribers with slow-consumer shedding
//! - Health checks and observability

pub mod aggregator;
pub mod cluster;
pub mod error;
pub mod health;
pub mod hub;
pub mod layout;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod poller;
pub mod snapshot;
pub mod units;

pub use aggregator::{ClusterAggregator, WatchConfig, WatchHandle};
pub use cluster::{ClusterApi, KubeClusterApi};
pub use error::{BroadcastError, ConnectError, FetchError, TransportError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use hub::{
    Frame, Hub, HubConfig, PendingSubscriber, SubscriberId, SubscriberState, Subscription,
    Transport,
};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use pipeline::{Pipeline, PipelineBuilder, Producer};
pub use poller::{MetricsPoller, PollerConfig};
pub use snapshot::ClusterSnapshot;
