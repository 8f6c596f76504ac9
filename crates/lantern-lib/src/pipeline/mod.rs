//! Producer wiring
//!
//! Producers push [`ClusterEvent`]s into one bounded channel that a pump
//! task drains into the [`Hub`]. The hub is the only consumer; producers
//! never see subscribers.


use crate::error::ConnectError;
use crate::health::{components, HealthRegistry};
use crate::hub::{Hub, HubConfig};
use crate::models::ClusterEvent;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A source of cluster events feeding the hub
#[async_trait]
pub trait Producer: Send {
    /// Name used in logs and errors
    fn name(&self) -> &'static str;

    /// Start producing into `sink`; failure to start is fatal
    async fn spawn(&mut self, sink: mpsc::Sender<ClusterEvent>) -> Result<(), ConnectError>;

    /// Stop producing and release the sink. Safe to call more than once.
    async fn shutdown(&mut self);
}

/// Builder for the running [`Pipeline`]
pub struct PipelineBuilder {
    hub_config: HubConfig,
    event_buffer: usize,
    producers: Vec<Box<dyn Producer>>,
    health: Option<HealthRegistry>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            hub_config: HubConfig::default(),
            event_buffer: 256,
            producers: Vec::new(),
            health: None,
        }
    }

    pub fn hub_config(mut self, config: HubConfig) -> Self {
        self.hub_config = config;
        self
    }

    /// Capacity of the channel between producers and the hub
    pub fn event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size;
        self
    }

    pub fn producer(mut self, producer: impl Producer + 'static) -> Self {
        self.producers.push(Box::new(producer));
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Spawn the hub, start every producer and connect them
    ///
    /// If any producer fails to start, the ones already started are shut
    /// down along with the hub and the error is returned.
    pub async fn start(self) -> Result<Pipeline> {
        let (hub, worker) = Hub::spawn(self.hub_config);
        let (events, inbound) = mpsc::channel(self.event_buffer.max(1));

        let mut started: Vec<Box<dyn Producer>> = Vec::with_capacity(self.producers.len());
        for mut producer in self.producers {
            if let Err(e) = producer.spawn(events.clone()).await {
                for running in started.iter_mut() {
                    running.shutdown().await;
                }
                hub.shutdown();
                let name = producer.name();
                return Err(anyhow::Error::new(e).context(format!("failed to start {name}")));
            }
            info!(producer = producer.name(), "Producer started");
            started.push(producer);
        }
        drop(events);

        let pump = tokio::spawn(hub.clone().pump(inbound));

        if let Some(health) = &self.health {
            health.register(components::HUB).await;
            health.set_ready(true).await;
        }

        Ok(Pipeline {
            hub,
            worker,
            pump,
            producers: started,
            health: self.health,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Running producers, pump and hub
pub struct Pipeline {
    hub: Hub,
    worker: JoinHandle<()>,
    pump: JoinHandle<()>,
    producers: Vec<Box<dyn Producer>>,
    health: Option<HealthRegistry>,
}

impl Pipeline {
    /// Hub handle for registering subscribers
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Stop producers, drain the pump, then close every subscriber
    pub async fn shutdown(mut self) {
        if let Some(health) = &self.health {
            health.set_ready(false).await;
        }

        for producer in self.producers.iter_mut() {
            producer.shutdown().await;
            info!(producer = producer.name(), "Producer stopped");
        }

        if let Err(e) = self.pump.await {
            warn!(error = %e, "Event pump ended abnormally");
        }

        self.hub.shutdown();
        if let Err(e) = self.worker.await {
            warn!(error = %e, "Hub worker ended abnormally");
        }

        if let Some(health) = &self.health {
            health.set_unhealthy(components::HUB, "stopped").await;
        }
    }
}
