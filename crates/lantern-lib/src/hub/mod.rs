//! Fan-out broadcast hub
//!
//! The hub owns the subscriber registry inside a single coordination task.
//! Every registry mutation and every broadcast travels to that task as a
//! [`Command`] over one channel, so the registry is never touched
//! concurrently and commands take effect in the order they were issued.
//!
//! Each subscriber gets a bounded outbound queue. Broadcast enqueues with
//! `try_send`; a subscriber whose queue is full is dropped on the spot so
//! that producers and other subscribers never wait on it.

mod subscriber;


pub use subscriber::{PendingSubscriber, SubscriberState, Subscription, Transport};

use crate::error::BroadcastError;
use crate::models::ClusterEvent;
use crate::observability::{PipelineMetrics, StructuredLogger};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// One encoded wire message, shared by every subscriber queue
pub type Frame = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue capacity per subscriber
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

enum Command {
    Register {
        id: SubscriberId,
        queue: mpsc::Sender<Frame>,
    },
    Unregister {
        id: SubscriberId,
    },
    Broadcast {
        frame: Frame,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(flatten)]
    event: &'a ClusterEvent,
    timestamp: DateTime<Utc>,
}

/// Encode an event into its wire representation, stamped with the current time
pub fn encode(event: &ClusterEvent) -> Result<Frame, serde_json::Error> {
    let envelope = Envelope {
        event,
        timestamp: Utc::now(),
    };
    serde_json::to_string(&envelope).map(Frame::from)
}

/// Handle to the hub. Cheap to clone; all clones address the same registry.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    config: HubConfig,
    metrics: PipelineMetrics,
}

impl Hub {
    /// Create a hub handle and the coordination worker that must be run
    pub fn new(config: HubConfig) -> (Self, HubWorker) {
        let (commands, inbox) = mpsc::unbounded_channel();
        let metrics = PipelineMetrics::new();
        let queue_capacity = config.queue_capacity.max(1);

        let hub = Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            config,
            metrics: metrics.clone(),
        };
        let worker = HubWorker {
            inbox,
            subscribers: HashMap::new(),
            queue_capacity,
            metrics,
            logger: StructuredLogger::new("lantern"),
        };

        (hub, worker)
    }

    /// Create a hub and spawn its coordination worker
    pub fn spawn(config: HubConfig) -> (Self, JoinHandle<()>) {
        let (hub, worker) = Self::new(config);
        (hub, tokio::spawn(worker.run()))
    }

    /// Register a new subscriber with a fresh bounded queue
    ///
    /// Returns immediately. If the hub is already shut down the subscription
    /// starts out closed.
    pub fn register(&self) -> Subscription {
        self.connect().register()
    }

    /// Allocate a subscriber ID for a connection still completing its
    /// handshake; it joins the registry on [`PendingSubscriber::register`]
    pub fn connect(&self) -> PendingSubscriber {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        PendingSubscriber::new(id, self.clone())
    }

    fn insert(&self, id: SubscriberId) -> mpsc::Receiver<Frame> {
        let (queue, outbound) = mpsc::channel(self.config.queue_capacity.max(1));
        if self.commands.send(Command::Register { id, queue }).is_err() {
            debug!(subscriber = %id, "Hub closed, subscription starts closed");
        }
        outbound
    }

    /// Remove a subscriber and close its queue. Idempotent.
    pub fn unregister(&self, id: SubscriberId) {
        let _ = self.commands.send(Command::Unregister { id });
    }

    /// Encode `event` once and enqueue it for every registered subscriber
    ///
    /// Never waits on subscribers. Encoding failures are returned and the
    /// event is delivered to no one.
    pub fn broadcast(&self, event: &ClusterEvent) -> Result<(), BroadcastError> {
        let frame = encode(event).map_err(|e| {
            self.metrics.inc_encode_failures();
            e
        })?;
        self.broadcast_frame(frame)
    }

    /// Enqueue an already encoded frame for every registered subscriber
    pub fn broadcast_frame(&self, frame: Frame) -> Result<(), BroadcastError> {
        self.commands
            .send(Command::Broadcast { frame })
            .map_err(|_| BroadcastError::HubClosed)
    }

    /// Number of registered subscribers, after all previously issued commands
    pub async fn subscriber_count(&self) -> Result<usize, BroadcastError> {
        let (reply, count) = oneshot::channel();
        self.commands
            .send(Command::Count { reply })
            .map_err(|_| BroadcastError::HubClosed)?;
        count.await.map_err(|_| BroadcastError::HubClosed)
    }

    /// Stop the coordination worker, closing every subscriber queue
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Broadcast every event arriving on `events` until the channel closes
    pub async fn pump(self, mut events: mpsc::Receiver<ClusterEvent>) {
        while let Some(event) = events.recv().await {
            match self.broadcast(&event) {
                Ok(()) => {}
                Err(BroadcastError::HubClosed) => {
                    debug!("Hub closed, stopping event pump");
                    break;
                }
                Err(e) => {
                    error!(event = event.kind(), error = %e, "Dropping event that failed to encode");
                }
            }
        }
    }
}

/// The hub's single coordination point; owns the subscriber registry
pub struct HubWorker {
    inbox: mpsc::UnboundedReceiver<Command>,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Frame>>,
    queue_capacity: usize,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl HubWorker {
    pub async fn run(mut self) {
        info!("Broadcast hub started");

        while let Some(command) = self.inbox.recv().await {
            match command {
                Command::Register { id, queue } => {
                    self.subscribers.insert(id, queue);
                    debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber registered");
                }
                Command::Unregister { id } => {
                    if self.subscribers.remove(&id).is_some() {
                        debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber unregistered");
                    }
                }
                Command::Broadcast { frame } => self.fan_out(frame),
                Command::Count { reply } => {
                    let _ = reply.send(self.subscribers.len());
                }
                Command::Shutdown => break,
            }
            self.metrics.set_subscribers(self.subscribers.len());
        }

        let closed = self.subscribers.len();
        self.subscribers.clear();
        self.metrics.set_subscribers(0);
        info!(closed_subscribers = closed, "Broadcast hub stopped");
    }

    fn fan_out(&mut self, frame: Frame) {
        let metrics = &self.metrics;
        let logger = &self.logger;
        let capacity = self.queue_capacity;
        self.subscribers
            .retain(|id, queue| match queue.try_send(Frame::clone(&frame)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    logger.log_subscriber_shed(id.as_u64(), capacity);
                    metrics.inc_subscribers_shed();
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %id, "Subscriber queue closed, removing");
                    false
                }
            });
        self.metrics.inc_events_broadcast();
    }
}
