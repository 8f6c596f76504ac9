//! Subscriber side of the hub: outbound queue and single-writer delivery

use super::{Frame, Hub, SubscriberId};
use crate::error::TransportError;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Lifecycle of one subscriber connection
///
/// `Connecting -> Registered -> (Active <-> Draining) -> Closed`
///
/// A connection that never finishes its handshake goes from `Connecting`
/// straight to `Closed` without touching the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Transport handshake in progress; no subscription exists yet
    Connecting,
    /// Queue allocated and present in the registry, delivery not started
    Registered,
    /// Delivery running, waiting for the queue to be non-empty
    Active,
    /// Delivery writing queued frames to the transport
    Draining,
    /// Queue closed and transport released
    Closed,
}

/// Outbound side of a subscriber's transport
#[async_trait]
pub trait Transport: Send {
    /// Write one frame; an error drops the subscriber
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Release the transport once delivery has ended
    async fn close(&mut self) {}
}

/// In-process subscribers receive frames over a channel
#[async_trait]
impl Transport for mpsc::Sender<Frame> {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        mpsc::Sender::send(self, frame)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// A subscriber whose transport is still being set up
///
/// It has an ID but no queue and is not in the registry, so broadcasts skip
/// it. Dropping it abandons the connection.
pub struct PendingSubscriber {
    id: SubscriberId,
    hub: Hub,
    // taken on registration
    state: Option<watch::Sender<SubscriberState>>,
}

impl PendingSubscriber {
    pub(super) fn new(id: SubscriberId, hub: Hub) -> Self {
        let (state, _) = watch::channel(SubscriberState::Connecting);
        Self {
            id,
            hub,
            state: Some(state),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn state(&self) -> SubscriberState {
        self.state
            .as_ref()
            .map_or(SubscriberState::Closed, |state| *state.borrow())
    }

    pub fn watch_state(&self) -> Option<watch::Receiver<SubscriberState>> {
        self.state.as_ref().map(watch::Sender::subscribe)
    }

    /// Enter the registry now that the transport is ready
    pub fn register(mut self) -> Subscription {
        let state = self
            .state
            .take()
            .unwrap_or_else(|| watch::channel(SubscriberState::Connecting).0);
        state.send_replace(SubscriberState::Registered);
        let outbound = self.hub.insert(self.id);
        Subscription::new(self.id, outbound, self.hub.clone(), state)
    }
}

impl Drop for PendingSubscriber {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            debug!(subscriber = %self.id, "Subscriber abandoned before registering");
            state.send_replace(SubscriberState::Closed);
        }
    }
}

/// A registered subscriber. Dropping it unregisters it from the hub.
pub struct Subscription {
    id: SubscriberId,
    outbound: mpsc::Receiver<Frame>,
    hub: Hub,
    state: watch::Sender<SubscriberState>,
}

impl Subscription {
    fn new(
        id: SubscriberId,
        outbound: mpsc::Receiver<Frame>,
        hub: Hub,
        state: watch::Sender<SubscriberState>,
    ) -> Self {
        Self {
            id,
            outbound,
            hub,
            state,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    /// Observe state transitions, e.g. from the connection handler
    pub fn watch_state(&self) -> watch::Receiver<SubscriberState> {
        self.state.subscribe()
    }

    /// Next queued frame; `None` once the hub has closed the queue
    pub async fn recv(&mut self) -> Option<Frame> {
        self.outbound.recv().await
    }

    /// Next queued frame without waiting
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.outbound.try_recv().ok()
    }

    /// Drain the queue into `transport` in FIFO order until the queue closes
    /// or a write fails
    ///
    /// This is the only writer for the transport. A write failure unregisters
    /// the subscriber and is returned; a closed queue (unregistered, shed, or
    /// hub shutdown) ends delivery with `Ok`.
    pub async fn deliver<T: Transport>(mut self, mut transport: T) -> Result<(), TransportError> {
        self.state.send_replace(SubscriberState::Active);

        let result = loop {
            let Some(first) = self.outbound.recv().await else {
                break Ok(());
            };

            self.state.send_replace(SubscriberState::Draining);
            if let Err(e) = self.drain(&mut transport, first).await {
                break Err(e);
            }
            self.state.send_replace(SubscriberState::Active);
        };

        match &result {
            Ok(()) => debug!(subscriber = %self.id, "Subscriber queue closed"),
            Err(e) => {
                warn!(subscriber = %self.id, error = %e, "Transport write failed, dropping subscriber");
                self.hub.unregister(self.id);
            }
        }

        self.outbound.close();
        transport.close().await;
        self.state.send_replace(SubscriberState::Closed);

        result
    }

    async fn drain<T: Transport>(
        &mut self,
        transport: &mut T,
        first: Frame,
    ) -> Result<(), TransportError> {
        transport.send(first).await?;
        while let Ok(frame) = self.outbound.try_recv() {
            transport.send(frame).await?;
        }
        Ok(())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}
