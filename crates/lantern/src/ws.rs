//! WebSocket subscribers
//!
//! Each connection gets a subscriber ID when the upgrade is requested and
//! joins the hub's registry once the handshake completes. Its delivery loop
//! is the only writer to the socket; the connection task only reads, to
//! notice the client going away.

use crate::api::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use lantern_lib::{Frame, PendingSubscriber, Transport, TransportError};
use std::sync::Arc;
use tracing::debug;

/// Write half of a WebSocket as a hub transport
pub struct WebSocketTransport {
    sink: SplitSink<WebSocket, Message>,
}

impl WebSocketTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(TransportError::send)
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

/// WebSocket upgrade handler
///
/// A failed handshake drops the pending subscriber, which never enters the
/// registry.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pending = state.hub.connect();
    debug!(subscriber = %pending.id(), state = ?pending.state(), "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, pending, state))
}

async fn handle_socket(socket: WebSocket, pending: PendingSubscriber, state: Arc<AppState>) {
    let (sink, mut inbound) = socket.split();

    let subscription = pending.register();
    let id = subscription.id();
    state.logger.log_subscriber_connected(id.as_u64());

    let mut delivery = tokio::spawn(subscription.deliver(WebSocketTransport::new(sink)));

    let reason = tokio::select! {
        ended = &mut delivery => match ended {
            Ok(Ok(())) => "queue closed",
            Ok(Err(_)) => "write failed",
            Err(_) => "delivery aborted",
        },
        reason = read_until_close(&mut inbound) => {
            // closes the queue, which ends delivery and closes the socket
            state.hub.unregister(id);
            let _ = delivery.await;
            reason
        }
    };

    state.logger.log_subscriber_disconnected(id.as_u64(), reason);
}

async fn read_until_close(inbound: &mut SplitStream<WebSocket>) -> &'static str {
    while let Some(message) = inbound.next().await {
        match message {
            Ok(Message::Close(_)) => return "client closed",
            Ok(_) => debug!("Ignoring inbound WebSocket message"),
            Err(e) => {
                debug!(error = %e, "WebSocket read failed");
                return "read error";
            }
        }
    }
    "connection ended"
}
