//! Event Bus: async message passing between the connection manager,
//! the message handler and anything watching the connection state.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::lifecycle::ConnectionState;
use crate::message::InboundMessage;

/// A lifecycle transition, published after it has been applied.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub generation: u64,
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// Raw QR token when the new state is `awaiting_qr`.
    pub qr_token: Option<String>,
    pub reason: Option<String>,
}

impl StateChange {
    /// Human-readable status line for logs and the CLI.
    pub fn format_status(&self) -> String {
        match self.to {
            ConnectionState::Starting => "⏳ Starting...".to_string(),
            ConnectionState::Connecting => "🔄 Connecting to WhatsApp...".to_string(),
            ConnectionState::AwaitingQr => "📷 New QR code — scan it from WhatsApp > Linked devices".to_string(),
            ConnectionState::Ready => "✅ WhatsApp ready".to_string(),
            ConnectionState::Disconnected => format!(
                "⚠️  Disconnected: {}",
                self.reason.as_deref().unwrap_or("unknown reason")
            ),
            ConnectionState::AuthFailed => format!(
                "❌ Authentication failed: {} — restart required",
                self.reason.as_deref().unwrap_or("unknown reason")
            ),
        }
    }
}

/// The event bus.
///
/// Inbound messages go through a single-consumer queue; state changes are
/// broadcast to any number of watchers.
pub struct EventBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Arc<Mutex<mpsc::Receiver<InboundMessage>>>,
    state_tx: broadcast::Sender<StateChange>,
}

impl EventBus {
    pub fn new(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        let (state_tx, _) = broadcast::channel(buffer_size);

        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            state_tx,
        }
    }

    /// Publish an inbound message (transport → handler).
    pub async fn publish_inbound(&self, msg: InboundMessage) {
        if let Err(e) = self.inbound_tx.send(msg).await {
            tracing::error!("Failed to publish inbound: {}", e);
        }
    }

    /// Receive the next inbound message (handler consumes).
    pub async fn recv_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Publish a state change. Nobody listening is fine.
    pub fn publish_state(&self, change: StateChange) {
        let _ = self.state_tx.send(change);
    }

    /// Subscribe to state changes.
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inbound_roundtrip_and_state_broadcast() {
        let bus = EventBus::new(8);
        let mut watcher = bus.subscribe_state();

        bus.publish_inbound(InboundMessage::text("1", "a@c.us", "b@c.us", "hola")).await;
        let got = bus.recv_inbound().await.unwrap();
        assert_eq!(got.body, "hola");

        bus.publish_state(StateChange {
            generation: 1,
            from: ConnectionState::Connecting,
            to: ConnectionState::Ready,
            qr_token: None,
            reason: None,
        });
        let change = watcher.recv().await.unwrap();
        assert_eq!(change.to, ConnectionState::Ready);
        assert!(change.format_status().contains("ready"));
    }
}
