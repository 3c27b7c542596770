//! Stub transport: WhatsApp disabled.
//!
//! Every session reports `Ready` right away and outbound messages are only
//! logged and recorded. Useful for running the HTTP API and the backend
//! integration without a phone, and for driving the connection manager
//! with synthetic events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use wabridge_core::error::{BridgeError, Result};
use wabridge_core::transport::{Transport, TransportEvent, TransportFactory};

/// A message the stub pretended to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub to: String,
    pub body: String,
}

#[derive(Default)]
struct StubShared {
    sessions: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    sent: Mutex<Vec<SentRecord>>,
    connects: AtomicUsize,
    releases: AtomicUsize,
    logouts: AtomicUsize,
    fail_sends: AtomicBool,
    fail_connects: AtomicBool,
}

/// Inspect and steer stub sessions from the outside.
#[derive(Clone)]
pub struct StubHandle {
    shared: Arc<StubShared>,
}

impl StubHandle {
    /// Push an event into the most recent session.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let sender = self.shared.sessions.lock().await.last().cloned();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Push an event into session `index` (0 = first ever constructed).
    pub async fn emit_to(&self, index: usize, event: TransportEvent) -> bool {
        let sender = self.shared.sessions.lock().await.get(index).cloned();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Sessions constructed so far.
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.shared.releases.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.shared.logouts.load(Ordering::SeqCst)
    }

    pub async fn sent(&self) -> Vec<SentRecord> {
        self.shared.sent.lock().await.clone()
    }

    /// Make every `send_text` fail with a transport error.
    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make every `connect` fail.
    pub fn fail_connects(&self, fail: bool) {
        self.shared.fail_connects.store(fail, Ordering::SeqCst);
    }
}

/// Builds stub sessions.
pub struct StubFactory {
    shared: Arc<StubShared>,
    auto_ready: bool,
}

impl StubFactory {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(StubShared::default()),
            auto_ready: true,
        }
    }

    /// Leave sessions in `connecting` until an event is injected.
    pub fn manual(mut self) -> Self {
        self.auto_ready = false;
        self
    }

    pub fn handle(&self) -> StubHandle {
        StubHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Default for StubFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for StubFactory {
    fn name(&self) -> &str {
        "stub"
    }

    async fn connect(&self, events: mpsc::Sender<TransportEvent>) -> Result<Arc<dyn Transport>> {
        if self.shared.fail_connects.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("stub connect refused".to_string()));
        }
        let n = self.shared.connects.fetch_add(1, Ordering::SeqCst) + 1;
        info!("🧪 Stub WhatsApp session #{} (messages are only logged)", n);

        if self.auto_ready {
            let _ = events.send(TransportEvent::Ready).await;
        }
        self.shared.sessions.lock().await.push(events);

        Ok(Arc::new(StubTransport {
            shared: self.shared.clone(),
        }))
    }
}

/// One stub session.
pub struct StubTransport {
    shared: Arc<StubShared>,
}

#[async_trait]
impl Transport for StubTransport {
    fn name(&self) -> &str {
        "stub"
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<Option<String>> {
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport("stub send failure".to_string()));
        }
        info!("🧪 [stub] → {}: {}", to, body);
        self.shared.sent.lock().await.push(SentRecord {
            to: to.to_string(),
            body: body.to_string(),
        });
        Ok(Some(format!("stub-{}", uuid::Uuid::new_v4())))
    }

    async fn download_media(&self, message_id: &str) -> Result<Vec<u8>> {
        Err(BridgeError::Transport(format!("stub has no media for {}", message_id)))
    }

    async fn logout(&self) -> Result<()> {
        self.shared.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        self.shared.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
