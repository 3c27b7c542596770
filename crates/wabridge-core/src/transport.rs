//! Transport traits: abstraction over the WhatsApp client session.
//!
//! A [`TransportFactory`] constructs one fresh session per connection
//! attempt. The session reports what happens to it by pushing
//! [`TransportEvent`]s into the channel it was given, and exposes the
//! outbound operations through [`Transport`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::message::InboundMessage;

/// Named events a WhatsApp session emits.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A login QR token was issued (or regenerated).
    Qr(String),
    /// Credentials accepted; the session is not usable yet.
    Authenticated,
    /// Session usable.
    Ready,
    /// Connection lost.
    Disconnected(String),
    /// Credentials rejected.
    AuthFailure(String),
    Message(InboundMessage),
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Qr(_) => "qr",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected(_) => "disconnected",
            Self::AuthFailure(_) => "auth_failure",
            Self::Message(_) => "message",
        }
    }
}

/// One live WhatsApp session.
///
/// # Example
///
/// ```rust,ignore
/// struct MyTransport;
///
/// #[async_trait]
/// impl Transport for MyTransport {
///     fn name(&self) -> &str { "mine" }
///     async fn send_text(&self, to: &str, body: &str) -> Result<Option<String>> { Ok(None) }
///     async fn download_media(&self, id: &str) -> Result<Vec<u8>> { Ok(vec![]) }
///     async fn logout(&self) -> Result<()> { Ok(()) }
///     async fn release(&self) -> Result<()> { Ok(()) }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport identifier for logs.
    fn name(&self) -> &str;

    /// Submit one text message. Returns the provider message id when known.
    async fn send_text(&self, to: &str, body: &str) -> Result<Option<String>>;

    /// Fetch the media attached to an inbound message.
    async fn download_media(&self, message_id: &str) -> Result<Vec<u8>>;

    /// Unlink the device; the next session has to scan a new QR.
    async fn logout(&self) -> Result<()>;

    /// Tear the session down. Must stop emitting events.
    async fn release(&self) -> Result<()>;
}

/// Builds sessions. Called once per connection attempt.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Construct and initialize a fresh session that reports into `events`.
    async fn connect(&self, events: mpsc::Sender<TransportEvent>) -> Result<Arc<dyn Transport>>;
}
