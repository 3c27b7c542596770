//! Outbound send gateway: the only path that submits messages.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use wabridge_core::error::{BridgeError, Result};
use wabridge_core::phone::PhoneNormalizer;

use crate::manager::ConnectionManager;

/// Longest body submitted; longer bodies are cut, not rejected.
pub const MAX_BODY_CHARS: usize = 4096;

/// Body used when the caller sends nothing.
pub const DEFAULT_BODY: &str = "Mensaje de prueba";

/// What was actually sent.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SentConfirmation {
    /// Canonical provider address used.
    pub to: String,
    pub message_id: Option<String>,
    pub truncated: bool,
}

/// Validates destinations and submits through the active session.
pub struct SendGateway {
    manager: Arc<ConnectionManager>,
    normalizer: PhoneNormalizer,
}

impl SendGateway {
    pub fn new(manager: Arc<ConnectionManager>, normalizer: PhoneNormalizer) -> Self {
        Self {
            manager,
            normalizer,
        }
    }

    /// Send to a raw phone number.
    pub async fn send(&self, raw_destination: &str, body: &str) -> Result<SentConfirmation> {
        if !self.manager.current_state().await.is_ready() {
            return Err(BridgeError::NotConnected);
        }
        let address = self.normalizer.normalize(raw_destination)?;
        self.submit(&address.jid, body).await
    }

    /// Reply to an address the transport handed us (groups included).
    pub async fn reply_to(&self, address: &str, body: &str) -> Result<SentConfirmation> {
        if !self.manager.current_state().await.is_ready() {
            return Err(BridgeError::NotConnected);
        }
        if address.trim().is_empty() {
            return Err(BridgeError::InvalidAddress("empty reply address".into()));
        }
        self.submit(address, body).await
    }

    async fn submit(&self, to: &str, body: &str) -> Result<SentConfirmation> {
        let transport = self
            .manager
            .active_transport()
            .await
            .ok_or(BridgeError::NotConnected)?;

        let (body, truncated) = truncate_body(body);
        if truncated {
            warn!("✂️  Body for {} truncated to {} chars", to, MAX_BODY_CHARS);
        }

        let message_id = transport.send_text(to, &body).await.map_err(|e| match e {
            BridgeError::Transport(_) => e,
            other => BridgeError::Transport(other.to_string()),
        })?;

        info!("📤 → {} ({} chars)", to, body.chars().count());
        Ok(SentConfirmation {
            to: to.to_string(),
            message_id,
            truncated,
        })
    }

    pub fn normalizer(&self) -> &PhoneNormalizer {
        &self.normalizer
    }
}

/// Cap a body at [`MAX_BODY_CHARS`] characters; empty becomes [`DEFAULT_BODY`].
pub fn truncate_body(body: &str) -> (String, bool) {
    if body.trim().is_empty() {
        return (DEFAULT_BODY.to_string(), false);
    }
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => (body[..idx].to_string(), true),
        None => (body.to_string(), false),
    }
}
