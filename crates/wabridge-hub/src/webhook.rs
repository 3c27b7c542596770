//! Incoming-message webhook: forwards every inbound message to the backend.
//!
//! At-most-once: no retry, no queue. A slow or dead webhook never delays
//! the reply path.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error};

use wabridge_core::config::WebhookSettings;
use wabridge_core::error::{BridgeError, Result};
use wabridge_core::message::InboundMessage;

/// JSON body posted to the webhook.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebhookPayload {
    pub from: String,
    pub to: String,
    pub body: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(rename = "hasMedia")]
    pub has_media: bool,
}

impl From<&InboundMessage> for WebhookPayload {
    fn from(msg: &InboundMessage) -> Self {
        Self {
            from: msg.from.clone(),
            to: msg.to.clone(),
            body: msg.body.clone(),
            timestamp: msg.timestamp,
            kind: msg.kind.to_string(),
            id: msg.id.clone(),
            has_media: msg.has_media,
        }
    }
}

pub struct WebhookForwarder {
    client: reqwest::Client,
    url: Option<String>,
    timeout: Duration,
}

impl WebhookForwarder {
    pub fn new(settings: &WebhookSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: settings.active_url().map(str::to_string),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Post one message. Does nothing when forwarding is off.
    pub async fn forward(&self, msg: &InboundMessage) -> Result<()> {
        let Some(url) = &self.url else {
            return Ok(());
        };

        let resp = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&WebhookPayload::from(msg))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(BridgeError::BackendUnavailable(format!(
                "webhook answered {}",
                resp.status()
            )));
        }
        debug!("🪝 Forwarded {} to webhook", msg.id);
        Ok(())
    }

    /// Forward on a separate task; errors are logged and dropped.
    pub fn spawn_forward(self: &Arc<Self>, msg: InboundMessage) {
        if !self.is_enabled() {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.forward(&msg).await {
                error!("🪝 Webhook error for {}: {}", msg.id, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wabridge_core::message::MessageKind;

    fn settings(url: Option<String>) -> WebhookSettings {
        WebhookSettings {
            enabled: true,
            url,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_payload_field_names() {
        let mut msg = InboundMessage::text("ABC", "5215512345678@c.us", "me@c.us", "hola");
        msg.kind = MessageKind::Audio;
        msg.has_media = true;

        let json = serde_json::to_value(WebhookPayload::from(&msg)).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["hasMedia"], true);
        assert_eq!(json["from"], "5215512345678@c.us");
        assert_eq!(json["id"], "ABC");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn test_disabled_without_url_or_flag() {
        assert!(!WebhookForwarder::new(&settings(None)).is_enabled());

        let mut off = settings(Some("http://localhost/hook".into()));
        off.enabled = false;
        assert!(!WebhookForwarder::new(&off).is_enabled());
    }

    #[tokio::test]
    async fn test_forward_posts_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"from":"a@c.us","body":"hola","type":"text","hasMedia":false}"#.to_string(),
            ))
            .with_status(200)
            .create_async()
            .await;

        let fwd = WebhookForwarder::new(&settings(Some(format!("{}/hook", server.url()))));
        fwd.forward(&InboundMessage::text("1", "a@c.us", "me@c.us", "hola"))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_forward_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/hook").with_status(500).create_async().await;

        let fwd = WebhookForwarder::new(&settings(Some(format!("{}/hook", server.url()))));
        let err = fwd
            .forward(&InboundMessage::text("1", "a@c.us", "me@c.us", "hola"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::BackendUnavailable(_)));
    }
}
