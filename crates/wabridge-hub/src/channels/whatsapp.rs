//! WhatsApp transport: connects via HTTP bridge to whatsapp-web.js/Baileys.
//!
//! wabridge doesn't bundle a WhatsApp Web client (that needs a browser or
//! the Noise protocol stack). Instead, it drives a lightweight HTTP bridge
//! that you run separately:
//!
//! ```text
//! [WhatsApp] <--WS--> [whatsapp-web.js bridge :3001] <--HTTP--> [wabridge]
//! ```
//!
//! The bridge exposes:
//! - POST /session/start: (re)initialize the client
//! - POST /session/stop : destroy the client
//! - GET  /status       : `{ state, qr?, reason? }`
//! - GET  /messages     : drain new inbound messages
//! - POST /send         : send a message
//! - POST /logout       : unlink the device
//! - GET  /media/:id    : raw media of an inbound message

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use wabridge_core::config::WhatsAppSettings;
use wabridge_core::error::{BridgeError, Result};
use wabridge_core::message::{InboundMessage, MessageKind};
use wabridge_core::transport::{Transport, TransportEvent, TransportFactory};

/// Session status as reported by the bridge.
#[derive(Debug, Deserialize)]
pub struct BridgeStatus {
    pub state: String,
    #[serde(default)]
    pub qr: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// WhatsApp message from the bridge.
#[derive(Debug, Deserialize)]
pub struct WaMessage {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default = "default_wa_type", rename = "type")]
    pub kind: String,
    #[serde(default, alias = "hasMedia")]
    pub has_media: bool,
}

fn default_wa_type() -> String {
    "chat".to_string()
}

impl From<WaMessage> for InboundMessage {
    fn from(m: WaMessage) -> Self {
        Self {
            id: m.id,
            from: m.from,
            to: m.to,
            body: m.body,
            timestamp: m.timestamp,
            kind: MessageKind::from_provider(&m.kind),
            has_media: m.has_media,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: Option<String>,
}

/// What the poll loop has already reported for the current session.
#[derive(Debug, Default)]
struct Reported {
    qr: Option<String>,
    authenticated: bool,
    ready: bool,
}

/// Decide which events a status poll produces. Returns `true` in the second
/// slot when the session is over and polling must stop.
fn status_events(status: &BridgeStatus, seen: &mut Reported) -> (Vec<TransportEvent>, bool) {
    let mut events = Vec::new();
    match status.state.as_str() {
        "qr" | "awaiting_qr" | "esperando-qr" => {
            if let Some(qr) = status.qr.as_deref().filter(|q| !q.is_empty()) {
                if seen.qr.as_deref() != Some(qr) {
                    seen.qr = Some(qr.to_string());
                    events.push(TransportEvent::Qr(qr.to_string()));
                }
            }
        }
        "authenticated" => {
            if !seen.authenticated {
                seen.authenticated = true;
                events.push(TransportEvent::Authenticated);
            }
        }
        "ready" | "connected" | "conectado" => {
            if !seen.ready {
                seen.ready = true;
                seen.qr = None;
                events.push(TransportEvent::Ready);
            }
        }
        "disconnected" | "desconectado" => {
            let reason = status.reason.clone().unwrap_or_else(|| "bridge disconnected".to_string());
            events.push(TransportEvent::Disconnected(reason));
            return (events, true);
        }
        "auth_failure" | "auth_failed" => {
            let reason = status.reason.clone().unwrap_or_else(|| "credentials rejected".to_string());
            events.push(TransportEvent::AuthFailure(reason));
            return (events, true);
        }
        other => debug!("Bridge state '{}' — nothing to report", other),
    }
    (events, false)
}

/// Default bound for one bridge request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

fn bridge_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Builds bridge sessions.
pub struct BridgeFactory {
    bridge_url: String,
    client_id: String,
    client: reqwest::Client,
    poll_interval_ms: u64,
    max_poll_failures: u32,
}

impl BridgeFactory {
    pub fn new(bridge_url: &str) -> Self {
        Self {
            bridge_url: bridge_url.trim_end_matches('/').to_string(),
            client_id: "wabridge".to_string(),
            client: bridge_client(DEFAULT_REQUEST_TIMEOUT),
            poll_interval_ms: 2000,
            max_poll_failures: 5,
        }
    }

    pub fn from_settings(settings: &WhatsAppSettings) -> Self {
        Self::new(&settings.bridge_url)
            .with_client_id(&settings.client_id)
            .with_poll_interval(settings.poll_interval_ms)
            .with_max_poll_failures(settings.max_poll_failures)
            .with_request_timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
    }

    /// Every bridge call, including `connect` and `send_text`, gives up after `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.client = bridge_client(timeout);
        self
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client_id = client_id.to_string();
        self
    }

    /// Set poll interval in milliseconds.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_poll_failures(mut self, n: u32) -> Self {
        self.max_poll_failures = n.max(1);
        self
    }
}

#[async_trait]
impl TransportFactory for BridgeFactory {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn connect(&self, events: mpsc::Sender<TransportEvent>) -> Result<Arc<dyn Transport>> {
        info!("🔗 Bridge: {}", self.bridge_url);

        let status_url = format!("{}/status", self.bridge_url);
        match self.client.get(&status_url).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => {
                return Err(BridgeError::Transport(format!(
                    "bridge at {} answered {}",
                    self.bridge_url,
                    resp.status()
                )));
            }
            Err(e) => {
                return Err(BridgeError::Transport(format!(
                    "bridge unreachable at {}: {}",
                    self.bridge_url, e
                )));
            }
        }

        let start_url = format!("{}/session/start", self.bridge_url);
        if let Err(e) = self
            .client
            .post(&start_url)
            .json(&serde_json::json!({ "clientId": self.client_id }))
            .send()
            .await
        {
            warn!("⚠️ Bridge /session/start failed: {} — polling anyway", e);
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let bridge_url = self.bridge_url.clone();
        let client = self.client.clone();
        let poll_interval = Duration::from_millis(self.poll_interval_ms);
        let max_failures = self.max_poll_failures;

        tokio::spawn(async move {
            let mut seen = Reported::default();
            let mut failures = 0u32;

            loop {
                if shutdown_rx.try_recv().is_ok() {
                    debug!("Bridge poller released");
                    break;
                }

                match client.get(format!("{}/status", bridge_url)).send().await {
                    Ok(resp) if resp.status().is_success() => match resp.json::<BridgeStatus>().await {
                        Ok(status) => {
                            failures = 0;
                            let (evs, finished) = status_events(&status, &mut seen);
                            let mut receiver_gone = false;
                            for ev in evs {
                                if events.send(ev).await.is_err() {
                                    receiver_gone = true;
                                    break;
                                }
                            }
                            if finished || receiver_gone {
                                break;
                            }
                        }
                        Err(e) => warn!("Bridge sent an unreadable status: {}", e),
                    },
                    _ => {
                        failures += 1;
                        warn!("Bridge unreachable at {} ({}/{})", bridge_url, failures, max_failures);
                        if failures >= max_failures {
                            let _ = events
                                .send(TransportEvent::Disconnected("bridge unreachable".to_string()))
                                .await;
                            break;
                        }
                    }
                }

                if seen.ready {
                    match client.get(format!("{}/messages", bridge_url)).send().await {
                        Ok(resp) if resp.status().is_success() => {
                            match resp.json::<Vec<WaMessage>>().await {
                                Ok(messages) => {
                                    for msg in messages {
                                        if events.send(TransportEvent::Message(msg.into())).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Err(e) => warn!("Bridge sent unreadable messages: {}", e),
                            }
                        }
                        Ok(resp) => warn!("Bridge /messages answered {}", resp.status()),
                        Err(e) => warn!("Bridge /messages failed: {}", e),
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown_rx.recv() => {
                        debug!("Bridge poller released");
                        break;
                    }
                }
            }
        });

        Ok(Arc::new(BridgeTransport {
            bridge_url: self.bridge_url.clone(),
            client: self.client.clone(),
            shutdown_tx,
        }))
    }
}

/// One bridge session.
pub struct BridgeTransport {
    bridge_url: String,
    client: reqwest::Client,
    shutdown_tx: mpsc::Sender<()>,
}

impl BridgeTransport {
    async fn post_ok(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(format!("{}{}", self.bridge_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Transport(format!(
                "bridge {} answered {}: {}",
                path,
                status,
                text.chars().take(200).collect::<String>()
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<Option<String>> {
        let resp = self
            .post_ok("/send", serde_json::json!({ "to": to, "message": body }))
            .await?;
        Ok(resp.json::<SendResponse>().await.ok().and_then(|r| r.id))
    }

    async fn download_media(&self, message_id: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(format!("{}/media/{}", self.bridge_url, message_id))
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BridgeError::Transport(format!(
                "media {} unavailable ({})",
                message_id,
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn logout(&self) -> Result<()> {
        self.post_ok("/logout", serde_json::json!({})).await?;
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        let _ = self.shutdown_tx.try_send(());
        self.post_ok("/session/stop", serde_json::json!({})).await?;
        Ok(())
    }
}
