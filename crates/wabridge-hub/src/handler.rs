//! Inbound message handler: webhook, transcription, routing, reply.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use wabridge_core::bus::EventBus;
use wabridge_core::message::InboundMessage;

use crate::gateway::SendGateway;
use crate::manager::ConnectionManager;
use crate::providers::{Responder, Transcriber};
use crate::router::{CommandOutcome, CommandRouter};
use crate::webhook::WebhookForwarder;

pub const NOT_UNDERSTOOD_REPLY: &str =
    "🤖 No entendí tu mensaje. Escribe *ayuda* para ver los comandos disponibles.";

pub const AUDIO_FAILED_REPLY: &str =
    "🎙️ No pude entender tu nota de voz. ¿Puedes escribir tu mensaje?";

/// Consumes inbound messages from the bus, one task per message.
pub struct MessageHandler {
    manager: Arc<ConnectionManager>,
    gateway: Arc<SendGateway>,
    router: Arc<CommandRouter>,
    webhook: Arc<WebhookForwarder>,
    responder: Option<Arc<Responder>>,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl MessageHandler {
    pub fn new(
        manager: Arc<ConnectionManager>,
        gateway: Arc<SendGateway>,
        router: Arc<CommandRouter>,
        webhook: Arc<WebhookForwarder>,
    ) -> Self {
        Self {
            manager,
            gateway,
            router,
            webhook,
            responder: None,
            transcriber: None,
        }
    }

    pub fn with_responder(mut self, responder: Arc<Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Run until the bus closes.
    pub async fn run(self: Arc<Self>, bus: Arc<EventBus>) {
        info!("📨 Message handler started");
        while let Some(msg) = bus.recv_inbound().await {
            let this = self.clone();
            tokio::spawn(async move { this.handle(msg).await });
        }
        info!("📨 Message handler stopped");
    }

    /// Process one message end to end.
    pub async fn handle(&self, mut msg: InboundMessage) {
        self.webhook.spawn_forward(msg.clone());

        if msg.is_voice_note() {
            if let Some(transcriber) = &self.transcriber {
                match self.transcribe(transcriber.as_ref(), &msg).await {
                    Some(text) => msg.body = text,
                    None => {
                        self.send_reply(&msg.from, AUDIO_FAILED_REPLY).await;
                        return;
                    }
                }
            }
        }

        if msg.body.trim().is_empty() {
            debug!("Ignoring empty {} message {}", msg.kind, msg.id);
            return;
        }

        info!("💬 {} → {}", msg.from, preview(&msg.body));

        let reply = match self.router.dispatch(&msg.from, &msg.body).await {
            CommandOutcome::Reply(text) => text,
            CommandOutcome::Unrecognized => self.fallback(&msg.body).await,
        };

        self.send_reply(&msg.from, &reply).await;
    }

    async fn transcribe(&self, transcriber: &dyn Transcriber, msg: &InboundMessage) -> Option<String> {
        let Some(transport) = self.manager.active_transport().await else {
            warn!("Voice note {} arrived while not ready", msg.id);
            return None;
        };
        let audio = match transport.download_media(&msg.id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("🎙️ Media download failed for {}: {}", msg.id, e);
                return None;
            }
        };
        match transcriber.transcribe(audio).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("🎙️ Transcription failed for {}: {}", msg.id, e);
                None
            }
        }
    }

    async fn fallback(&self, text: &str) -> String {
        let Some(responder) = &self.responder else {
            return NOT_UNDERSTOOD_REPLY.to_string();
        };
        match responder.respond(text).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("AI reply failed: {}", e);
                NOT_UNDERSTOOD_REPLY.to_string()
            }
        }
    }

    async fn send_reply(&self, to: &str, text: &str) {
        if let Err(e) = self.gateway.reply_to(to, text).await {
            error!("❌ Reply to {} failed: {}", to, e);
        }
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(60).collect();
    if text.chars().count() > 60 {
        out.push('…');
    }
    out
}
