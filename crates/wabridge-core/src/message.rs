//! Message types: inbound WhatsApp messages and LLM chat messages.

use serde::{Deserialize, Serialize};

/// Kind of an inbound message as reported by the transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Audio,
    Other,
}

impl MessageKind {
    /// Map a provider message type (`chat`, `ptt`, `image`, ...) to a kind.
    pub fn from_provider(kind: &str) -> Self {
        match kind {
            "chat" | "text" | "conversation" => Self::Text,
            "ptt" | "audio" | "voice" => Self::Audio,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Audio => write!(f, "audio"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A message received from WhatsApp. Immutable once produced by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    /// Provider-assigned id.
    pub id: String,
    /// Sender address (e.g. `5215512345678@c.us`).
    pub from: String,
    /// Recipient address (our own number).
    pub to: String,
    pub body: String,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub has_media: bool,
}

impl InboundMessage {
    /// Create a text message stamped with the current time.
    pub fn text(id: &str, from: &str, to: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            body: body.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            kind: MessageKind::Text,
            has_media: false,
        }
    }

    /// Audio note with attached media; transcription fills in the body later.
    pub fn is_voice_note(&self) -> bool {
        self.kind == MessageKind::Audio && self.has_media
    }
}

/// Role in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
        }
    }
}

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: String,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
