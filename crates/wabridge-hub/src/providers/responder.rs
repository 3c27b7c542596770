//! AI fallback replies for messages that are not commands.

use std::sync::Arc;

use tracing::debug;

use wabridge_core::error::{BridgeError, Result};
use wabridge_core::message::ChatMessage;
use wabridge_core::provider::{ChatRequest, LlmProvider};

/// System prompt + user text → one reply. Stateless per message.
pub struct Responder {
    provider: Arc<dyn LlmProvider>,
    system_prompt: String,
    max_tokens: u32,
    temperature: f32,
}

impl Responder {
    pub fn new(provider: Arc<dyn LlmProvider>, system_prompt: &str) -> Self {
        let defaults = ChatRequest::default();
        Self {
            provider,
            system_prompt: system_prompt.to_string(),
            max_tokens: defaults.max_tokens,
            temperature: defaults.temperature,
        }
    }

    pub fn with_limits(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub async fn respond(&self, user_text: &str) -> Result<String> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(&self.system_prompt),
                ChatMessage::user(user_text),
            ],
            model: None,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let resp = self.provider.chat(request).await?;
        debug!(
            "AI reply from {} ({} tokens)",
            resp.model, resp.usage.total_tokens
        );

        resp.content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BridgeError::Provider("empty completion".to_string()))
    }
}
