//! OpenAI-compatible chat provider: OpenAI, OpenRouter, Groq, Ollama, etc.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use wabridge_core::error::{BridgeError, Result};
use wabridge_core::message::{ChatMessage, LlmResponse, TokenUsage};
use wabridge_core::provider::{ChatRequest, LlmProvider, ProviderConfig};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Chat completions client for any API speaking the OpenAI format.
pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
    api_url: String,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let api_url = format!("{}/chat/completions", api_base(&config));
        Self {
            client: Client::new(),
            config,
            api_url,
        }
    }

    /// Build from config, filling the base URL for known provider names.
    pub fn from_config(config: ProviderConfig) -> Self {
        let api_key = config.api_key.clone().unwrap_or_default();
        match (config.provider.as_str(), config.api_base.is_some()) {
            (_, true) => Self::new(config),
            ("ollama", false) => Self::ollama(&config.model),
            ("openrouter", false) => Self::openrouter(&api_key, &config.model),
            ("groq", false) => Self::groq(&api_key, &config.model),
            _ => Self::new(config),
        }
    }

    pub fn ollama(model: &str) -> Self {
        Self::new(ProviderConfig {
            provider: "ollama".to_string(),
            model: model.to_string(),
            api_key: Some("ollama".to_string()),
            api_base: Some("http://localhost:11434/v1".to_string()),
            ..Default::default()
        })
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self::new(ProviderConfig {
            provider: "openai".to_string(),
            model: model.to_string(),
            api_key: Some(api_key.to_string()),
            api_base: None,
            ..Default::default()
        })
    }

    pub fn openrouter(api_key: &str, model: &str) -> Self {
        Self::new(ProviderConfig {
            provider: "openrouter".to_string(),
            model: model.to_string(),
            api_key: Some(api_key.to_string()),
            api_base: Some("https://openrouter.ai/api/v1".to_string()),
            ..Default::default()
        })
    }

    pub fn groq(api_key: &str, model: &str) -> Self {
        Self::new(ProviderConfig {
            provider: "groq".to_string(),
            model: model.to_string(),
            api_key: Some(api_key.to_string()),
            api_base: Some("https://api.groq.com/openai/v1".to_string()),
            ..Default::default()
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Base URL without a trailing slash.
pub fn api_base(config: &ProviderConfig) -> String {
    config
        .api_base
        .as_deref()
        .unwrap_or(OPENAI_API_BASE)
        .trim_end_matches('/')
        .to_string()
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: String,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    model: String,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

#[derive(Deserialize)]
pub(crate) struct ApiError {
    pub(crate) error: ApiErrorDetail,
}

#[derive(Deserialize)]
pub(crate) struct ApiErrorDetail {
    pub(crate) message: String,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.provider
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, request: ChatRequest) -> Result<LlmResponse> {
        let model = request
            .model
            .unwrap_or_else(|| self.config.model.clone());

        info!("🧠 Calling {} model: {}", self.config.provider, model);

        let mut max_tokens = request.max_tokens;
        if self.config.provider == "groq" {
            // Free tier counts max_tokens against TPM up front.
            max_tokens = max_tokens.min(1024);
        }

        let body = ApiRequest {
            model,
            messages: &request.messages,
            max_tokens,
            temperature: request.temperature,
        };

        let api_key = self.config.api_key.as_deref().unwrap_or("");

        let resp = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let body_text = resp.text().await?;

        debug!("API response status: {}, body length: {}", status, body_text.len());

        if !status.is_success() {
            let detail = serde_json::from_str::<ApiError>(&body_text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| body_text.chars().take(200).collect());
            return Err(BridgeError::Provider(format!(
                "{} API error ({}): {}",
                self.config.provider, status, detail
            )));
        }

        let api_resp: ApiResponse = serde_json::from_str(&body_text).map_err(|e| {
            BridgeError::Provider(format!(
                "Failed to parse response: {} (body: {})",
                e,
                body_text.chars().take(200).collect::<String>()
            ))
        })?;

        let choice = api_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::Provider("No choices in response".to_string()))?;

        let usage = api_resp
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u.total_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: choice.message.content,
            model: api_resp.model,
            usage,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }
}
