//! Voice-note transcription through an OpenAI-compatible
//! `/audio/transcriptions` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use wabridge_core::error::{BridgeError, Result};
use wabridge_core::provider::ProviderConfig;

use super::openai::{api_base, ApiError};

/// Speech to text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String>;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct OpenAiTranscriber {
    client: Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(provider: &ProviderConfig, model: &str) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}/audio/transcriptions", api_base(provider)),
            api_key: provider.api_key.clone().unwrap_or_default(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String> {
        let size = audio.len();
        // WhatsApp voice notes are OGG/Opus.
        let file_part = reqwest::multipart::Part::bytes(audio)
            .file_name("voice.ogg")
            .mime_str("audio/ogg")?;

        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "json");

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let detail = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| body.chars().take(200).collect());
            return Err(BridgeError::Provider(format!("transcription error ({}): {}", status, detail)));
        }

        let parsed: TranscriptionResponse = serde_json::from_str(&body)?;
        let text = parsed.text.trim().to_string();
        if text.is_empty() {
            return Err(BridgeError::Provider("empty transcription".to_string()));
        }

        info!("🎙️ Transcribed {} bytes into {} chars", size, text.chars().count());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcriber(base: &str) -> OpenAiTranscriber {
        OpenAiTranscriber::new(
            &ProviderConfig {
                api_key: Some("sk-test".into()),
                api_base: Some(base.to_string()),
                ..Default::default()
            },
            "whisper-1",
        )
    }

    #[tokio::test]
    async fn test_transcribe_posts_multipart() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/audio/transcriptions")
            .match_header("authorization", "Bearer sk-test")
            .match_header(
                "content-type",
                mockito::Matcher::Regex("multipart/form-data".to_string()),
            )
            .with_status(200)
            .with_body(r#"{"text":" guardar nota ensayo "}"#)
            .create_async()
            .await;

        let text = transcriber(&server.url()).transcribe(vec![1, 2, 3]).await.unwrap();
        assert_eq!(text, "guardar nota ensayo");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transcribe_empty_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/audio/transcriptions")
            .with_status(200)
            .with_body(r#"{"text":"   "}"#)
            .create_async()
            .await;

        assert!(transcriber(&server.url()).transcribe(vec![0]).await.is_err());
    }
}
