//! Configuration management for wabridge.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::provider::ProviderConfig;

/// Top-level wabridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub whatsapp: WhatsAppSettings,

    /// Incoming-message webhook (the PHP endpoint).
    #[serde(default)]
    pub webhook: WebhookSettings,

    /// Backend that executes keyword commands and owns reminders.
    #[serde(default)]
    pub backend: BackendSettings,

    /// Fallback replies from a hosted model.
    #[serde(default)]
    pub ai: AiSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Token required by `/logout` and `/restart`.
    #[serde(default = "default_admin_token")]
    pub admin_token: String,
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: usize,
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,
    /// Key the rate limiter on `x-forwarded-for`. Only safe behind a proxy
    /// that overwrites the header.
    #[serde(default)]
    pub trust_proxy: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_admin_token() -> String {
    "change-this-token".to_string()
}

fn default_rate_limit_max() -> usize {
    60
}

fn default_rate_limit_window() -> u64 {
    30
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admin_token: default_admin_token(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_secs: default_rate_limit_window(),
            trust_proxy: false,
        }
    }
}

/// Which transport backs the WhatsApp session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// External whatsapp-web.js / Baileys HTTP bridge.
    #[default]
    Bridge,
    /// WhatsApp disabled; everything is logged locally.
    Stub,
}

impl FromStr for TransportMode {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bridge" => Ok(Self::Bridge),
            "stub" | "disabled" => Ok(Self::Stub),
            other => Err(BridgeError::Config(format!("Unknown transport mode: {}", other))),
        }
    }
}

/// WhatsApp session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppSettings {
    #[serde(default)]
    pub mode: TransportMode,
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    /// Session name handed to the bridge.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Consecutive failed polls before the session counts as disconnected.
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,
    /// Upper bound for every single request to the bridge.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_secs: u64,
    /// Country calling code prepended to national numbers.
    #[serde(default = "default_country_code")]
    pub country_code: String,
}

fn default_bridge_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_client_id() -> String {
    "musicmentor".to_string()
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_max_poll_failures() -> u32 {
    5
}

fn default_request_timeout() -> u64 {
    15
}

fn default_reconnect_delay() -> u64 {
    6
}

fn default_reconnect_max_delay() -> u64 {
    60
}

fn default_country_code() -> String {
    "52".to_string()
}

impl Default for WhatsAppSettings {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            bridge_url: default_bridge_url(),
            client_id: default_client_id(),
            poll_interval_ms: default_poll_interval(),
            max_poll_failures: default_max_poll_failures(),
            request_timeout_secs: default_request_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            reconnect_max_delay_secs: default_reconnect_max_delay(),
            country_code: default_country_code(),
        }
    }
}

/// Incoming-message webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    5
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl WebhookSettings {
    /// URL to post to, if forwarding is on.
    pub fn active_url(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

/// Backend sub-paths, one per command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPaths {
    #[serde(default = "default_save_note_path")]
    pub save_note: String,
    #[serde(default = "default_recall_notes_path")]
    pub recall_notes: String,
    #[serde(default = "default_list_notes_path")]
    pub list_notes: String,
    #[serde(default = "default_flush_pending_path")]
    pub flush_pending: String,
    #[serde(default = "default_help_path")]
    pub help: String,
}

fn default_save_note_path() -> String {
    "notes/save".to_string()
}

fn default_recall_notes_path() -> String {
    "notes/recall".to_string()
}

fn default_list_notes_path() -> String {
    "notes/list".to_string()
}

fn default_flush_pending_path() -> String {
    "reminders/flush".to_string()
}

fn default_help_path() -> String {
    "help".to_string()
}

impl Default for CommandPaths {
    fn default() -> Self {
        Self {
            save_note: default_save_note_path(),
            recall_notes: default_recall_notes_path(),
            list_notes: default_list_notes_path(),
            flush_pending: default_flush_pending_path(),
            help: default_help_path(),
        }
    }
}

/// Command backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    pub base_url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub paths: CommandPaths,
    /// Polled by the scheduler; answers with due reminders.
    #[serde(default = "default_reminders_path")]
    pub reminders_path: String,
}

fn default_reminders_path() -> String {
    "reminders/due".to_string()
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout(),
            paths: CommandPaths::default(),
            reminders_path: default_reminders_path(),
        }
    }
}

impl BackendSettings {
    /// Join the base URL with a sub-path.
    pub fn url_for(&self, path: &str) -> Option<String> {
        let base = self.base_url.as_deref()?.trim();
        if base.is_empty() {
            return None;
        }
        Some(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// AI fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Transcribe voice notes before routing them.
    #[serde(default)]
    pub transcribe_audio: bool,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default)]
    pub provider: ProviderConfig,
}

fn default_system_prompt() -> String {
    "Eres MusicMentor, un asistente de WhatsApp amable y breve. Responde en español \
     con mensajes cortos. Si te piden guardar notas, sugiere usar 'guardar <texto>'."
        .to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            system_prompt: default_system_prompt(),
            transcribe_audio: false,
            transcription_model: default_transcription_model(),
            provider: ProviderConfig::default(),
        }
    }
}

/// Keep-alive / reminder job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cron expression with a seconds field.
    #[serde(default = "default_keep_alive_cron")]
    pub keep_alive_cron: String,
    /// Pause between reminder sends.
    #[serde(default = "default_send_delay")]
    pub send_delay_ms: u64,
}

fn default_keep_alive_cron() -> String {
    "0 */5 * * * *".to_string()
}

fn default_send_delay() -> u64 {
    2000
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_alive_cron: default_keep_alive_cron(),
            send_delay_ms: default_send_delay(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Write daily-rolling log files here instead of stdout.
    pub dir: Option<String>,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

impl BridgeConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wabridge")
            .join("config.toml")
    }

    /// Reject settings that would only fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.whatsapp.mode == TransportMode::Bridge && self.whatsapp.bridge_url.trim().is_empty() {
            return Err(BridgeError::Config("whatsapp.bridge_url is required in bridge mode".into()));
        }
        if self.whatsapp.request_timeout_secs == 0 {
            return Err(BridgeError::Config("whatsapp.request_timeout_secs must be > 0".into()));
        }
        if self.whatsapp.reconnect_delay_secs == 0 {
            return Err(BridgeError::Config("whatsapp.reconnect_delay_secs must be > 0".into()));
        }
        if self.whatsapp.reconnect_max_delay_secs < self.whatsapp.reconnect_delay_secs {
            return Err(BridgeError::Config(
                "whatsapp.reconnect_max_delay_secs must be >= reconnect_delay_secs".into(),
            ));
        }
        if self.scheduler.enabled {
            cron::Schedule::from_str(&self.scheduler.keep_alive_cron).map_err(|e| {
                BridgeError::Config(format!(
                    "Invalid scheduler.keep_alive_cron '{}': {}",
                    self.scheduler.keep_alive_cron, e
                ))
            })?;
        }
        if self.ai.enabled
            && self.ai.provider.provider != "ollama"
            && self.ai.provider.api_key.as_deref().unwrap_or("").is_empty()
        {
            return Err(BridgeError::Config("ai.provider.api_key is required when ai.enabled".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = BridgeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.whatsapp.reconnect_delay_secs, 6);
        assert_eq!(cfg.whatsapp.country_code, "52");
        assert_eq!(cfg.whatsapp.request_timeout_secs, 15);
        assert!(!cfg.server.trust_proxy);
        assert!(cfg.webhook.active_url().is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: BridgeConfig = toml::from_str(
            r#"
            [server]
            port = 8080

            [whatsapp]
            mode = "stub"

            [webhook]
            url = "https://example.com/api/whatsapp-webhook.php"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.whatsapp.mode, TransportMode::Stub);
        assert_eq!(
            cfg.webhook.active_url(),
            Some("https://example.com/api/whatsapp-webhook.php")
        );
        assert_eq!(cfg.backend.paths.save_note, "notes/save");
    }

    #[test]
    fn test_disabled_webhook_has_no_url() {
        let settings = WebhookSettings {
            enabled: false,
            url: Some("https://example.com/hook".into()),
            timeout_secs: 5,
        };
        assert!(settings.active_url().is_none());
    }

    #[test]
    fn test_backend_url_join() {
        let backend = BackendSettings {
            base_url: Some("https://api.example.com/bot/".into()),
            ..Default::default()
        };
        assert_eq!(
            backend.url_for("/notes/save").as_deref(),
            Some("https://api.example.com/bot/notes/save")
        );
        assert!(BackendSettings::default().url_for("x").is_none());
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let mut cfg = BridgeConfig::default();
        cfg.scheduler.keep_alive_cron = "every five minutes".into();
        assert!(matches!(cfg.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_ai_requires_key() {
        let mut cfg = BridgeConfig::default();
        cfg.ai.enabled = true;
        assert!(cfg.validate().is_err());
        cfg.ai.provider.api_key = Some("sk-test".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = BridgeConfig::default();
        cfg.server.admin_token = "s3cret".into();
        cfg.save(&path).unwrap();

        let loaded = BridgeConfig::load(&path).unwrap();
        assert_eq!(loaded.server.admin_token, "s3cret");
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BridgeConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.server.port, 3000);
    }

    #[test]
    fn test_transport_mode_from_str() {
        assert_eq!("STUB".parse::<TransportMode>().unwrap(), TransportMode::Stub);
        assert_eq!("bridge".parse::<TransportMode>().unwrap(), TransportMode::Bridge);
        assert!("carrier-pigeon".parse::<TransportMode>().is_err());
    }
}
