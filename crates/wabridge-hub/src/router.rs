//! Command router: keyword prefixes to backend actions.
//!
//! Matching is a literal prefix test on the lowercased, trimmed text,
//! longest prefix first, and only at a word boundary ("lista" matches
//! "lista" and "lista hoy" but not "listado"). Routing never fails: backend
//! errors come back as a readable reply. `ping` is answered locally.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use wabridge_core::config::BackendSettings;
use wabridge_core::error::{BridgeError, Result};

/// Backend actions reachable from chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SaveNote,
    RecallNotes,
    ListNotes,
    FlushPending,
    Help,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SaveNote => "save_note",
            Self::RecallNotes => "recall_notes",
            Self::ListNotes => "list_notes",
            Self::FlushPending => "flush_pending",
            Self::Help => "help",
        }
    }
}

/// Prefix table. Sorted longest-first at lookup time.
const PREFIXES: &[(&str, CommandKind)] = &[
    ("guardar nota", CommandKind::SaveNote),
    ("guardar", CommandKind::SaveNote),
    ("anotar", CommandKind::SaveNote),
    ("buscar nota", CommandKind::RecallNotes),
    ("recordar", CommandKind::RecallNotes),
    ("buscar", CommandKind::RecallNotes),
    ("mis notas", CommandKind::ListNotes),
    ("lista", CommandKind::ListNotes),
    ("notas", CommandKind::ListNotes),
    ("enviar pendientes", CommandKind::FlushPending),
    ("pendientes", CommandKind::FlushPending),
    ("ayuda", CommandKind::Help),
    ("help", CommandKind::Help),
    ("menu", CommandKind::Help),
];

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub argument: String,
}

impl Command {
    /// Parse message text. `None` means "not a command".
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().to_lowercase();

        let mut table: Vec<&(&str, CommandKind)> = PREFIXES.iter().collect();
        table.sort_by_key(|(prefix, _)| std::cmp::Reverse(prefix.len()));

        table.into_iter().find_map(|(prefix, kind)| {
            let rest = text.strip_prefix(prefix)?;
            if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
                return None;
            }
            Some(Self {
                kind: *kind,
                argument: rest.trim().to_string(),
            })
        })
    }
}

/// Router output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Text to send back.
    Reply(String),
    /// Not a command; the caller picks a fallback.
    Unrecognized,
}

/// Something that executes commands (normally the PHP backend).
#[async_trait]
pub trait CommandBackend: Send + Sync {
    async fn execute(&self, kind: CommandKind, sender: &str, argument: &str) -> Result<String>;
}

/// Dispatches parsed commands to a backend.
pub struct CommandRouter {
    backend: Box<dyn CommandBackend>,
}

impl CommandRouter {
    pub fn new(backend: Box<dyn CommandBackend>) -> Self {
        Self { backend }
    }

    pub async fn dispatch(&self, sender: &str, text: &str) -> CommandOutcome {
        if text.trim().eq_ignore_ascii_case("ping") {
            return CommandOutcome::Reply("pong".to_string());
        }

        let Some(cmd) = Command::parse(text) else {
            return CommandOutcome::Unrecognized;
        };

        info!("🔀 Command {} from {}", cmd.kind.as_str(), sender);

        match self.backend.execute(cmd.kind, sender, &cmd.argument).await {
            Ok(reply) => CommandOutcome::Reply(reply),
            Err(e) => {
                warn!("Backend failed for {}: {}", cmd.kind.as_str(), e);
                CommandOutcome::Reply(error_reply(cmd.kind))
            }
        }
    }
}

fn error_reply(kind: CommandKind) -> String {
    let action = match kind {
        CommandKind::SaveNote => "guardar tu nota",
        CommandKind::RecallNotes => "buscar tus notas",
        CommandKind::ListNotes => "listar tus notas",
        CommandKind::FlushPending => "enviar los pendientes",
        CommandKind::Help => "mostrar la ayuda",
    };
    format!("⚠️ No pude {} en este momento. Intenta de nuevo en unos minutos.", action)
}

#[derive(Debug, Deserialize)]
struct BackendReply {
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Calls the backend over HTTP: `POST {base}/{path}`.
pub struct HttpCommandBackend {
    client: reqwest::Client,
    settings: BackendSettings,
}

impl HttpCommandBackend {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    fn path_for(&self, kind: CommandKind) -> &str {
        let paths = &self.settings.paths;
        match kind {
            CommandKind::SaveNote => &paths.save_note,
            CommandKind::RecallNotes => &paths.recall_notes,
            CommandKind::ListNotes => &paths.list_notes,
            CommandKind::FlushPending => &paths.flush_pending,
            CommandKind::Help => &paths.help,
        }
    }
}

#[async_trait]
impl CommandBackend for HttpCommandBackend {
    async fn execute(&self, kind: CommandKind, sender: &str, argument: &str) -> Result<String> {
        let url = self
            .settings
            .url_for(self.path_for(kind))
            .ok_or_else(|| BridgeError::BackendUnavailable("backend.base_url not configured".into()))?;

        let resp = self
            .client
            .post(&url)
            .timeout(self.settings.timeout().max(Duration::from_millis(100)))
            .json(&serde_json::json!({
                "from": sender,
                "argument": argument,
                "command": kind.as_str(),
            }))
            .send()
            .await
            .map_err(|e| BridgeError::BackendUnavailable(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BridgeError::BackendUnavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(BridgeError::BackendUnavailable(format!(
                "{} answered {}: {}",
                url,
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        let reply = match serde_json::from_str::<BackendReply>(&text) {
            Ok(parsed) => parsed.reply.or(parsed.message).unwrap_or_default(),
            Err(_) => text,
        };
        if reply.trim().is_empty() {
            return Err(BridgeError::BackendUnavailable(format!("{} returned an empty reply", url)));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct RecordingBackend {
        calls: Arc<Mutex<Vec<(CommandKind, String, String)>>>,
        fail: bool,
    }

    #[async_trait]
    impl CommandBackend for RecordingBackend {
        async fn execute(&self, kind: CommandKind, sender: &str, argument: &str) -> Result<String> {
            self.calls
                .lock()
                .await
                .push((kind, sender.to_string(), argument.to_string()));
            if self.fail {
                return Err(BridgeError::BackendUnavailable("timeout".into()));
            }
            Ok(format!("ok:{}", kind.as_str()))
        }
    }

    fn router(fail: bool) -> (CommandRouter, Arc<Mutex<Vec<(CommandKind, String, String)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let backend = RecordingBackend {
            calls: calls.clone(),
            fail,
        };
        (CommandRouter::new(Box::new(backend)), calls)
    }

    #[test]
    fn test_parse_save_note() {
        let cmd = Command::parse("guardar comprar leche").unwrap();
        assert_eq!(cmd.kind, CommandKind::SaveNote);
        assert_eq!(cmd.argument, "comprar leche");
    }

    #[test]
    fn test_parse_is_case_and_space_insensitive() {
        let cmd = Command::parse("   GUARDAR   Comprar Leche  ").unwrap();
        assert_eq!(cmd.kind, CommandKind::SaveNote);
        assert_eq!(cmd.argument, "comprar leche");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let cmd = Command::parse("guardar nota ensayo el martes").unwrap();
        assert_eq!(cmd.kind, CommandKind::SaveNote);
        assert_eq!(cmd.argument, "ensayo el martes");

        let cmd = Command::parse("enviar pendientes").unwrap();
        assert_eq!(cmd.kind, CommandKind::FlushPending);
        assert_eq!(cmd.argument, "");
    }

    #[test]
    fn test_parse_list_and_unknown() {
        assert_eq!(Command::parse("lista").unwrap().kind, CommandKind::ListNotes);
        assert!(Command::parse("hola").is_none());
        assert!(Command::parse("listado de cosas").is_none());
        assert!(Command::parse("").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_calls_backend() {
        let (router, calls) = router(false);
        let out = router.dispatch("5215512345678@c.us", "guardar comprar leche").await;
        assert_eq!(out, CommandOutcome::Reply("ok:save_note".into()));

        let calls = calls.lock().await;
        assert_eq!(
            calls[0],
            (CommandKind::SaveNote, "5215512345678@c.us".to_string(), "comprar leche".to_string())
        );
    }

    #[tokio::test]
    async fn test_ping_is_local() {
        let (router, calls) = router(true);
        assert_eq!(router.dispatch("a@c.us", " PING ").await, CommandOutcome::Reply("pong".into()));
        assert!(calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_skips_backend() {
        let (router, calls) = router(false);
        assert_eq!(router.dispatch("a@c.us", "hola").await, CommandOutcome::Unrecognized);
        assert!(calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_becomes_reply() {
        let (router, _) = router(true);
        match router.dispatch("a@c.us", "lista").await {
            CommandOutcome::Reply(text) => assert!(text.contains("listar tus notas")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_backend_posts_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bot/notes/save")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"from":"a@c.us","argument":"comprar leche","command":"save_note"}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"ok":true,"reply":"📝 Nota guardada"}"#)
            .create_async()
            .await;

        let backend = HttpCommandBackend::new(BackendSettings {
            base_url: Some(format!("{}/bot", server.url())),
            ..Default::default()
        });
        let reply = backend
            .execute(CommandKind::SaveNote, "a@c.us", "comprar leche")
            .await
            .unwrap();
        assert_eq!(reply, "📝 Nota guardada");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_backend_plain_text_and_errors() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("POST", "/notes/list")
            .with_status(200)
            .with_body("1. comprar leche")
            .create_async()
            .await;
        let _help = server
            .mock("POST", "/help")
            .with_status(502)
            .create_async()
            .await;

        let backend = HttpCommandBackend::new(BackendSettings {
            base_url: Some(server.url()),
            ..Default::default()
        });
        assert_eq!(
            backend.execute(CommandKind::ListNotes, "a@c.us", "").await.unwrap(),
            "1. comprar leche"
        );
        assert!(matches!(
            backend.execute(CommandKind::Help, "a@c.us", "").await,
            Err(BridgeError::BackendUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_http_backend_unconfigured() {
        let backend = HttpCommandBackend::new(BackendSettings::default());
        assert!(matches!(
            backend.execute(CommandKind::Help, "a@c.us", "").await,
            Err(BridgeError::BackendUnavailable(_))
        ));
    }
}
