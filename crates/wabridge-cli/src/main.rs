//! wabridge CLI: run the WhatsApp bridge bot, or talk to a running one.
//!
//! `wabridge serve` starts everything; `status` and `send` are thin HTTP
//! clients for the API; `config` manages the TOML file.

mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use wabridge_core::config::{BridgeConfig, TransportMode};
use wabridge_hub::api::StatusSnapshot;

const DEFAULT_LOG_FILTER: &str = "info,wabridge_core=debug,wabridge_hub=debug";

// ─── CLI Definition ────────────────────────────────────────

/// wabridge: WhatsApp bridge bot 📱🦀
#[derive(Parser)]
#[command(name = "wabridge", version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/wabridge/config.toml)
    #[arg(short, long, global = true, env = "WABRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 🌐 Run the bridge: WhatsApp session, HTTP API, webhook, scheduler
    Serve(ServeArgs),

    /// 📊 Show the status of a running bridge
    Status {
        /// Base URL of the bridge API
        #[arg(long)]
        url: Option<String>,
    },

    /// 📤 Send a message through a running bridge
    Send {
        /// Destination phone number
        #[arg(short, long)]
        phone: String,

        /// Message text
        #[arg(short, long, default_value = "")]
        text: String,

        /// Base URL of the bridge API
        #[arg(long)]
        url: Option<String>,
    },

    /// ⚙️  Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Default)]
struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Token for /logout and /restart
    #[arg(long, env = "ADMIN_TOKEN")]
    admin_token: Option<String>,

    /// Incoming-message webhook URL
    #[arg(long, env = "PHP_API_URL")]
    webhook_url: Option<String>,

    /// Forward incoming messages to the webhook ("false" to disable)
    #[arg(long, env = "ENABLE_INCOMING_WEBHOOK")]
    enable_webhook: Option<String>,

    /// WhatsApp HTTP bridge URL
    #[arg(long, env = "WA_BRIDGE_URL")]
    bridge_url: Option<String>,

    /// Transport: bridge, or stub to disable WhatsApp
    #[arg(long, env = "WA_MODE")]
    mode: Option<TransportMode>,

    /// Backend base URL for commands and reminders
    #[arg(long, env = "BACKEND_URL")]
    backend_url: Option<String>,

    /// API key for AI replies and transcription
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Write a default config file if none exists
    Init,
    /// Print the config file location
    Path,
}

// ─── Helpers ───────────────────────────────────────────────

fn parse_flag(value: &str) -> bool {
    !matches!(value.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off")
}

/// Apply CLI / environment overrides on top of the file config.
fn apply_overrides(config: &mut BridgeConfig, args: ServeArgs) {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(token) = args.admin_token {
        config.server.admin_token = token;
    }
    if let Some(url) = args.webhook_url {
        config.webhook.url = Some(url);
    }
    if let Some(flag) = args.enable_webhook {
        config.webhook.enabled = parse_flag(&flag);
    }
    if let Some(url) = args.bridge_url {
        config.whatsapp.bridge_url = url;
    }
    if let Some(mode) = args.mode {
        config.whatsapp.mode = mode;
    }
    if let Some(url) = args.backend_url {
        config.backend.base_url = Some(url);
    }
    if let Some(key) = args.openai_api_key.filter(|k| !k.is_empty()) {
        config.ai.provider.api_key = Some(key);
    }
}

fn init_logging(config: &BridgeConfig) -> tracing_appender::non_blocking::WorkerGuard {
    let (writer, guard, ansi) = match &config.logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).ok();
            let appender = tracing_appender::rolling::daily(dir, "wabridge.log");
            let (w, g) = tracing_appender::non_blocking(appender);
            (w, g, false)
        }
        None => {
            let (w, g) = tracing_appender::non_blocking(std::io::stdout());
            (w, g, true)
        }
    };

    let fallback = config
        .logging
        .filter
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with_writer(writer)
        .with_ansi(ansi)
        .init();

    guard
}

fn api_url(config: &BridgeConfig, url: Option<String>) -> String {
    url.unwrap_or_else(|| format!("http://127.0.0.1:{}", config.server.port))
        .trim_end_matches('/')
        .to_string()
}

// ─── Main ──────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(BridgeConfig::default_path);
    let mut config = BridgeConfig::load(&config_path)?;

    match cli.command {
        // ─── Serve ─────────────────────────────────────
        Commands::Serve(args) => {
            apply_overrides(&mut config, args);
            let _guard = init_logging(&config);
            serve::run_serve(config).await?;
        }

        // ─── Status ────────────────────────────────────
        Commands::Status { url } => {
            run_status(&api_url(&config, url)).await?;
        }

        // ─── Send ──────────────────────────────────────
        Commands::Send { phone, text, url } => {
            run_send(&api_url(&config, url), &phone, &text).await?;
        }

        // ─── Config Management ─────────────────────────
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{} {}\n", "#".dimmed(), config_path.display().to_string().dimmed());
                println!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Init => {
                if config_path.exists() {
                    println!("{} {} already exists", "•".yellow(), config_path.display());
                } else {
                    BridgeConfig::default().save(&config_path)?;
                    println!("{} Wrote {}", "✅".green(), config_path.display());
                }
            }
            ConfigAction::Path => {
                println!("{}", config_path.display());
            }
        },
    }

    Ok(())
}

async fn run_status(base: &str) -> anyhow::Result<()> {
    let resp = reqwest::get(format!("{}/status", base)).await?;
    let snap: StatusSnapshot = resp.json().await?;

    let state = if snap.ready {
        snap.status.to_string().green().bold()
    } else {
        snap.status.to_string().yellow().bold()
    };

    println!();
    println!("  {} {}", "WhatsApp:".dimmed(), state);
    println!("  {} {}", "QR pending:".dimmed(), if snap.has_qr { "yes" } else { "no" });
    println!(
        "  {} {}",
        "Webhook:".dimmed(),
        snap.webhook_url.as_deref().unwrap_or("off")
    );
    println!("  {} {}s", "Uptime:".dimmed(), snap.uptime_secs);
    if snap.reconnect_attempts > 0 {
        println!("  {} {}", "Reconnects:".dimmed(), snap.reconnect_attempts.to_string().yellow());
    }
    if let Some(reason) = snap.last_disconnect {
        println!("  {} {}", "Last disconnect:".dimmed(), reason.red());
    }
    println!();
    Ok(())
}

async fn run_send(base: &str, phone: &str, text: &str) -> anyhow::Result<()> {
    let resp = reqwest::Client::new()
        .post(format!("{}/send", base))
        .json(&serde_json::json!({ "phone": phone, "text": text }))
        .send()
        .await?;

    let status = resp.status();
    let body: serde_json::Value = resp.json().await?;

    if status.is_success() {
        println!("{} Sent to {}", "✅".green(), body["to"].as_str().unwrap_or(phone));
        if body["truncated"].as_bool().unwrap_or(false) {
            println!("  {}", "(text was truncated to 4096 characters)".dimmed());
        }
        Ok(())
    } else {
        let error = body["error"].as_str().unwrap_or("unknown error");
        anyhow::bail!("{} ({})", error, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(" OFF "));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut config = BridgeConfig::default();
        apply_overrides(
            &mut config,
            ServeArgs {
                port: Some(8080),
                webhook_url: Some("http://php.local/hook.php".into()),
                enable_webhook: Some("false".into()),
                mode: Some(TransportMode::Stub),
                openai_api_key: Some(String::new()),
                ..Default::default()
            },
        );
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.webhook.url.as_deref(), Some("http://php.local/hook.php"));
        assert!(config.webhook.active_url().is_none());
        assert_eq!(config.whatsapp.mode, TransportMode::Stub);
        assert!(config.ai.provider.api_key.is_none());
    }

    #[test]
    fn test_cli_parses_serve_and_send() {
        let cli = Cli::try_parse_from(["wabridge", "send", "--phone", "5512345678", "--text", "hola"]).unwrap();
        assert!(matches!(cli.command, Commands::Send { ref phone, .. } if phone == "5512345678"));

        let cli = Cli::try_parse_from(["wabridge", "serve", "--port", "4000", "--mode", "stub"]).unwrap();
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.port, Some(4000));
                assert_eq!(args.mode, Some(TransportMode::Stub));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_api_url_default() {
        let config = BridgeConfig::default();
        assert_eq!(api_url(&config, None), "http://127.0.0.1:3000");
        assert_eq!(api_url(&config, Some("http://x:1/".into())), "http://x:1");
    }
}
