//! `wabridge serve`: wire every hub component together and run until a
//! shutdown signal arrives.

use std::sync::Arc;
use std::time::Instant;

use colored::*;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use wabridge_core::bus::EventBus;
use wabridge_core::config::{BridgeConfig, TransportMode};
use wabridge_core::lifecycle::ConnectionState;
use wabridge_core::phone::PhoneNormalizer;
use wabridge_hub::api::{self, ApiState};
use wabridge_hub::channels;
use wabridge_hub::gateway::SendGateway;
use wabridge_hub::handler::MessageHandler;
use wabridge_hub::manager::{ConnectionManager, ReconnectPolicy};
use wabridge_hub::middleware::RateLimiter;
use wabridge_hub::providers::{OpenAiProvider, OpenAiTranscriber, Responder};
use wabridge_hub::qr;
use wabridge_hub::router::{CommandRouter, HttpCommandBackend};
use wabridge_hub::scheduler::Scheduler;
use wabridge_hub::webhook::WebhookForwarder;

pub async fn run_serve(config: BridgeConfig) -> anyhow::Result<()> {
    config.validate()?;

    let bus = Arc::new(EventBus::default());
    let manager = ConnectionManager::new(
        channels::factory_for(&config.whatsapp),
        bus.clone(),
        ReconnectPolicy::from_settings(&config.whatsapp),
    );
    let normalizer = PhoneNormalizer::new(&config.whatsapp.country_code);
    let gateway = Arc::new(SendGateway::new(manager.clone(), normalizer));

    let webhook = Arc::new(WebhookForwarder::new(&config.webhook));
    let router = Arc::new(CommandRouter::new(Box::new(HttpCommandBackend::new(
        config.backend.clone(),
    ))));

    let mut handler = MessageHandler::new(manager.clone(), gateway.clone(), router, webhook.clone());
    if config.ai.enabled {
        let provider = OpenAiProvider::from_config(config.ai.provider.clone());
        let responder = Responder::new(Arc::new(provider), &config.ai.system_prompt)
            .with_limits(config.ai.provider.max_tokens, config.ai.provider.temperature);
        handler = handler.with_responder(Arc::new(responder));
    }
    if config.ai.transcribe_audio {
        let transcriber = OpenAiTranscriber::new(&config.ai.provider, &config.ai.transcription_model);
        handler = handler.with_transcriber(Arc::new(transcriber));
    }

    print_banner(&config, webhook.url());

    tokio::spawn(print_qr_updates(bus.clone()));
    tokio::spawn(Arc::new(handler).run(bus.clone()));

    let (sched_tx, sched_rx) = mpsc::channel::<()>(1);
    if config.scheduler.enabled {
        let scheduler = Scheduler::new(
            &config.scheduler,
            config.backend.clone(),
            manager.clone(),
            gateway.clone(),
        )?;
        tokio::spawn(scheduler.run(sched_rx));
    }

    // The API binds without waiting on the bridge. A failed first connect
    // is retried by the manager.
    let starting = manager.clone();
    tokio::spawn(async move {
        if let Err(e) = starting.start().await {
            warn!("Initial WhatsApp connect failed: {}", e);
        }
    });

    let state = ApiState {
        manager: manager.clone(),
        gateway,
        admin_token: config.server.admin_token.clone(),
        webhook_url: webhook.url().map(str::to_string),
        started_at: Instant::now(),
    };
    let limiter = RateLimiter::new(
        config.server.rate_limit_max,
        config.server.rate_limit_window_secs,
    )
    .with_trust_proxy(config.server.trust_proxy);

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let host = config.server.host.clone();
    let port = config.server.port;
    let mut server = tokio::spawn(async move {
        let stopped = async move {
            let _ = stop_rx.changed().await;
        };
        api::start_server(state, limiter, &host, port, stopped).await
    });

    tokio::select! {
        _ = shutdown_signal() => {
            println!("\n{}", "🛑 Shutting down...".yellow());
        }
        res = &mut server => {
            manager.shutdown().await;
            return match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(e.into()),
            };
        }
    }

    let _ = sched_tx.send(()).await;
    manager.shutdown().await;
    let _ = stop_tx.send(true);
    match server.await {
        Ok(Err(e)) => error!("API server error: {}", e),
        Err(e) => error!("API server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    println!("{}", "👋 Goodbye!".cyan());
    Ok(())
}

fn print_banner(config: &BridgeConfig, webhook_url: Option<&str>) {
    let mode = match config.whatsapp.mode {
        TransportMode::Bridge => format!("📱 bridge ({})", config.whatsapp.bridge_url),
        TransportMode::Stub => "🧪 stub (WhatsApp disabled)".to_string(),
    };
    println!();
    println!("  {}", format!("wabridge v{}", env!("CARGO_PKG_VERSION")).cyan().bold());
    println!("  {} {}", "Transport:".dimmed(), mode.green());
    println!(
        "  {} http://{}:{}",
        "HTTP:".dimmed(),
        config.server.host,
        config.server.port
    );
    println!(
        "  {} {}",
        "Webhook:".dimmed(),
        webhook_url.unwrap_or("off").green()
    );
    println!(
        "  {} {}",
        "Backend:".dimmed(),
        config.backend.base_url.as_deref().unwrap_or("off").green()
    );
    println!(
        "  {} {}",
        "AI:".dimmed(),
        if config.ai.enabled {
            format!("{} / {}", config.ai.provider.provider, config.ai.provider.model).green()
        } else {
            "off".yellow()
        }
    );
    println!("\n  {}", "Press Ctrl+C to stop".dimmed());
}

/// Show each new QR in the terminal as well as on the web page.
async fn print_qr_updates(bus: Arc<EventBus>) {
    let mut changes = bus.subscribe_state();
    loop {
        match changes.recv().await {
            Ok(change) => {
                info!("{}", change.format_status());
                if change.to == ConnectionState::AwaitingQr {
                    if let Some(art) = change.qr_token.as_deref().and_then(qr::render_terminal) {
                        println!("\n{}", "📲 Scan with WhatsApp → Linked devices:".yellow());
                        println!("{}", art);
                    }
                } else if change.to == ConnectionState::Ready {
                    println!("{}", "✅ WhatsApp connected".green().bold());
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("State watcher lagged by {} events", n);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
