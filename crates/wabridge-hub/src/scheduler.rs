//! Scheduler: cron-driven keep-alive and reminder delivery.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use cron::Schedule;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use wabridge_core::config::{BackendSettings, SchedulerSettings};
use wabridge_core::error::{BridgeError, Result};

use crate::gateway::SendGateway;
use crate::manager::ConnectionManager;

/// A reminder due now, as returned by the backend.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Reminder {
    pub phone: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct DueReminders {
    #[serde(default)]
    reminders: Vec<Reminder>,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub sent: usize,
    pub failed: usize,
    /// The session was not ready, so due reminders were left on the backend.
    pub skipped: bool,
}

pub struct Scheduler {
    schedule: Schedule,
    manager: Arc<ConnectionManager>,
    gateway: Arc<SendGateway>,
    backend: BackendSettings,
    send_delay: Duration,
    client: reqwest::Client,
}

impl Scheduler {
    pub fn new(
        settings: &SchedulerSettings,
        backend: BackendSettings,
        manager: Arc<ConnectionManager>,
        gateway: Arc<SendGateway>,
    ) -> Result<Self> {
        let schedule = Schedule::from_str(&settings.keep_alive_cron).map_err(|e| {
            BridgeError::Config(format!("bad cron '{}': {}", settings.keep_alive_cron, e))
        })?;
        Ok(Self {
            schedule,
            manager,
            gateway,
            backend,
            send_delay: Duration::from_millis(settings.send_delay_ms),
            client: reqwest::Client::new(),
        })
    }

    /// Time until the next cron fire.
    fn next_delay(&self) -> Option<Duration> {
        let next = self.schedule.upcoming(chrono::Utc).next()?;
        (next - chrono::Utc::now()).to_std().ok().or(Some(Duration::ZERO))
    }

    /// Loop until `shutdown` fires or the schedule runs dry.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        info!("⏰ Scheduler started");
        loop {
            let Some(delay) = self.next_delay() else {
                warn!("Cron schedule has no upcoming fire time");
                break;
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let report = self.tick().await;
                    debug!("Scheduler tick: {:?}", report);
                }
                _ = shutdown.recv() => break,
            }
        }
        info!("⏰ Scheduler stopped");
    }

    /// One keep-alive: check the backend for due reminders and send them.
    ///
    /// Due reminders are only requested while the session is ready. Asking
    /// for them marks them as taken on the backend side.
    pub async fn tick(&self) -> TickReport {
        let state = self.manager.current_state().await;
        info!("💓 Keep-alive, WhatsApp {}", state);

        let mut report = TickReport::default();
        if !state.is_ready() {
            if self.backend.base_url.is_some() {
                debug!("⏰ WhatsApp is {}, leaving reminders queued", state);
                report.skipped = true;
            }
            return report;
        }

        let reminders = match self.fetch_reminders().await {
            Ok(Some(list)) => list,
            Ok(None) => return report,
            Err(e) => {
                error!("⏰ Reminder check failed: {}", e);
                return report;
            }
        };
        report.fetched = reminders.len();

        for (i, reminder) in reminders.iter().enumerate() {
            if i > 0 && !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }
            match self.gateway.send(&reminder.phone, &reminder.text).await {
                Ok(ok) => {
                    info!("⏰ Reminder sent to {}", ok.to);
                    report.sent += 1;
                }
                Err(e) => {
                    warn!("⏰ Reminder to {} failed: {}", reminder.phone, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// `Ok(None)` when no backend is configured.
    async fn fetch_reminders(&self) -> Result<Option<Vec<Reminder>>> {
        let Some(url) = self.backend.url_for(&self.backend.reminders_path) else {
            return Ok(None);
        };

        let resp = self
            .client
            .post(&url)
            .timeout(self.backend.timeout())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| BridgeError::BackendUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(BridgeError::BackendUnavailable(format!(
                "{} answered {}",
                url,
                resp.status()
            )));
        }

        let due: DueReminders = resp
            .json()
            .await
            .map_err(|e| BridgeError::BackendUnavailable(e.to_string()))?;
        Ok(Some(due.reminders))
    }
}
