//! Connection lifecycle manager: owns the one WhatsApp session.
//!
//! All state changes go through [`Lifecycle::apply`] under a single write
//! lock; the session slot has its own mutex that also serializes `start()`,
//! so the previous session is always released before a new one is built.
//! Each session gets a generation number and events carrying an older
//! generation are dropped.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use wabridge_core::bus::{EventBus, StateChange};
use wabridge_core::config::WhatsAppSettings;
use wabridge_core::error::{BridgeError, Result};
use wabridge_core::lifecycle::{ConnectionState, Lifecycle, LifecycleEvent, QrPayload};
use wabridge_core::transport::{Transport, TransportEvent, TransportFactory};

use crate::qr;

/// Delay before re-running the session after `/logout`.
pub const LOGOUT_RESTART_DELAY: Duration = Duration::from_millis(1500);
/// Delay before `/restart` takes effect, so the HTTP response goes out first.
pub const ADMIN_RESTART_DELAY: Duration = Duration::from_millis(500);

/// Reconnect delays: never give up, double per consecutive failure, capped.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    pub fn from_settings(settings: &WhatsAppSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.reconnect_delay_secs),
            Duration::from_secs(settings.reconnect_max_delay_secs),
        )
    }

    /// Delay before attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1u32 << shift).min(self.max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(6), Duration::from_secs(60))
    }
}

/// Read-only copy of the lifecycle for pollers.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub qr: Option<QrPayload>,
    pub ready_once: bool,
    pub last_reason: Option<String>,
    pub reconnect_attempts: u32,
    pub generation: u64,
}

impl ConnectionSnapshot {
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }
}

struct Inner {
    lifecycle: Lifecycle,
    generation: u64,
    reconnect_attempts: u32,
    reconnect_pending_for: Option<u64>,
}

struct ActiveSession {
    generation: u64,
    transport: Arc<dyn Transport>,
}

/// A reconnect the worker should run once `delay` has passed.
struct ReconnectRequest {
    generation: u64,
    attempt: u32,
    delay: Duration,
}

/// Owns the WhatsApp session and its reconnection policy.
pub struct ConnectionManager {
    factory: Arc<dyn TransportFactory>,
    bus: Arc<EventBus>,
    policy: ReconnectPolicy,
    state: RwLock<Inner>,
    session: Mutex<Option<ActiveSession>>,
    reconnect_tx: mpsc::UnboundedSender<ReconnectRequest>,
    shutting_down: AtomicBool,
}

impl ConnectionManager {
    /// Create the manager and its reconnect worker. Must be called inside a
    /// Tokio runtime.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        bus: Arc<EventBus>,
        policy: ReconnectPolicy,
    ) -> Arc<Self> {
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            tokio::spawn(Self::reconnect_worker(weak.clone(), reconnect_rx));
            Self {
                factory,
                bus,
                policy,
                state: RwLock::new(Inner {
                    lifecycle: Lifecycle::new(),
                    generation: 0,
                    reconnect_attempts: 0,
                    reconnect_pending_for: None,
                }),
                session: Mutex::new(None),
                reconnect_tx,
                shutting_down: AtomicBool::new(false),
            }
        })
    }

    /// Runs scheduled reconnects one at a time until the manager is dropped.
    async fn reconnect_worker(
        manager: Weak<Self>,
        mut requests: mpsc::UnboundedReceiver<ReconnectRequest>,
    ) {
        while let Some(req) = requests.recv().await {
            tokio::time::sleep(req.delay).await;
            let Some(this) = manager.upgrade() else {
                break;
            };
            if this.shutting_down.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(e) = this.start_inner(Some(req.generation)).await {
                warn!("Reconnect attempt {} failed: {}", req.attempt, e);
            }
        }
    }

    /// Release any existing session and begin connecting a fresh one.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.start_inner(None).await
    }

    /// `start()`, but only if generation `expected` is still the current one.
    async fn start_inner(self: &Arc<Self>, expected: Option<u64>) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BridgeError::Other("connection manager is shutting down".into()));
        }

        let mut slot = self.session.lock().await;

        if let Some(expected) = expected {
            if self.state.read().await.generation != expected {
                debug!("Newer session exists — skipping reconnect for generation {}", expected);
                return Ok(());
            }
        }

        if let Some(old) = slot.take() {
            info!("♻️  Releasing WhatsApp session #{}", old.generation);
            if let Err(e) = old.transport.release().await {
                warn!("Release of session #{} failed: {}", old.generation, e);
            }
        }

        let generation = {
            let mut inner = self.state.write().await;
            inner.generation += 1;
            inner.reconnect_pending_for = None;
            let generation = inner.generation;
            let transition = inner.lifecycle.apply(LifecycleEvent::Start);
            self.bus.publish_state(StateChange {
                generation,
                from: transition.from,
                to: transition.to,
                qr_token: None,
                reason: None,
            });
            generation
        };

        info!("📱 Starting WhatsApp session #{} via {}", generation, self.factory.name());

        let (tx, rx) = mpsc::channel(64);
        match self.factory.connect(tx).await {
            Ok(transport) => {
                *slot = Some(ActiveSession {
                    generation,
                    transport,
                });
                drop(slot);

                let this = self.clone();
                tokio::spawn(async move { this.pump(generation, rx).await });
                Ok(())
            }
            Err(e) => {
                drop(slot);
                error!("❌ WhatsApp initialize failed: {}", e);
                self.handle_event(
                    generation,
                    TransportEvent::Disconnected(format!("initialize failed: {}", e)),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Drain one session's events until it goes stale or closes.
    async fn pump(self: Arc<Self>, generation: u64, mut rx: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = rx.recv().await {
            if !self.handle_event(generation, event).await {
                break;
            }
        }
        debug!("Event pump for session #{} finished", generation);
    }

    /// Apply one transport event. Returns false once `generation` is stale.
    async fn handle_event(&self, generation: u64, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Message(msg) => {
                if !self.is_current(generation).await {
                    return false;
                }
                debug!("📩 Inbound {} from {}", msg.kind, msg.from);
                self.bus.publish_inbound(msg).await;
                true
            }
            TransportEvent::Qr(token) => match qr::render_png(&token) {
                Ok(png) => {
                    self.transition(generation, LifecycleEvent::Qr(QrPayload { token, png }))
                        .await
                }
                Err(e) => {
                    error!("[QR] Could not render QR code: {}", e);
                    self.is_current(generation).await
                }
            },
            TransportEvent::Authenticated => {
                self.transition(generation, LifecycleEvent::Authenticated).await
            }
            TransportEvent::Ready => self.transition(generation, LifecycleEvent::Ready).await,
            TransportEvent::Disconnected(reason) => {
                warn!("⚠️ WhatsApp disconnected: {}", reason);
                let current = self
                    .transition(generation, LifecycleEvent::Disconnected(reason))
                    .await;
                if current {
                    self.schedule_reconnect(generation).await;
                }
                current
            }
            TransportEvent::AuthFailure(reason) => {
                error!("❌ WhatsApp authentication failed: {} — use /restart once fixed", reason);
                self.transition(generation, LifecycleEvent::AuthFailed(reason)).await
            }
        }
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.state.read().await.generation == generation
    }

    async fn transition(&self, generation: u64, event: LifecycleEvent) -> bool {
        let mut inner = self.state.write().await;
        if inner.generation != generation {
            debug!("Dropping '{}' from stale session #{}", event.name(), generation);
            return false;
        }

        let name = event.name();
        let t = inner.lifecycle.apply(event);
        if !t.changed {
            debug!("Ignoring '{}' while {}", name, t.from);
            return true;
        }
        if t.to == ConnectionState::Ready {
            inner.reconnect_attempts = 0;
        }

        let change = StateChange {
            generation,
            from: t.from,
            to: t.to,
            qr_token: inner.lifecycle.qr().map(|q| q.token.clone()),
            reason: match t.to {
                ConnectionState::Disconnected | ConnectionState::AuthFailed => {
                    inner.lifecycle.last_reason().map(String::from)
                }
                _ => None,
            },
        };
        info!("[WhatsApp] {} → {} ({})", t.from, t.to, name);
        self.bus.publish_state(change);
        true
    }

    async fn schedule_reconnect(&self, generation: u64) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let (delay, attempt) = {
            let mut inner = self.state.write().await;
            if inner.generation != generation || inner.reconnect_pending_for == Some(generation) {
                return;
            }
            inner.reconnect_pending_for = Some(generation);
            inner.reconnect_attempts += 1;
            (self.policy.delay_for(inner.reconnect_attempts), inner.reconnect_attempts)
        };

        info!("🔁 Reconnecting in {:.1}s (attempt {})", delay.as_secs_f64(), attempt);

        let request = ReconnectRequest {
            generation,
            attempt,
            delay,
        };
        if self.reconnect_tx.send(request).is_err() {
            error!("Reconnect worker is gone — session #{} will not be retried", generation);
        }
    }

    /// Operator restart after `delay`. Also the only way out of `auth_failed`.
    pub fn restart_after(self: &Arc<Self>, delay: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("🔄 Restart requested");
            if let Err(e) = this.start().await {
                warn!("Restart failed: {}", e);
            }
        });
    }

    /// Unlink the device, then start over so a new QR is issued.
    pub async fn logout(self: &Arc<Self>) -> Result<()> {
        let transport = self.session.lock().await.as_ref().map(|s| s.transport.clone());
        if let Some(transport) = transport {
            transport.logout().await?;
        }
        info!("👋 Logout requested — restarting session");
        self.restart_after(LOGOUT_RESTART_DELAY);
        Ok(())
    }

    /// Release the session on process exit. Errors are swallowed.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(session) = self.session.lock().await.take() {
            info!("🛑 Releasing WhatsApp session #{}", session.generation);
            if let Err(e) = session.transport.release().await {
                debug!("Release during shutdown failed: {}", e);
            }
        }
    }

    pub async fn current_state(&self) -> ConnectionState {
        self.state.read().await.lifecycle.state()
    }

    pub async fn snapshot(&self) -> ConnectionSnapshot {
        let inner = self.state.read().await;
        ConnectionSnapshot {
            state: inner.lifecycle.state(),
            qr: inner.lifecycle.qr().cloned(),
            ready_once: inner.lifecycle.ready_once(),
            last_reason: inner.lifecycle.last_reason().map(String::from),
            reconnect_attempts: inner.reconnect_attempts,
            generation: inner.generation,
        }
    }

    /// The live session, only while `ready`.
    pub async fn active_transport(&self) -> Option<Arc<dyn Transport>> {
        if !self.current_state().await.is_ready() {
            return None;
        }
        self.session.lock().await.as_ref().map(|s| s.transport.clone())
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::StubFactory;
    use wabridge_core::message::InboundMessage;

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy::new(Duration::from_millis(50), Duration::from_millis(400))
    }

    async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..300 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = ReconnectPolicy::new(Duration::from_secs(6), Duration::from_secs(60));
        assert_eq!(p.delay_for(1), Duration::from_secs(6));
        assert_eq!(p.delay_for(2), Duration::from_secs(12));
        assert_eq!(p.delay_for(3), Duration::from_secs(24));
        assert_eq!(p.delay_for(4), Duration::from_secs(48));
        assert_eq!(p.delay_for(5), Duration::from_secs(60));
        assert_eq!(p.delay_for(500), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_qr_then_ready() {
        let factory = StubFactory::new().manual();
        let stub = factory.handle();
        let bus = Arc::new(EventBus::default());
        let mut watcher = bus.subscribe_state();
        let mgr = ConnectionManager::new(Arc::new(factory), bus, fast_policy());

        mgr.start().await.unwrap();
        assert_eq!(mgr.current_state().await, ConnectionState::Connecting);

        stub.emit(TransportEvent::Qr("2@token,abc".into())).await;
        assert!(eventually(|| async { mgr.current_state().await == ConnectionState::AwaitingQr }).await);
        let snap = mgr.snapshot().await;
        let qr = snap.qr.expect("qr present");
        assert_eq!(qr.token, "2@token,abc");
        assert!(!qr.png.is_empty());
        assert!(mgr.active_transport().await.is_none());

        stub.emit(TransportEvent::Ready).await;
        assert!(eventually(|| async { mgr.current_state().await.is_ready() }).await);
        assert!(mgr.snapshot().await.qr.is_none());
        assert!(mgr.active_transport().await.is_some());

        // start → connecting, qr, ready were broadcast in order.
        let mut seen = Vec::new();
        while let Ok(change) = watcher.try_recv() {
            seen.push(change.to);
        }
        assert_eq!(
            seen,
            vec![ConnectionState::Connecting, ConnectionState::AwaitingQr, ConnectionState::Ready]
        );
    }

    #[tokio::test]
    async fn test_disconnect_reconnects_exactly_once() {
        let factory = StubFactory::new().manual();
        let stub = factory.handle();
        let mgr = ConnectionManager::new(Arc::new(factory), Arc::new(EventBus::default()), fast_policy());

        mgr.start().await.unwrap();
        stub.emit(TransportEvent::Ready).await;
        assert!(eventually(|| async { mgr.current_state().await.is_ready() }).await);

        stub.emit(TransportEvent::Disconnected("NAVIGATION".into())).await;
        stub.emit(TransportEvent::Disconnected("NAVIGATION".into())).await;
        assert!(eventually(|| async { mgr.current_state().await == ConnectionState::Disconnected }).await);
        assert_eq!(stub.connects(), 1);

        assert!(eventually(|| async { stub.connects() == 2 }).await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(stub.connects(), 2, "duplicate session constructed");
        assert_eq!(stub.releases(), 1, "old session not released first");
        assert_eq!(mgr.current_state().await, ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_auth_failure_does_not_reconnect() {
        let factory = StubFactory::new().manual();
        let stub = factory.handle();
        let mgr = ConnectionManager::new(Arc::new(factory), Arc::new(EventBus::default()), fast_policy());

        mgr.start().await.unwrap();
        stub.emit(TransportEvent::AuthFailure("bad session".into())).await;
        assert!(eventually(|| async { mgr.current_state().await == ConnectionState::AuthFailed }).await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(stub.connects(), 1);

        mgr.restart_after(Duration::from_millis(1));
        assert!(eventually(|| async { stub.connects() == 2 }).await);
        assert_eq!(mgr.current_state().await, ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_stale_session_events_ignored() {
        let factory = StubFactory::new().manual();
        let stub = factory.handle();
        let bus = Arc::new(EventBus::default());
        let mgr = ConnectionManager::new(Arc::new(factory), bus.clone(), fast_policy());

        mgr.start().await.unwrap();
        mgr.start().await.unwrap();
        assert_eq!(stub.connects(), 2);
        assert_eq!(stub.releases(), 1);

        stub.emit_to(0, TransportEvent::Ready).await;
        stub.emit_to(0, TransportEvent::Message(InboundMessage::text("x", "a@c.us", "b@c.us", "old")))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mgr.current_state().await, ConnectionState::Connecting);

        stub.emit(TransportEvent::Ready).await;
        stub.emit(TransportEvent::Message(InboundMessage::text("y", "a@c.us", "b@c.us", "new")))
            .await;
        let msg = tokio::time::timeout(Duration::from_secs(1), bus.recv_inbound())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.body, "new");
    }

    #[tokio::test]
    async fn test_initialize_failure_retries() {
        let factory = StubFactory::new();
        let stub = factory.handle();
        stub.fail_connects(true);
        let mgr = ConnectionManager::new(Arc::new(factory), Arc::new(EventBus::default()), fast_policy());

        assert!(mgr.start().await.is_err());
        assert_eq!(mgr.current_state().await, ConnectionState::Disconnected);
        assert_eq!(mgr.snapshot().await.reconnect_attempts, 1);

        stub.fail_connects(false);
        assert!(eventually(|| async { mgr.current_state().await.is_ready() }).await);
        assert_eq!(mgr.snapshot().await.reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_and_stops_reconnects() {
        let factory = StubFactory::new();
        let stub = factory.handle();
        let mgr = ConnectionManager::new(Arc::new(factory), Arc::new(EventBus::default()), fast_policy());

        mgr.start().await.unwrap();
        assert!(eventually(|| async { mgr.current_state().await.is_ready() }).await);

        mgr.shutdown().await;
        assert_eq!(stub.releases(), 1);
        stub.emit(TransportEvent::Disconnected("closing".into())).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(stub.connects(), 1);
        assert!(mgr.start().await.is_err());
    }

    #[tokio::test]
    async fn test_logout_restarts_session() {
        let factory = StubFactory::new();
        let stub = factory.handle();
        let mgr = ConnectionManager::new(Arc::new(factory), Arc::new(EventBus::default()), fast_policy());

        mgr.start().await.unwrap();
        mgr.logout().await.unwrap();
        assert_eq!(stub.logouts(), 1);
        assert!(eventually(|| async { stub.connects() == 2 }).await);
    }
}
