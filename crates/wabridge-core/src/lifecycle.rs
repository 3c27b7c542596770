//! Connection lifecycle: the pure state machine behind the WhatsApp session.
//!
//! Every transport event maps to exactly one [`LifecycleEvent`], and
//! [`Lifecycle::apply`] is the only way state changes. The connection
//! manager is the single writer; HTTP handlers read snapshots.

use serde::{Deserialize, Serialize};

/// Connection state of the single WhatsApp session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Starting,
    AwaitingQr,
    Connecting,
    Ready,
    Disconnected,
    AuthFailed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::AwaitingQr => "awaiting_qr",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::AuthFailed => "auth_failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        *self == Self::Ready
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending login QR: the raw token and its rendered PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrPayload {
    pub token: String,
    pub png: Vec<u8>,
}

/// Inputs to the state machine.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A fresh transport session is being constructed.
    Start,
    Qr(QrPayload),
    Authenticated,
    Ready,
    Disconnected(String),
    AuthFailed(String),
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Qr(_) => "qr",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected(_) => "disconnected",
            Self::AuthFailed(_) => "auth_failure",
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// False when the event was ignored in the current state.
    pub changed: bool,
}

/// The lifecycle value: state plus the data attached to it.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    state: ConnectionState,
    qr: Option<QrPayload>,
    ready_once: bool,
    last_reason: Option<String>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn qr(&self) -> Option<&QrPayload> {
        self.qr.as_ref()
    }

    /// Whether the session has been ready at least once since the last start.
    pub fn ready_once(&self) -> bool {
        self.ready_once
    }

    /// Reason attached to the last disconnect or auth failure.
    pub fn last_reason(&self) -> Option<&str> {
        self.last_reason.as_deref()
    }

    /// Apply one event. Ignored events leave everything untouched.
    pub fn apply(&mut self, event: LifecycleEvent) -> Transition {
        use ConnectionState::*;

        let from = self.state;
        let accepted = match event {
            LifecycleEvent::Start => {
                self.state = Connecting;
                self.qr = None;
                self.ready_once = false;
                self.last_reason = None;
                true
            }
            LifecycleEvent::Qr(payload) => match from {
                Starting | Connecting | AwaitingQr => {
                    self.state = AwaitingQr;
                    self.qr = Some(payload);
                    true
                }
                _ => false,
            },
            LifecycleEvent::Authenticated => match from {
                AwaitingQr => {
                    self.state = Connecting;
                    self.qr = None;
                    true
                }
                _ => false,
            },
            LifecycleEvent::Ready => match from {
                Starting | Connecting | AwaitingQr => {
                    self.state = Ready;
                    self.qr = None;
                    self.ready_once = true;
                    true
                }
                _ => false,
            },
            LifecycleEvent::Disconnected(reason) => {
                self.state = Disconnected;
                self.qr = None;
                self.last_reason = Some(reason);
                true
            }
            LifecycleEvent::AuthFailed(reason) => {
                self.state = AuthFailed;
                self.qr = None;
                self.last_reason = Some(reason);
                true
            }
        };

        debug_assert!(!(self.state.is_ready() && self.qr.is_some()));

        Transition {
            from,
            to: self.state,
            changed: accepted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qr(token: &str) -> LifecycleEvent {
        LifecycleEvent::Qr(QrPayload {
            token: token.to_string(),
            png: vec![0x89, b'P', b'N', b'G'],
        })
    }

    #[test]
    fn test_qr_then_ready_clears_qr() {
        let mut lc = Lifecycle::new();
        lc.apply(LifecycleEvent::Start);
        assert_eq!(lc.state(), ConnectionState::Connecting);

        lc.apply(qr("2@abc"));
        assert_eq!(lc.state(), ConnectionState::AwaitingQr);
        assert_eq!(lc.qr().map(|q| q.token.as_str()), Some("2@abc"));
        assert!(!lc.qr().unwrap().png.is_empty());

        lc.apply(LifecycleEvent::Ready);
        assert_eq!(lc.state(), ConnectionState::Ready);
        assert!(lc.qr().is_none());
        assert!(lc.ready_once());
    }

    #[test]
    fn test_qr_regeneration_replaces_token() {
        let mut lc = Lifecycle::new();
        lc.apply(LifecycleEvent::Start);
        lc.apply(qr("first"));
        let t = lc.apply(qr("second"));
        assert!(t.changed);
        assert_eq!(lc.qr().unwrap().token, "second");
    }

    #[test]
    fn test_authenticated_goes_back_to_connecting() {
        let mut lc = Lifecycle::new();
        lc.apply(LifecycleEvent::Start);
        lc.apply(qr("t"));
        let t = lc.apply(LifecycleEvent::Authenticated);
        assert_eq!(t.from, ConnectionState::AwaitingQr);
        assert_eq!(t.to, ConnectionState::Connecting);
        assert!(lc.qr().is_none());
    }

    #[test]
    fn test_authenticated_ignored_when_ready() {
        let mut lc = Lifecycle::new();
        lc.apply(LifecycleEvent::Start);
        lc.apply(LifecycleEvent::Ready);
        let t = lc.apply(LifecycleEvent::Authenticated);
        assert!(!t.changed);
        assert_eq!(lc.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_qr_ignored_while_ready() {
        let mut lc = Lifecycle::new();
        lc.apply(LifecycleEvent::Start);
        lc.apply(LifecycleEvent::Ready);
        let t = lc.apply(qr("late"));
        assert!(!t.changed);
        assert!(lc.qr().is_none());
        assert!(lc.state().is_ready());
    }

    #[test]
    fn test_disconnect_from_any_state() {
        for setup in [vec![], vec![qr("x")], vec![LifecycleEvent::Ready]] {
            let mut lc = Lifecycle::new();
            lc.apply(LifecycleEvent::Start);
            for ev in setup {
                lc.apply(ev);
            }
            lc.apply(LifecycleEvent::Disconnected("NAVIGATION".into()));
            assert_eq!(lc.state(), ConnectionState::Disconnected);
            assert!(lc.qr().is_none());
            assert_eq!(lc.last_reason(), Some("NAVIGATION"));
        }
    }

    #[test]
    fn test_auth_failure_and_restart() {
        let mut lc = Lifecycle::new();
        lc.apply(LifecycleEvent::Start);
        lc.apply(qr("x"));
        lc.apply(LifecycleEvent::AuthFailed("bad creds".into()));
        assert_eq!(lc.state(), ConnectionState::AuthFailed);
        assert!(lc.qr().is_none());

        // Ready cannot sneak in from the terminal state.
        assert!(!lc.apply(LifecycleEvent::Ready).changed);

        lc.apply(LifecycleEvent::Start);
        assert_eq!(lc.state(), ConnectionState::Connecting);
        assert!(lc.last_reason().is_none());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionState::AwaitingQr).unwrap();
        assert_eq!(json, "\"awaiting_qr\"");
        assert_eq!(ConnectionState::AuthFailed.to_string(), "auth_failed");
    }
}
