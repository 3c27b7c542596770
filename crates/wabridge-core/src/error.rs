//! Error types for wabridge.

use thiserror::Error;

/// Core error type for all wabridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Destination did not survive phone normalization.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The WhatsApp session is not ready yet.
    #[error("WhatsApp not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// HTTP status code reported to API callers for this failure kind.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidAddress(_) => 400,
            Self::NotConnected => 503,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
