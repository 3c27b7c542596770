//! # wabridge Core
//!
//! Shared types, traits, and the connection state machine for the wabridge
//! WhatsApp bot. The hub and the CLI depend on it.

pub mod bus;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod phone;
pub mod provider;
pub mod transport;
