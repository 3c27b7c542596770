//! # wabridge hub
//!
//! Runtime of the WhatsApp bridge: connection manager and transports,
//! send gateway, command router, webhook forwarder, AI providers, message
//! handler, cron scheduler and the axum HTTP API.

pub mod api;
pub mod channels;
pub mod gateway;
pub mod handler;
pub mod manager;
pub mod middleware;
pub mod page;
pub mod providers;
pub mod qr;
pub mod router;
pub mod scheduler;
pub mod webhook;
