pub mod stub;
pub mod whatsapp;

pub use stub::{SentRecord, StubFactory, StubHandle};
pub use whatsapp::BridgeFactory;

use std::sync::Arc;

use wabridge_core::config::{TransportMode, WhatsAppSettings};
use wabridge_core::transport::TransportFactory;

/// Pick the transport factory for the configured mode.
pub fn factory_for(settings: &WhatsAppSettings) -> Arc<dyn TransportFactory> {
    match settings.mode {
        TransportMode::Bridge => Arc::new(BridgeFactory::from_settings(settings)),
        TransportMode::Stub => Arc::new(StubFactory::new()),
    }
}
