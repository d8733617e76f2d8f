pub mod capture;
pub mod client;
pub mod config;
pub mod controller;
pub mod gateway;
pub mod media;
pub mod provider;
pub mod server;

use frameflow_contracts::events::{EventPayload, EventWriter};
use serde_json::Value;

pub use capture::{capture_frame, StillFrameSurface, VideoSurface};
pub use client::{GatewayClient, HttpGatewayClient, LocalGatewayClient};
pub use config::EngineConfig;
pub use controller::ExplorerController;
pub use gateway::{Gateway, GatewaySettings};
pub use media::InlineImage;
pub use provider::{DryrunProvider, RunwayProvider, VideoProvider, VideoProviderRegistry};
pub use server::GatewayServer;

/// Event logging never fails the operation being logged.
pub(crate) fn log_event(events: &EventWriter, event_type: &str, payload: Value) {
    let payload: EventPayload = match payload {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    };
    if let Err(err) = events.emit(event_type, payload) {
        eprintln!("frameflow: failed to record {event_type} event: {err:#}");
    }
}
