//! Frame ingestion.
//!
//! - `transport`: where raw payloads come from (MQTT, in-process channel,
//!   synthetic `stub://` source)
//! - `message`: the JSON image message and its decode into `Frame`
//! - `normalize`: pixel encodings to single-channel `f32`
//! - `subscription`: background thread tying a transport to a `FrameSlot`
//!
//! Decode failures never leave this module; they are counted, logged and
//! dropped, and the slot keeps its previous frame.

mod message;
pub mod mqtt;
mod normalize;
mod subscription;
mod transport;

use anyhow::Result;

pub use message::{decode_payload, ImageMessage};
pub use mqtt::{MqttEndpoint, MqttTransport};
pub use subscription::{FrameSubscription, SubscriptionStats};
pub use transport::{ChannelTransport, Delivery, FrameTransport, SyntheticTransport};

use crate::config::BrokerSettings;

const STUB_SCHEME: &str = "stub://";
const SYNTHETIC_FPS: u32 = 10;

/// Build the transport for a configured frame source.
///
/// `stub://<name>` selects the synthetic generator; anything else is an MQTT
/// topic on the configured broker.
pub fn transport_for_source(
    frame_source: &str,
    broker: &BrokerSettings,
) -> Result<Box<dyn FrameTransport>> {
    if let Some(name) = frame_source.strip_prefix(STUB_SCHEME) {
        return Ok(Box::new(SyntheticTransport::new(name, SYNTHETIC_FPS)));
    }
    Ok(Box::new(MqttTransport::connect(broker, frame_source)?))
}

pub fn is_stub_source(frame_source: &str) -> bool {
    frame_source.starts_with(STUB_SCHEME)
}
