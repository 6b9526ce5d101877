//! Wire format for inbound images.
//!
//! Each transport payload is one JSON object shaped like a sensor image
//! message. Pixel bytes travel base64-encoded in `data`.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::normalize::{normalize_to_f32, PixelEncoding};
use crate::frame::Frame;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageMessage {
    /// Capture time in nanoseconds since UNIX epoch.
    #[serde(default)]
    pub stamp_ns: u64,
    #[serde(default)]
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    pub encoding: String,
    /// Row stride in bytes.
    pub step: u32,
    #[serde(default)]
    pub is_bigendian: bool,
    /// Base64 pixel bytes.
    pub data: String,
}

impl ImageMessage {
    /// Build a little-endian `32FC1` message from packed pixels.
    pub fn from_f32(
        pixels: &[f32],
        width: u32,
        height: u32,
        stamp: Duration,
        frame_id: impl Into<String>,
    ) -> Self {
        let bytes: Vec<u8> = pixels.iter().flat_map(|p| p.to_le_bytes()).collect();
        Self {
            stamp_ns: stamp.as_nanos() as u64,
            frame_id: frame_id.into(),
            width,
            height,
            encoding: "32FC1".to_string(),
            step: width.saturating_mul(4),
            is_bigendian: false,
            data: STANDARD.encode(bytes),
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("serialize image message")
    }

    /// Decode into the internal single-channel `f32` representation.
    pub fn into_frame(self) -> Result<Frame> {
        let encoding = PixelEncoding::parse(&self.encoding)?;
        let bytes = STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| anyhow!("image data is not valid base64: {}", e))?;
        let pixels = normalize_to_f32(
            &bytes,
            self.width,
            self.height,
            self.step,
            encoding,
            self.is_bigendian,
        )?;
        Frame::new(
            pixels,
            self.width,
            self.height,
            Duration::from_nanos(self.stamp_ns),
            self.frame_id,
        )
    }
}

/// Parse and decode one transport payload.
pub fn decode_payload(payload: &[u8]) -> Result<Frame> {
    let message: ImageMessage =
        serde_json::from_slice(payload).map_err(|e| anyhow!("malformed image message: {}", e))?;
    message.into_frame()
}
