//! Latest-frame hand-off.
//!
//! - `Frame`: immutable single-channel `f32` image plus capture metadata.
//! - `FrameSlot`: single-item buffer shared between the subscription thread
//!   (writer) and the evaluator (reader).
//!
//! The slot stores `Arc<Frame>` handles. The critical section of both
//! `publish` and `snapshot` is a handle swap or clone; pixel data is never
//! copied under the lock, and a replaced frame is released after the lock is
//! dropped.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Decoded sensor frame. Pixels are row-major, one `f32` per pixel.
///
/// There is no mutable access after construction; a new capture is a new
/// `Frame`.
#[derive(Debug)]
pub struct Frame {
    pixels: Vec<f32>,
    width: u32,
    height: u32,
    /// Capture time reported by the producer (since UNIX epoch).
    stamp: Duration,
    /// Producer-side sensor/frame identifier.
    frame_id: String,
    /// Local instant the frame was decoded.
    received_at: Instant,
}

impl Frame {
    pub fn new(
        pixels: Vec<f32>,
        width: u32,
        height: u32,
        stamp: Duration,
        frame_id: impl Into<String>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero ({}x{})", width, height));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame pixel count mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            stamp,
            frame_id: frame_id.into(),
            received_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stamp(&self) -> Duration {
        self.stamp
    }

    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    /// Time since this frame was decoded locally.
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }
}

// ----------------------------------------------------------------------------
// FrameSlot
// ----------------------------------------------------------------------------

/// Single-writer / single-reader slot holding the most recent frame.
///
/// Starts empty. Every `publish` replaces the held frame; nothing clears it
/// except dropping the slot.
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: Mutex<Option<Arc<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame` as the latest value. Never fails.
    pub fn publish(&self, frame: Frame) {
        self.publish_shared(Arc::new(frame));
    }

    /// Store an already shared frame handle.
    pub fn publish_shared(&self, frame: Arc<Frame>) {
        let previous = self.lock().replace(frame);
        // Released outside the critical section.
        drop(previous);
    }

    /// Handle to the latest frame, or `None` if nothing was ever published.
    ///
    /// The handle stays valid after the slot is overwritten.
    pub fn snapshot(&self) -> Option<Arc<Frame>> {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    // The guarded value is a whole handle, so a panic while holding the lock
    // cannot leave it half-written; recover from poisoning.
    fn lock(&self) -> MutexGuard<'_, Option<Arc<Frame>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
