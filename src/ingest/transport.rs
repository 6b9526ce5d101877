use anyhow::Result;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::message::ImageMessage;

/// Outcome of one poll of a frame transport.
#[derive(Debug)]
pub enum Delivery {
    /// One raw message, not yet decoded.
    Payload(Vec<u8>),
    /// Nothing arrived within the poll window.
    Idle,
    /// The source is gone for good; the subscription stops.
    Closed,
}

/// Source of raw image payloads.
///
/// Implementations are driven from the subscription thread only. `next_payload`
/// must return within roughly `poll` so the subscription can observe shutdown.
pub trait FrameTransport: Send {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Wait up to `poll` for the next payload.
    ///
    /// An `Err` is transient: the subscription logs it and keeps polling.
    fn next_payload(&mut self, poll: Duration) -> Result<Delivery>;
}

// ----------------------------------------------------------------------------
// In-process channel
// ----------------------------------------------------------------------------

/// Transport fed through an in-process channel.
///
/// Dropping every sender closes the transport.
pub struct ChannelTransport {
    name: String,
    rx: Receiver<Vec<u8>>,
}

impl ChannelTransport {
    pub fn pair(name: impl Into<String>) -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel();
        (
            tx,
            Self {
                name: name.into(),
                rx,
            },
        )
    }
}

impl FrameTransport for ChannelTransport {
    fn describe(&self) -> String {
        format!("channel://{}", self.name)
    }

    fn next_payload(&mut self, poll: Duration) -> Result<Delivery> {
        match self.rx.recv_timeout(poll) {
            Ok(payload) => Ok(Delivery::Payload(payload)),
            Err(RecvTimeoutError::Timeout) => Ok(Delivery::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(Delivery::Closed),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

const SYNTHETIC_WIDTH: u32 = 64;
const SYNTHETIC_HEIGHT: u32 = 48;

/// Generates a moving gradient at a fixed rate. Used for `stub://` sources.
pub struct SyntheticTransport {
    name: String,
    interval: Duration,
    next_due: Instant,
    frame_count: u64,
}

impl SyntheticTransport {
    pub fn new(name: impl Into<String>, fps: u32) -> Self {
        let interval = Duration::from_millis(1000 / u64::from(fps.max(1)));
        Self {
            name: name.into(),
            interval,
            next_due: Instant::now(),
            frame_count: 0,
        }
    }

    fn generate(&mut self) -> Result<Vec<u8>> {
        self.frame_count += 1;
        let shift = self.frame_count as usize;
        let pixels: Vec<f32> = (0..(SYNTHETIC_WIDTH * SYNTHETIC_HEIGHT) as usize)
            .map(|i| ((i + shift) % 256) as f32 / 255.0)
            .collect();
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        ImageMessage::from_f32(
            &pixels,
            SYNTHETIC_WIDTH,
            SYNTHETIC_HEIGHT,
            stamp,
            self.name.clone(),
        )
        .to_payload()
    }
}

impl FrameTransport for SyntheticTransport {
    fn describe(&self) -> String {
        format!("stub://{} (synthetic)", self.name)
    }

    fn next_payload(&mut self, poll: Duration) -> Result<Delivery> {
        let now = Instant::now();
        if now < self.next_due {
            let wait = self.next_due - now;
            if wait > poll {
                std::thread::sleep(poll);
                return Ok(Delivery::Idle);
            }
            std::thread::sleep(wait);
        }
        self.next_due = Instant::now() + self.interval;
        Ok(Delivery::Payload(self.generate()?))
    }
}
