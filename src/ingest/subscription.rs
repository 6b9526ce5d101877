//! Frame subscription lifecycle.
//!
//! A `FrameSubscription` owns one transport and a background thread that
//! decodes every delivered payload and publishes it into a `FrameSlot`.
//! The thread only holds a `Weak` reference to the slot; once the slot's owner
//! is gone, nothing is published.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use super::message::decode_payload;
use super::transport::{Delivery, FrameTransport};
use crate::frame::FrameSlot;

/// Upper bound on how long the subscription thread waits inside the transport
/// before re-checking the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub frames_published: u64,
    pub decode_failures: u64,
    pub transport_errors: u64,
}

#[derive(Default)]
struct Counters {
    frames_published: AtomicU64,
    decode_failures: AtomicU64,
    transport_errors: AtomicU64,
}

pub struct FrameSubscription {
    source: String,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

impl FrameSubscription {
    /// Start listening on `transport`, publishing decoded frames into `slot`.
    pub fn spawn(transport: Box<dyn FrameTransport>, slot: Weak<FrameSlot>) -> Result<Self> {
        let source = transport.describe();
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        let handle = {
            let running = Arc::clone(&running);
            let counters = Arc::clone(&counters);
            std::thread::Builder::new()
                .name("frame-subscription".to_string())
                .spawn(move || run(transport, slot, running, counters))
                .with_context(|| format!("spawn subscription thread for {}", source))?
        };
        log::info!("FrameSubscription: listening on {}", source);

        Ok(Self {
            source,
            running,
            counters,
            handle: Some(handle),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            frames_published: self.counters.frames_published.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            transport_errors: self.counters.transport_errors.load(Ordering::Relaxed),
        }
    }

    /// False once the transport closed or the slot was dropped.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("FrameSubscription: thread for {} panicked", self.source);
            }
        }
        log::info!("FrameSubscription: unsubscribed from {}", self.source);
    }
}

fn run(
    mut transport: Box<dyn FrameTransport>,
    slot: Weak<FrameSlot>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    while running.load(Ordering::Acquire) {
        let payload = match transport.next_payload(POLL_INTERVAL) {
            Ok(Delivery::Payload(payload)) => payload,
            Ok(Delivery::Idle) => continue,
            Ok(Delivery::Closed) => {
                log::info!("FrameSubscription: {} closed", transport.describe());
                break;
            }
            Err(e) => {
                counters.transport_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("FrameSubscription: transport error: {:#}", e);
                continue;
            }
        };

        // Decode before touching the slot so the critical section stays a
        // handle swap.
        let frame = match decode_payload(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("FrameSubscription: dropping undecodable frame: {:#}", e);
                continue;
            }
        };

        // Shutdown may have started while decoding.
        if !running.load(Ordering::Acquire) {
            break;
        }
        let Some(slot) = slot.upgrade() else {
            break;
        };
        log::trace!(
            "FrameSubscription: frame {}x{} from '{}'",
            frame.width(),
            frame.height(),
            frame.frame_id()
        );
        slot.publish(frame);
        counters.frames_published.fetch_add(1, Ordering::Relaxed);
    }
}
