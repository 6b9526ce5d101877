//! Vicinity condition.
//!
//! Each evaluation is one synchronous round trip:
//!
//! 1. snapshot the latest frame (none yet → `Unknown(NoFrameYet)`)
//! 2. query the classifier, bounded by the response timeout
//! 3. map the verdict or failure to a `Decision`
//!
//! `Decision` keeps the reason a verdict was unavailable. Only
//! `Decision::status` collapses it to the host's `NodeStatus`, and only
//! `Decision::Clear` becomes `Success`.

use anyhow::Result;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::classify::{backend_from_settings, ClassifierClient, ClassifierFailure, Verdict};
use crate::config::{ConditionPorts, VicinityConfig};
use crate::frame::FrameSlot;
use crate::ingest::{transport_for_source, FrameSubscription, FrameTransport, SubscriptionStats};

// ----------------------------------------------------------------------------
// Host boundary
// ----------------------------------------------------------------------------

/// Tick result reported to the host control loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    Success,
    Failure,
    /// Part of the host contract; synchronous conditions never return it.
    Running,
}

/// A leaf condition the host ticks at its own cadence.
pub trait ConditionNode {
    fn name(&self) -> &str;

    fn tick(&self) -> NodeStatus;
}

// ----------------------------------------------------------------------------
// Decision
// ----------------------------------------------------------------------------

/// Why no verdict was available.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnknownReason {
    NoFrameYet,
    Classifier(ClassifierFailure),
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFrameYet => write!(f, "no_frame_yet: no frame received"),
            Self::Classifier(failure) => write!(f, "{}", failure),
        }
    }
}

/// Outcome of one evaluation. Produced fresh each call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Clear,
    Blocked,
    Unknown(UnknownReason),
}

impl Decision {
    pub fn is_clear(&self) -> bool {
        matches!(self, Self::Clear)
    }

    /// Fail-closed mapping onto the host contract.
    pub fn status(&self) -> NodeStatus {
        match self {
            Self::Clear => NodeStatus::Success,
            Self::Blocked | Self::Unknown(_) => NodeStatus::Failure,
        }
    }
}

impl From<Verdict> for Decision {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Clear => Self::Clear,
            Verdict::Blocked => Self::Blocked,
        }
    }
}

// ----------------------------------------------------------------------------
// VicinityCondition
// ----------------------------------------------------------------------------

pub struct VicinityCondition {
    name: String,
    ports: ConditionPorts,
    slot: Arc<FrameSlot>,
    subscription: Option<FrameSubscription>,
    classifier: ClassifierClient,
    /// Serialises overlapping evaluations.
    evaluation: Mutex<()>,
}

impl VicinityCondition {
    /// Subscribe to `transport` and judge frames with `classifier`.
    pub fn new(
        name: impl Into<String>,
        ports: ConditionPorts,
        transport: Box<dyn FrameTransport>,
        classifier: ClassifierClient,
    ) -> Result<Self> {
        ports.validate()?;
        let slot = Arc::new(FrameSlot::new());
        let subscription = FrameSubscription::spawn(transport, Arc::downgrade(&slot))?;
        let name = name.into();
        log::info!(
            "{}: frame source {}, classifier '{}', response timeout {:?}",
            name,
            subscription.source(),
            classifier.backend_name(),
            ports.response_timeout
        );
        Ok(Self {
            name,
            ports,
            slot,
            subscription: Some(subscription),
            classifier,
            evaluation: Mutex::new(()),
        })
    }

    /// Build transport and classifier from a loaded configuration.
    pub fn from_config(name: impl Into<String>, config: &VicinityConfig) -> Result<Self> {
        let ports = config.ports();
        let transport = transport_for_source(&ports.frame_source, &config.broker)?;
        let backend = backend_from_settings(&config.classifier, ports.response_timeout)?;
        let classifier = match &config.classifier.prompt {
            Some(prompt) => ClassifierClient::with_prompt(backend, prompt.clone()),
            None => ClassifierClient::new(backend),
        };
        Self::new(name, ports, transport, classifier)
    }

    pub fn ports(&self) -> &ConditionPorts {
        &self.ports
    }

    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.subscription
            .as_ref()
            .map(FrameSubscription::stats)
            .unwrap_or_default()
    }

    pub fn has_frame(&self) -> bool {
        !self.slot.is_empty()
    }

    /// Run one evaluation. Never fails; every error becomes a non-clear
    /// decision.
    pub fn evaluate(&self) -> Decision {
        let _serial = self
            .evaluation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(frame) = self.slot.snapshot() else {
            log::debug!(
                "{}: no frame received yet on {}",
                self.name,
                self.ports.frame_source
            );
            return Decision::Unknown(UnknownReason::NoFrameYet);
        };

        let frame_age = frame.age();
        let started = Instant::now();
        match self.classifier.query(frame, self.ports.response_timeout) {
            Ok(verdict) => {
                log::debug!(
                    "{}: classifier verdict {:?} in {:?} (frame age {:?})",
                    self.name,
                    verdict,
                    started.elapsed(),
                    frame_age
                );
                Decision::from(verdict)
            }
            Err(failure) => {
                log::warn!(
                    "{}: treating vicinity as blocked [{}] {}",
                    self.name,
                    failure.code(),
                    failure
                );
                Decision::Unknown(UnknownReason::Classifier(failure))
            }
        }
    }
}

impl ConditionNode for VicinityCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&self) -> NodeStatus {
        self.evaluate().status()
    }
}

impl Drop for VicinityCondition {
    fn drop(&mut self) {
        // Stop the producer before the slot goes away.
        if let Some(subscription) = self.subscription.take() {
            drop(subscription);
        }
    }
}
