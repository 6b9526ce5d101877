//! Vicinity gate
//!
//! A perception-gated condition for robot control loops: "is it safe to
//! proceed, judging by the latest camera frame?"
//!
//! # Architecture
//!
//! Two execution contexts share exactly one piece of state:
//!
//! 1. **Producer**: a `FrameSubscription` thread decodes inbound image
//!    messages and overwrites the `FrameSlot`.
//! 2. **Evaluator**: the host ticks `VicinityCondition`, which snapshots the
//!    slot and asks the external classifier, waiting at most the configured
//!    response timeout.
//!
//! The condition is fail-closed. No frame, a timeout, an unreachable service
//! or an unparseable reply all resolve to `NodeStatus::Failure`; only an
//! explicit "clear" verdict yields `NodeStatus::Success`.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and the single-item `FrameSlot`
//! - `ingest`: transports, image message decode, subscription thread
//! - `classify`: classifier backends and the bounded-time `ClassifierClient`
//! - `condition`: `Decision`, `NodeStatus`, `VicinityCondition`
//! - `config`: condition ports and daemon configuration

pub mod classify;
pub mod condition;
pub mod config;
pub mod frame;
pub mod ingest;

pub use classify::{
    ClassifierBackend, ClassifierClient, ClassifierFailure, ClassifierRequest, HttpBackend,
    StubBackend, StubReply, Verdict,
};
pub use condition::{ConditionNode, Decision, NodeStatus, UnknownReason, VicinityCondition};
pub use config::{BrokerSettings, ClassifierSettings, ConditionPorts, VicinityConfig};
pub use frame::{Frame, FrameSlot};
pub use ingest::{
    ChannelTransport, FrameSubscription, FrameTransport, ImageMessage, MqttTransport,
    SubscriptionStats, SyntheticTransport,
};
