//! Classifier boundary.
//!
//! The external decision service is reached through a `ClassifierBackend`.
//! `ClassifierClient` adds the bounded wait: queries run off the caller's
//! thread and every outcome is a `Verdict` or a `ClassifierFailure`, never a
//! panic or a process-ending error.

mod backend;
pub mod backends;
mod client;
mod verdict;

pub use backend::{ClassifierBackend, ClassifierRequest, DEFAULT_PROMPT};
pub use backends::{backend_from_settings, HttpBackend, StubBackend, StubReply};
pub use client::{ClassifierClient, MAX_OUTSTANDING_QUERIES};
pub use verdict::{interpret_verdict, ClassifierFailure, Verdict};
