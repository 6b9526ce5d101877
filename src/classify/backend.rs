use std::sync::Arc;

use super::verdict::{ClassifierFailure, Verdict};
use crate::frame::Frame;

/// The fixed question put to the classifier together with each frame.
pub const DEFAULT_PROMPT: &str = "You are the safety monitor of a mobile robot. \
The attached image is the latest frame from the robot's camera. \
Is the vicinity of the robot clear of people and obstacles so that it is safe to proceed? \
Answer only with JSON: {\"clear\": true} or {\"clear\": false}.";

/// One classifier query: the frame under judgement plus the prompt.
#[derive(Clone, Debug)]
pub struct ClassifierRequest {
    pub frame: Arc<Frame>,
    pub prompt: String,
}

/// External decision service.
///
/// `classify` may block for an arbitrary time. The client never calls it on
/// the evaluator thread, and a call that outlives its timeout is abandoned
/// while still running, so implementations take `&self` and may see
/// overlapping calls.
pub trait ClassifierBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Judge the frame in `request`.
    fn classify(&self, request: &ClassifierRequest) -> Result<Verdict, ClassifierFailure>;
}
