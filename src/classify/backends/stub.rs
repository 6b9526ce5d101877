use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::classify::backend::{ClassifierBackend, ClassifierRequest};
use crate::classify::verdict::{interpret_verdict, ClassifierFailure, Verdict};

/// Canned behaviour for one stub call.
#[derive(Clone, Debug)]
pub enum StubReply {
    Verdict(Verdict),
    /// Raw reply text, run through the normal verdict parser.
    Text(String),
    Fail(ClassifierFailure),
    /// Reply with the verdict after sleeping.
    Delayed(Duration, Verdict),
    /// Never reply.
    Hang,
}

/// Frame stamps remembered by a stub; older ones are forgotten.
pub const SEEN_STAMPS_CAPACITY: usize = 64;

/// In-process classifier for tests and `stub://` endpoints.
///
/// Scripted replies are consumed first, then `fallback` repeats forever.
pub struct StubBackend {
    script: Mutex<VecDeque<StubReply>>,
    fallback: StubReply,
    calls: AtomicU64,
    seen: Mutex<VecDeque<Duration>>,
}

impl StubBackend {
    pub fn new(fallback: StubReply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicU64::new(0),
            seen: Mutex::new(VecDeque::with_capacity(SEEN_STAMPS_CAPACITY)),
        }
    }

    pub fn always(verdict: Verdict) -> Self {
        Self::new(StubReply::Verdict(verdict))
    }

    pub fn silent() -> Self {
        Self::new(StubReply::Hang)
    }

    /// Queue replies ahead of the fallback.
    pub fn with_script(self, replies: impl IntoIterator<Item = StubReply>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(replies);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Stamps of the most recent frames this backend was asked about, oldest
    /// first.
    pub fn seen_stamps(&self) -> Vec<Duration> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    fn next_reply(&self) -> StubReply {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl ClassifierBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&self, request: &ClassifierRequest) -> Result<Verdict, ClassifierFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
            if seen.len() == SEEN_STAMPS_CAPACITY {
                seen.pop_front();
            }
            seen.push_back(request.frame.stamp());
        }

        match self.next_reply() {
            StubReply::Verdict(verdict) => Ok(verdict),
            StubReply::Text(text) => interpret_verdict(&text),
            StubReply::Fail(failure) => Err(failure),
            StubReply::Delayed(delay, verdict) => {
                std::thread::sleep(delay);
                Ok(verdict)
            }
            StubReply::Hang => loop {
                std::thread::park();
            },
        }
    }
}
