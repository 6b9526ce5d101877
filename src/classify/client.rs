use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use super::backend::{ClassifierBackend, ClassifierRequest, DEFAULT_PROMPT};
use super::verdict::{ClassifierFailure, Verdict};
use crate::frame::Frame;

/// Abandoned calls still running before new queries are refused outright.
pub const MAX_OUTSTANDING_QUERIES: usize = 4;

/// Bounded-time wrapper around a classifier backend.
///
/// Every query runs on its own worker thread. The caller waits at most the
/// given timeout; a worker that replies later finds the receiver gone and its
/// reply is discarded. Workers own clones of the backend handle and the frame,
/// so nothing they touch is freed underneath them.
pub struct ClassifierClient {
    backend: Arc<dyn ClassifierBackend>,
    prompt: String,
    in_flight: Arc<AtomicUsize>,
}

impl ClassifierClient {
    pub fn new(backend: Arc<dyn ClassifierBackend>) -> Self {
        Self::with_prompt(backend, DEFAULT_PROMPT)
    }

    pub fn with_prompt(backend: Arc<dyn ClassifierBackend>, prompt: impl Into<String>) -> Self {
        Self {
            backend,
            prompt: prompt.into(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Worker threads that have not returned yet, including abandoned ones.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Ask the backend about `frame`, waiting at most `timeout`.
    pub fn query(&self, frame: Arc<Frame>, timeout: Duration) -> Result<Verdict, ClassifierFailure> {
        if self.in_flight.fetch_add(1, Ordering::AcqRel) >= MAX_OUTSTANDING_QUERIES {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(ClassifierFailure::Unavailable(format!(
                "{} earlier queries to '{}' are still unanswered",
                MAX_OUTSTANDING_QUERIES,
                self.backend.name()
            )));
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        let request = ClassifierRequest {
            frame,
            prompt: self.prompt.clone(),
        };
        let backend = Arc::clone(&self.backend);
        let (tx, rx) = mpsc::sync_channel(1);

        std::thread::Builder::new()
            .name("classifier-query".to_string())
            .spawn(move || {
                let _guard = guard;
                let result = backend.classify(&request);
                // Receiver is gone when the caller already timed out.
                let _ = tx.send(result);
            })
            .map_err(|e| ClassifierFailure::Unavailable(format!("spawn query worker: {}", e)))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ClassifierFailure::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ClassifierFailure::Unavailable(
                "classifier worker exited without replying".to_string(),
            )),
        }
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::backends::{StubBackend, StubReply};
    use std::time::Instant;

    fn frame() -> Arc<Frame> {
        Arc::new(Frame::new(vec![1.0; 4], 2, 2, Duration::from_millis(5), "cam").unwrap())
    }

    struct PanickingBackend;

    impl ClassifierBackend for PanickingBackend {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn classify(&self, _request: &ClassifierRequest) -> Result<Verdict, ClassifierFailure> {
            panic!("backend bug");
        }
    }

    #[test]
    fn verdict_within_timeout_is_returned() {
        let client = ClassifierClient::new(Arc::new(StubBackend::always(Verdict::Clear)));
        assert_eq!(
            client.query(frame(), Duration::from_secs(1)),
            Ok(Verdict::Clear)
        );
    }

    #[test]
    fn silent_backend_times_out_on_schedule() {
        let client = ClassifierClient::new(Arc::new(StubBackend::silent()));
        let started = Instant::now();
        let result = client.query(frame(), Duration::from_millis(100));
        let elapsed = started.elapsed();

        assert_eq!(result, Err(ClassifierFailure::Timeout(Duration::from_millis(100))));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(400), "took {:?}", elapsed);
    }

    #[test]
    fn late_reply_is_discarded() {
        let backend = Arc::new(StubBackend::always(Verdict::Blocked).with_script([
            StubReply::Delayed(Duration::from_millis(150), Verdict::Clear),
        ]));
        let client = ClassifierClient::new(backend);

        assert_eq!(
            client.query(frame(), Duration::from_millis(20)),
            Err(ClassifierFailure::Timeout(Duration::from_millis(20)))
        );
        // The next query gets its own reply, not the late one.
        assert_eq!(
            client.query(frame(), Duration::from_secs(1)),
            Ok(Verdict::Blocked)
        );
    }

    #[test]
    fn panicking_backend_is_unavailable() {
        let client = ClassifierClient::new(Arc::new(PanickingBackend));
        let err = client.query(frame(), Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.code(), "unavailable");
    }

    #[test]
    fn backlog_of_abandoned_queries_is_bounded() {
        let client = ClassifierClient::new(Arc::new(StubBackend::silent()));
        for _ in 0..MAX_OUTSTANDING_QUERIES {
            assert_eq!(
                client.query(frame(), Duration::from_millis(5)).unwrap_err().code(),
                "timeout"
            );
        }
        assert_eq!(client.in_flight(), MAX_OUTSTANDING_QUERIES);

        let started = Instant::now();
        let err = client.query(frame(), Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.code(), "unavailable");
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
