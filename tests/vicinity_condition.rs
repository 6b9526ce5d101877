//! End-to-end tests for the vicinity condition.
//!
//! These tests verify that:
//! 1. Every classifier failure kind resolves to a non-clear decision
//! 2. Evaluating before any frame arrives is not clear
//! 3. The evaluator judges the newest published frame
//! 4. Evaluation latency is bounded by the response timeout
//! 5. Undecodable frames leave the previous frame in place

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use vicinity_gate::{
    ChannelTransport, ClassifierClient, ClassifierFailure, ConditionNode, ConditionPorts,
    Decision, ImageMessage, NodeStatus, StubBackend, StubReply, UnknownReason, Verdict,
    VicinityCondition,
};

fn build(
    backend: Arc<StubBackend>,
    timeout: Duration,
) -> (Sender<Vec<u8>>, VicinityCondition) {
    let (tx, transport) = ChannelTransport::pair("front_camera");
    let ports = ConditionPorts::new("front_camera", timeout).expect("ports");
    let condition = VicinityCondition::new(
        "MLVicinity",
        ports,
        Box::new(transport),
        ClassifierClient::new(backend),
    )
    .expect("condition");
    (tx, condition)
}

fn frame_payload(stamp_ms: u64) -> Vec<u8> {
    ImageMessage::from_f32(&[0.5; 16], 4, 4, Duration::from_millis(stamp_ms), "front_camera")
        .to_payload()
        .expect("payload")
}

fn wait_for_frames(condition: &VicinityCondition, published: u64) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while condition.subscription_stats().frames_published < published {
        assert!(Instant::now() < deadline, "frame was never published");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn clear_verdict_is_success() {
    let backend = Arc::new(StubBackend::always(Verdict::Clear));
    let (tx, condition) = build(backend.clone(), Duration::from_millis(500));

    tx.send(frame_payload(1)).unwrap();
    wait_for_frames(&condition, 1);

    assert_eq!(condition.evaluate(), Decision::Clear);
    assert_eq!(condition.tick(), NodeStatus::Success);
    assert_eq!(backend.calls(), 2);
}

#[test]
fn blocked_verdict_is_failure() {
    let backend = Arc::new(StubBackend::always(Verdict::Blocked));
    let (tx, condition) = build(backend, Duration::from_millis(500));

    tx.send(frame_payload(1)).unwrap();
    wait_for_frames(&condition, 1);

    assert_eq!(condition.evaluate(), Decision::Blocked);
    assert_eq!(condition.tick(), NodeStatus::Failure);
}

#[test]
fn no_frame_yet_is_failure_without_querying() {
    let backend = Arc::new(StubBackend::always(Verdict::Clear));
    let (_tx, condition) = build(backend.clone(), Duration::from_millis(500));

    assert!(!condition.has_frame());
    assert_eq!(
        condition.evaluate(),
        Decision::Unknown(UnknownReason::NoFrameYet)
    );
    assert_eq!(condition.tick(), NodeStatus::Failure);
    assert_eq!(backend.calls(), 0);
}

#[test]
fn every_classifier_failure_fails_closed() {
    let backend = Arc::new(StubBackend::always(Verdict::Clear).with_script([
        StubReply::Fail(ClassifierFailure::Unavailable("connection refused".into())),
        StubReply::Text("I am not sure what I am looking at".into()),
        StubReply::Hang,
    ]));
    let (tx, condition) = build(backend, Duration::from_millis(100));

    tx.send(frame_payload(1)).unwrap();
    wait_for_frames(&condition, 1);

    let kinds: Vec<&'static str> = (0..3)
        .map(|_| {
            let decision = condition.evaluate();
            assert_eq!(decision.status(), NodeStatus::Failure);
            match decision {
                Decision::Unknown(UnknownReason::Classifier(failure)) => failure.code(),
                other => panic!("expected classifier failure, got {:?}", other),
            }
        })
        .collect();
    assert_eq!(kinds, vec!["unavailable", "invalid_response", "timeout"]);

    // Script exhausted: the service recovers.
    assert_eq!(condition.tick(), NodeStatus::Success);
}

#[test]
fn ambiguous_replies_fail_closed() {
    let backend = Arc::new(StubBackend::always(Verdict::Clear).with_script([
        StubReply::Text("Clear? No, a person is standing in front of the robot.".into()),
        StubReply::Text("Safe to say the path is blocked by a pallet.".into()),
        StubReply::Text(r#"{"clear": true, "verdict": "blocked"}"#.into()),
        StubReply::Text("True, there is a person right in front of the robot.".into()),
    ]));
    let (tx, condition) = build(backend, Duration::from_millis(500));

    tx.send(frame_payload(1)).unwrap();
    wait_for_frames(&condition, 1);

    for _ in 0..4 {
        match condition.evaluate() {
            Decision::Unknown(UnknownReason::Classifier(failure)) => {
                assert_eq!(failure.code(), "invalid_response")
            }
            other => panic!("expected invalid response, got {:?}", other),
        }
    }
    assert_eq!(condition.tick(), NodeStatus::Success);
}

#[test]
fn evaluation_uses_newest_frame() {
    let backend = Arc::new(StubBackend::always(Verdict::Clear));
    let (tx, condition) = build(backend.clone(), Duration::from_millis(500));

    tx.send(frame_payload(100)).unwrap();
    tx.send(frame_payload(200)).unwrap();
    wait_for_frames(&condition, 2);

    condition.evaluate();
    assert_eq!(backend.seen_stamps(), vec![Duration::from_millis(200)]);
}

#[test]
fn silent_classifier_is_bounded_by_timeout() {
    let backend = Arc::new(StubBackend::silent());
    let (tx, condition) = build(backend, Duration::from_millis(200));

    tx.send(frame_payload(0)).unwrap();
    wait_for_frames(&condition, 1);
    std::thread::sleep(Duration::from_millis(10));

    let started = Instant::now();
    let decision = condition.evaluate();
    let elapsed = started.elapsed();

    assert_eq!(
        decision,
        Decision::Unknown(UnknownReason::Classifier(ClassifierFailure::Timeout(
            Duration::from_millis(200)
        )))
    );
    assert_eq!(decision.status(), NodeStatus::Failure);
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(500), "took {:?}", elapsed);
}

#[test]
fn decode_failure_keeps_previous_frame() {
    let backend = Arc::new(StubBackend::always(Verdict::Clear));
    let (tx, condition) = build(backend.clone(), Duration::from_millis(500));

    tx.send(frame_payload(42)).unwrap();
    wait_for_frames(&condition, 1);
    tx.send(b"\x00\x01 not an image".to_vec()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while condition.subscription_stats().decode_failures < 1 {
        assert!(Instant::now() < deadline, "decode failure never counted");
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(condition.evaluate(), Decision::Clear);
    assert_eq!(backend.seen_stamps(), vec![Duration::from_millis(42)]);
}

#[test]
fn overlapping_evaluations_are_serialised() {
    let backend = Arc::new(StubBackend::new(StubReply::Delayed(
        Duration::from_millis(50),
        Verdict::Clear,
    )));
    let (tx, condition) = build(backend.clone(), Duration::from_secs(1));
    tx.send(frame_payload(1)).unwrap();
    wait_for_frames(&condition, 1);

    let condition = Arc::new(condition);
    let started = Instant::now();
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let condition = Arc::clone(&condition);
            std::thread::spawn(move || condition.tick())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), NodeStatus::Success);
    }

    // Three 50ms queries run back to back, not concurrently.
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(backend.calls(), 3);
}

#[test]
fn dropping_condition_with_outstanding_query_is_safe() {
    let backend = Arc::new(StubBackend::silent());
    let (tx, condition) = build(backend.clone(), Duration::from_millis(20));
    tx.send(frame_payload(1)).unwrap();
    wait_for_frames(&condition, 1);

    assert_eq!(condition.tick(), NodeStatus::Failure);
    drop(condition);

    // The abandoned worker still holds its own handles; the producer side is
    // closed.
    assert!(tx.send(frame_payload(2)).is_err());
    assert_eq!(backend.calls(), 1);
}
