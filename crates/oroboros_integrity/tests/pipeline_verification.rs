//! End-to-end verification of the score pipeline.
//!
//! Drives a full match through the orchestrator with a manual clock and a
//! scripted transport. No real network, no real waiting.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;

use oroboros_integrity::codec::{EncryptedScorePayload, WirePayload};
use oroboros_integrity::{
    ErrorCode, InputKind, ManualClock, NullProbe, ResponseSink, ScoreTransport, SecurityConfig,
    SecurityEvent, SecurityOrchestrator, Severity, SubmissionRequest, SubmissionResult,
    SubmissionStatus, TransportFailure, TransportResponse, ViolationKind,
};

/// Answers each send with the next scripted outcome, then with 200.
#[derive(Clone, Default)]
struct ScriptedTransport {
    failures_left: Arc<Mutex<VecDeque<TransportFailure>>>,
    sent: Arc<Mutex<Vec<SubmissionRequest>>>,
}

impl ScriptedTransport {
    fn failing(times: usize) -> Self {
        let transport = Self::default();
        transport
            .failures_left
            .lock()
            .extend((0..times).map(|i| TransportFailure(format!("connection reset #{i}"))));
        transport
    }

    fn sent(&self) -> usize {
        self.sent.lock().len()
    }
}

impl ScoreTransport for ScriptedTransport {
    fn send(&mut self, request: SubmissionRequest, sink: ResponseSink) {
        let verified = format!(r#"{{"verifiedScore":{},"integrityVerified":true}}"#, 120);
        self.sent.lock().push(request);
        match self.failures_left.lock().pop_front() {
            Some(failure) => sink.complete(Err(failure)),
            None => sink.complete(Ok(TransportResponse::new(200, verified))),
        }
    }
}

fn keys() -> (String, String) {
    (STANDARD.encode([0x11u8; 32]), STANDARD.encode([0x22u8; 48]))
}

fn pipeline(transport: &ScriptedTransport) -> (SecurityOrchestrator, ManualClock) {
    let clock = ManualClock::new(1_700_000_000_000);
    let orchestrator = SecurityOrchestrator::new(
        SecurityConfig::default(),
        clock.shared(),
        Box::new(NullProbe),
        Box::new(transport.clone()),
    )
    .unwrap();
    (orchestrator, clock)
}

fn run_for(orchestrator: &mut SecurityOrchestrator, clock: &ManualClock, secs: u64) {
    for _ in 0..secs * 10 {
        orchestrator.update();
        clock.advance(Duration::from_millis(100));
    }
    orchestrator.update();
}

fn completions(orchestrator: &SecurityOrchestrator) -> Vec<(SubmissionResult, i64)> {
    orchestrator
        .events()
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            SecurityEvent::Completed { result, original_score } => Some((result, original_score)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_match_verified_after_two_failures() {
    let transport = ScriptedTransport::failing(2);
    let (mut security, clock) = pipeline(&transport);
    let (enc, sign) = keys();

    security.initialize_for_match("m1", &enc, &sign).unwrap();
    clock.advance(Duration::from_secs(1));
    assert!(security.update_score(50));
    clock.advance(Duration::from_secs(1));
    assert!(security.update_score(120));

    assert_eq!(security.submit_final_score(120), SubmissionStatus::Submitting);
    run_for(&mut security, &clock, 10);

    let completed = completions(&security);
    assert_eq!(completed.len(), 1);
    let (result, original) = &completed[0];
    assert_eq!(*original, 120);
    assert_eq!(result.status, SubmissionStatus::Verified);
    assert_eq!(result.retry_count, 2);
    assert_eq!(result.verified_score, 120);
    assert_eq!(transport.sent(), 3);
    assert!(!security.security_status().is_submitting);
}

#[test]
fn test_progress_reports_every_attempt() {
    let transport = ScriptedTransport::failing(1);
    let (mut security, clock) = pipeline(&transport);
    let (enc, sign) = keys();
    security.initialize_for_match("m1", &enc, &sign).unwrap();

    security.submit_final_score(0);
    run_for(&mut security, &clock, 5);

    let attempts: Vec<_> = security
        .events()
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            SecurityEvent::Progress { attempt, max_attempts, .. } => Some((attempt, max_attempts)),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![(1, 4), (2, 4)]);
}

#[test]
fn test_critical_violations_block_submission() {
    let transport = ScriptedTransport::default();
    let (mut security, _clock) = pipeline(&transport);
    let (enc, sign) = keys();
    security.initialize_for_match("m1", &enc, &sign).unwrap();
    assert!(security.should_allow_gameplay());

    for _ in 0..3 {
        security
            .monitor_mut()
            .report_violation(ViolationKind::MemoryTamper, Severity::Critical, "score patched");
    }

    assert!(!security.should_allow_gameplay());
    assert_eq!(security.submit_final_score(500), SubmissionStatus::Rejected);
    assert_eq!(transport.sent(), 0);

    let completed = completions(&security);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].0.status, SubmissionStatus::Rejected);
    assert_eq!(completed[0].0.error_code, Some(ErrorCode::IntegrityViolation));

    let status = security.security_status();
    assert!(status.has_critical_violations);
    assert_eq!(status.trust_level, 10);
}

#[test]
fn test_clock_tampering_is_reported() {
    let transport = ScriptedTransport::default();
    let (mut security, clock) = pipeline(&transport);
    let (enc, sign) = keys();
    security.initialize_for_match("m1", &enc, &sign).unwrap();

    clock.set_wall_millis(1_700_000_000_000 - 86_400_000);
    assert!(!security.run_security_checks());

    let report = security.anti_cheat_report();
    assert_eq!(report.violation_count, 1);
    assert_eq!(report.violations[0].kind, ViolationKind::TimeTamper);
    assert!(security.should_allow_gameplay());
}

#[test]
fn test_impossible_score_is_flagged_but_play_continues() {
    let transport = ScriptedTransport::default();
    let (mut security, clock) = pipeline(&transport);
    let (enc, sign) = keys();
    security.initialize_for_match("m1", &enc, &sign).unwrap();

    clock.advance(Duration::from_millis(10));
    assert!(!security.update_score(100_000));

    let violations: Vec<_> = security
        .events()
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            SecurityEvent::Violation(v) => Some(v),
            _ => None,
        })
        .collect();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::ScoreAnomaly);
    assert!(!security.security_status().score_integrity_valid);
}

#[test]
fn test_offline_submission_delivered_on_reconnect() {
    let transport = ScriptedTransport::default();
    let (mut security, clock) = pipeline(&transport);
    let (enc, sign) = keys();
    security.initialize_for_match("m1", &enc, &sign).unwrap();

    security.controller_mut().set_online(false);
    clock.advance(Duration::from_secs(1));
    security.update_score(120);
    assert_eq!(security.submit_final_score(120), SubmissionStatus::Pending);
    assert_eq!(security.security_status().queued_submissions, 1);
    assert_eq!(transport.sent(), 0);

    security.controller_mut().set_online(true);
    run_for(&mut security, &clock, 1);

    assert_eq!(transport.sent(), 1);
    let completed = completions(&security);
    assert_eq!(completed.len(), 1);
    assert!(completed[0].0.is_success());
}

#[test]
fn test_sent_payload_opens_with_match_keys() {
    let transport = ScriptedTransport::default();
    let (mut security, clock) = pipeline(&transport);
    let (enc, sign) = keys();
    security.initialize_for_match("m1", &enc, &sign).unwrap();
    security.codec_mut().set_random_seed(0xC0FFEE);

    for (i, score) in [10, 30, 60].into_iter().enumerate() {
        clock.advance(Duration::from_secs(1));
        security.update_score(score);
        security.record_input(InputKind::Tap, (i as f32 * 31.0, 200.0 - i as f32 * 7.0));
        security.record_frame(0.016);
    }
    security.submit_final_score(60);

    let body = transport.sent.lock()[0].body.clone();
    let wire: WirePayload = serde_json::from_str(&body).unwrap();
    assert_eq!(wire.match_id, "m1");
    let payload = EncryptedScorePayload::from_wire(&wire).unwrap();
    assert!(security.codec().verify_signature(&payload));

    let sealed = security.codec().open_payload(&payload).unwrap();
    assert_eq!(sealed.score, 60);
    assert_eq!(sealed.integrity.random_seed, 0xC0FFEE);
    assert_eq!(sealed.integrity.score_update_count, 3);
    assert_eq!(sealed.integrity.input_event_count, 3);
    assert_eq!(sealed.integrity.frame_count, 3);
    assert_eq!(sealed.integrity.score_trail_hash, security.codec().trail().running_hash_hex());
}

#[test]
fn test_end_match_twice_and_restart() {
    let transport = ScriptedTransport::default();
    let (mut security, _clock) = pipeline(&transport);
    let (enc, sign) = keys();

    security.initialize_for_match("m1", &enc, &sign).unwrap();
    security.end_match();
    security.end_match();
    assert!(!security.security_status().encryption_ready);

    security.initialize_for_match("m2", &enc, &sign).unwrap();
    let status = security.security_status();
    assert!(status.encryption_ready);
    assert!(status.anti_cheat_active);
    assert_eq!(security.codec().match_id(), "m2");
}

#[test]
fn test_config_from_toml_drives_pipeline() {
    let config = SecurityConfig::from_toml_str(
        r#"
        [anti_cheat]
        max_score_per_second = 10.0

        [submission]
        max_retry_attempts = 0
        enable_offline_queue = false
        "#,
    )
    .unwrap();

    let transport = ScriptedTransport::failing(1);
    let clock = ManualClock::new(1_700_000_000_000);
    let mut security = SecurityOrchestrator::new(
        config,
        clock.shared(),
        Box::new(NullProbe),
        Box::new(transport.clone()),
    )
    .unwrap();
    let (enc, sign) = keys();
    security.initialize_for_match("m1", &enc, &sign).unwrap();

    clock.advance(Duration::from_secs(1));
    assert!(!security.update_score(50));

    security.submit_final_score(0);
    run_for(&mut security, &clock, 2);

    let completed = completions(&security);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].0.status, SubmissionStatus::Failed);
    assert_eq!(completed[0].0.retry_count, 0);
    assert_eq!(transport.sent(), 1);
}

#[test]
fn test_undeliverable_score_does_not_follow_into_next_match() {
    let transport = ScriptedTransport::failing(10);
    let (mut security, clock) = pipeline(&transport);
    let (enc, sign) = keys();

    security.initialize_for_match("m1", &enc, &sign).unwrap();
    clock.advance(Duration::from_secs(1));
    security.update_score(120);
    assert_eq!(security.submit_final_score(120), SubmissionStatus::Submitting);

    security.end_match();
    security.initialize_for_match("m2", &enc, &sign).unwrap();
    run_for(&mut security, &clock, 10);

    assert_eq!(security.security_status().queued_submissions, 0);
    assert_eq!(security.controller_mut().retry_queued_submissions(), 0);
    assert_eq!(transport.sent(), 4);
    assert!(transport.sent.lock().iter().all(|request| request.match_id == "m1"));

    let completed = completions(&security);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].1, 120);
    assert_eq!(completed[0].0.status, SubmissionStatus::Failed);
}
