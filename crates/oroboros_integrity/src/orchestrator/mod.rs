//! # Security Orchestrator
//!
//! The one object game code talks to during a match.
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!  game loop ───► │     SecurityOrchestrator     │ ───► EventStream (poll)
//!                 │                              │
//!                 │  codec ◄── evidence          │
//!                 │  monitor ◄── score / input   │
//!                 │  controller ──► transport    │
//!                 └──────────────────────────────┘
//! ```
//!
//! ## Policy
//!
//! Gameplay (and submission) is allowed unless the monitor holds a
//! critical violation or the device trust level fell below
//! [`MIN_TRUST_LEVEL`].
//!
//! ## Ownership
//!
//! One orchestrator per session, passed explicitly. Hosts that need to
//! share it across threads wrap it in a [`SharedOrchestrator`].

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::anti_cheat::{AntiCheatMonitor, AntiCheatReport, PlatformIntegrityProbe};
use crate::clock::SharedClock;
use crate::codec::{InputKind, ScoreIntegrityCodec};
use crate::config::SecurityConfig;
use crate::error::{ErrorCode, IntegrityError, IntegrityResult};
use crate::events::{channel, EventSink, EventStream, SecurityEvent};
use crate::submission::{
    ClockScheduler, PayloadSealer, Scheduler, ScoreTransport, SealedSubmission,
    SecureSubmissionController, SubmissionResult, SubmissionStats, SubmissionStatus,
};

/// Trust level below which gameplay is blocked.
pub const MIN_TRUST_LEVEL: u8 = 20;

/// Shared handle for hosts that touch the orchestrator from several threads.
pub type SharedOrchestrator = Arc<Mutex<SecurityOrchestrator>>;

/// Snapshot of the whole pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatus {
    /// Codec holds match keys.
    pub encryption_ready: bool,
    /// Monitor is watching a match.
    pub anti_cheat_active: bool,
    /// Device trust level (0-100).
    pub trust_level: u8,
    /// Violations recorded this match.
    pub violation_count: usize,
    /// Any violation is critical.
    pub has_critical_violations: bool,
    /// Trail hash verifies and ends at the trusted score.
    pub score_integrity_valid: bool,
    /// Submissions in the offline queue.
    pub queued_submissions: usize,
    /// A submission is in flight.
    pub is_submitting: bool,
}

/// Match-scoped facade over codec, monitor and submission controller.
pub struct SecurityOrchestrator {
    clock: SharedClock,
    codec: ScoreIntegrityCodec,
    monitor: AntiCheatMonitor,
    controller: SecureSubmissionController,
    sink: EventSink,
    events: EventStream,
    match_id: Option<String>,
    match_started_ms: u64,
    last_score_update_ms: u64,
}

impl SecurityOrchestrator {
    /// Builds a pipeline with the default clock-driven scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Configuration`] if the config is invalid.
    pub fn new(
        config: SecurityConfig,
        clock: SharedClock,
        probe: Box<dyn PlatformIntegrityProbe>,
        transport: Box<dyn ScoreTransport>,
    ) -> IntegrityResult<Self> {
        let scheduler = Box::new(ClockScheduler::new(Arc::clone(&clock)));
        Self::with_scheduler(config, clock, probe, transport, scheduler)
    }

    /// Builds a pipeline with an explicit scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Configuration`] if the config is invalid.
    pub fn with_scheduler(
        config: SecurityConfig,
        clock: SharedClock,
        probe: Box<dyn PlatformIntegrityProbe>,
        transport: Box<dyn ScoreTransport>,
        scheduler: Box<dyn Scheduler>,
    ) -> IntegrityResult<Self> {
        config.validate()?;
        let (sink, events) = channel();

        let codec = ScoreIntegrityCodec::new(Arc::clone(&clock), probe.device_fingerprint());
        let monitor = AntiCheatMonitor::new(config.anti_cheat, Arc::clone(&clock), probe, sink.clone());
        let controller = SecureSubmissionController::new(
            config.submission,
            Arc::clone(&clock),
            scheduler,
            transport,
            sink.clone(),
        );

        Ok(Self {
            clock,
            codec,
            monitor,
            controller,
            sink,
            events,
            match_id: None,
            match_started_ms: 0,
            last_score_update_ms: 0,
        })
    }

    /// Wraps the orchestrator in a shared handle.
    #[must_use]
    pub fn into_shared(self) -> SharedOrchestrator {
        Arc::new(Mutex::new(self))
    }

    // ========================================================================
    // MATCH LIFECYCLE
    // ========================================================================

    /// Starts a match: loads keys, arms the monitor and runs one check pass.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Encryption`] if the keys are rejected. The
    /// orchestrator is left without an active match in that case.
    pub fn initialize_for_match(
        &mut self,
        match_id: &str,
        encryption_key_b64: &str,
        signing_key_b64: &str,
    ) -> IntegrityResult<()> {
        if self.match_id.is_some() {
            tracing::warn!("Match {} started while another was active", match_id);
            self.end_match();
        }

        self.codec.initialize(encryption_key_b64, signing_key_b64, match_id)?;
        self.monitor.initialize(match_id);

        let now = self.clock.monotonic_millis();
        self.match_id = Some(match_id.to_owned());
        self.match_started_ms = now;
        self.last_score_update_ms = now;
        tracing::info!("Security pipeline armed for match {}", match_id);

        if !self.run_security_checks() {
            tracing::warn!("Match {} starts with failed security checks", match_id);
        }
        Ok(())
    }

    /// Ends the match. Safe to call repeatedly.
    ///
    /// A submission already in flight keeps going but is never parked for a
    /// later match. Queued ones are dropped.
    pub fn end_match(&mut self) {
        if let Some(match_id) = self.match_id.take() {
            tracing::info!("Ending match {}", match_id);
        }
        self.codec.reset();
        self.monitor.reset();
        self.controller.end_match();
        self.match_started_ms = 0;
        self.last_score_update_ms = 0;
    }

    /// Returns true between `initialize_for_match` and `end_match`.
    #[inline]
    #[must_use]
    pub const fn is_match_active(&self) -> bool {
        self.match_id.is_some()
    }

    // ========================================================================
    // PER-FRAME INPUT
    // ========================================================================

    /// Reports a new score. Returns the monitor's verdict.
    ///
    /// The delta time is measured on the monotonic clock since the previous
    /// update (or match start). Every reported score lands in the trail.
    pub fn update_score(&mut self, score: i64) -> bool {
        if !self.is_match_active() {
            tracing::warn!("Score update {} outside a match", score);
            return false;
        }
        let now = self.clock.monotonic_millis();
        #[allow(clippy::cast_precision_loss)]
        let delta_secs = now.saturating_sub(self.last_score_update_ms) as f64 / 1000.0;
        self.last_score_update_ms = now;

        let valid = self.monitor.validate_score_update(score, delta_secs);
        self.codec.record_score_update(score);
        valid
    }

    /// Reports one input event to both codec and monitor.
    pub fn record_input(&mut self, kind: InputKind, position: (f32, f32)) {
        if !self.is_match_active() {
            return;
        }
        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&position.0.to_le_bytes());
        data[4..].copy_from_slice(&position.1.to_le_bytes());
        self.codec.record_input_event(kind, Some(&data));
        self.monitor.record_input(kind, position);
    }

    /// Reports one rendered frame.
    pub fn record_frame(&mut self, delta_secs: f64) {
        self.monitor.record_frame(delta_secs);
    }

    /// Processes network completions and timers. Call once per frame.
    pub fn update(&mut self) {
        self.controller.update();
    }

    // ========================================================================
    // POLICY
    // ========================================================================

    /// Runs every monitor check plus trail verification. Both must pass.
    pub fn run_security_checks(&mut self) -> bool {
        if !self.is_match_active() {
            return false;
        }
        let monitor_clean = self.monitor.run_integrity_check();
        let inputs_clean = self.monitor.validate_input_patterns();
        let trail_clean = self.codec.verify_score_integrity(self.monitor.protected_score());
        monitor_clean && inputs_clean && trail_clean
    }

    /// The gameplay gate: no critical violation and trust at or above [`MIN_TRUST_LEVEL`].
    #[must_use]
    pub fn should_allow_gameplay(&self) -> bool {
        !self.monitor.has_critical_violations() && self.monitor.device_trust_level() >= MIN_TRUST_LEVEL
    }

    /// Seals and submits the final score of a completed match.
    ///
    /// Short-circuits to `Rejected` without touching the network when the
    /// gameplay gate is closed.
    pub fn submit_final_score(&mut self, final_score: i64) -> SubmissionStatus {
        self.submit(final_score, None)
    }

    /// Seals and submits the score of a match that ended early.
    pub fn submit_abandoned_score(&mut self, score: i64, reason: &str) -> SubmissionStatus {
        self.submit(score, Some(reason.to_owned()))
    }

    fn submit(&mut self, score: i64, abort_reason: Option<String>) -> SubmissionStatus {
        if !self.is_match_active() {
            return self.reject_locally(
                score,
                &IntegrityError::Configuration("no active match".into()).to_string(),
                ErrorCode::Configuration,
            );
        }

        if !self.run_security_checks() {
            tracing::warn!("Security checks failed before submitting {}", score);
        }
        if !self.should_allow_gameplay() {
            let reason = format!(
                "gameplay blocked: trust level {}, {} violations",
                self.monitor.device_trust_level(),
                self.monitor.violations().len()
            );
            return self.reject_locally(score, &reason, ErrorCode::IntegrityViolation);
        }

        if let Err(err) = self.monitor.set_protected_score(score) {
            return self.reject_locally(score, &err.to_string(), err.code());
        }

        let match_duration_ms = self.clock.monotonic_millis().saturating_sub(self.match_started_ms);
        let mut sealer = MatchSealer {
            codec: &mut self.codec,
            monitor: &self.monitor,
            match_duration_ms,
            abort_reason,
        };
        self.controller.submit_score(score, false, &mut sealer)
    }

    fn reject_locally(&self, score: i64, reason: &str, code: ErrorCode) -> SubmissionStatus {
        tracing::warn!("Submission of {} rejected locally: {}", score, reason);
        let result = SubmissionResult::failure(SubmissionStatus::Rejected, code, reason, 0);
        self.sink.emit(SecurityEvent::Completed { result, original_score: score });
        SubmissionStatus::Rejected
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Outbound events. Poll once per frame.
    #[inline]
    #[must_use]
    pub const fn events(&self) -> &EventStream {
        &self.events
    }

    /// Snapshot of the whole pipeline.
    #[must_use]
    pub fn security_status(&self) -> SecurityStatus {
        SecurityStatus {
            encryption_ready: self.codec.is_initialized(),
            anti_cheat_active: self.monitor.is_active(),
            trust_level: self.monitor.device_trust_level(),
            violation_count: self.monitor.violations().len(),
            has_critical_violations: self.monitor.has_critical_violations(),
            score_integrity_valid: self.is_match_active()
                && self.codec.verify_score_integrity(self.monitor.protected_score()),
            queued_submissions: self.controller.queued_count(),
            is_submitting: self.controller.is_submitting(),
        }
    }

    /// Anti-cheat report for the current match.
    #[must_use]
    pub fn anti_cheat_report(&self) -> AntiCheatReport {
        self.monitor.anti_cheat_report()
    }

    /// The codec.
    #[inline]
    #[must_use]
    pub const fn codec(&self) -> &ScoreIntegrityCodec {
        &self.codec
    }

    /// Mutable codec access (random seed, game state).
    #[inline]
    pub fn codec_mut(&mut self) -> &mut ScoreIntegrityCodec {
        &mut self.codec
    }

    /// The monitor.
    #[inline]
    #[must_use]
    pub const fn monitor(&self) -> &AntiCheatMonitor {
        &self.monitor
    }

    /// Mutable monitor access (external violations, server time sync).
    #[inline]
    pub fn monitor_mut(&mut self) -> &mut AntiCheatMonitor {
        &mut self.monitor
    }

    /// The submission controller.
    #[inline]
    #[must_use]
    pub const fn controller(&self) -> &SecureSubmissionController {
        &self.controller
    }

    /// Mutable controller access (connectivity, queue, cancellation).
    #[inline]
    pub fn controller_mut(&mut self) -> &mut SecureSubmissionController {
        &mut self.controller
    }
}

/// Seals with the live match keys and evidence.
struct MatchSealer<'a> {
    codec: &'a mut ScoreIntegrityCodec,
    monitor: &'a AntiCheatMonitor,
    match_duration_ms: u64,
    abort_reason: Option<String>,
}

impl PayloadSealer for MatchSealer<'_> {
    fn seal(&mut self, score: i64) -> IntegrityResult<SealedSubmission> {
        let integrity = self.codec.build_integrity(score, self.monitor.frame_stats());
        let payload = self.codec.encrypt_score(score, &integrity)?;
        self.codec.verify_payload(&payload)?;

        let stats = SubmissionStats {
            score_update_count: integrity.score_update_count,
            input_event_count: integrity.input_event_count,
            frame_count: integrity.frame_count,
            average_fps: integrity.average_fps,
            trust_level: self.monitor.device_trust_level(),
            violation_count: self.monitor.violations().len(),
        };
        Ok(SealedSubmission {
            payload,
            completed: self.abort_reason.is_none(),
            abort_reason: self.abort_reason.take(),
            match_duration_ms: self.match_duration_ms,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anti_cheat::{NullProbe, Severity, ViolationKind};
    use crate::clock::ManualClock;
    use crate::codec::{EncryptedScorePayload, WirePayload};
    use crate::submission::{ResponseSink, SubmissionRequest, TransportResponse};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct AcceptingTransport {
        sent: Arc<Mutex<Vec<SubmissionRequest>>>,
    }

    impl ScoreTransport for AcceptingTransport {
        fn send(&mut self, request: SubmissionRequest, sink: ResponseSink) {
            self.sent.lock().push(request);
            sink.complete(Ok(TransportResponse::new(200, r#"{"integrityVerified":true}"#)));
        }
    }

    fn keys() -> (String, String) {
        (STANDARD.encode([7u8; 32]), STANDARD.encode([9u8; 32]))
    }

    fn orchestrator() -> (SecurityOrchestrator, ManualClock, AcceptingTransport) {
        let clock = ManualClock::new(1_700_000_000_000);
        let transport = AcceptingTransport::default();
        let orchestrator = SecurityOrchestrator::new(
            SecurityConfig::default(),
            clock.shared(),
            Box::new(NullProbe),
            Box::new(transport.clone()),
        )
        .unwrap();
        (orchestrator, clock, transport)
    }

    fn started() -> (SecurityOrchestrator, ManualClock, AcceptingTransport) {
        let (mut o, clock, transport) = orchestrator();
        let (enc, sign) = keys();
        o.initialize_for_match("m1", &enc, &sign).unwrap();
        (o, clock, transport)
    }

    #[test]
    fn test_initialize_arms_everything() {
        let (o, _, _) = started();
        let status = o.security_status();
        assert!(status.encryption_ready);
        assert!(status.anti_cheat_active);
        assert_eq!(status.trust_level, 100);
        assert!(status.score_integrity_valid);
        assert!(o.should_allow_gameplay());
    }

    #[test]
    fn test_bad_keys_leave_no_match() {
        let (mut o, _, _) = orchestrator();
        let err = o.initialize_for_match("m1", "not base64!", "c2lnbg==").unwrap_err();
        assert!(matches!(err, IntegrityError::Encryption(_)));
        assert!(!o.is_match_active());
        assert!(!o.security_status().anti_cheat_active);
    }

    #[test]
    fn test_invalid_config_refused() {
        let clock = ManualClock::new(0);
        let mut config = SecurityConfig::default();
        config.submission.submission_timeout_secs = 0.0;
        let result = SecurityOrchestrator::new(
            config,
            clock.shared(),
            Box::new(NullProbe),
            Box::new(AcceptingTransport::default()),
        );
        assert!(matches!(result, Err(IntegrityError::Configuration(_))));
    }

    #[test]
    fn test_score_updates_use_elapsed_time() {
        let (mut o, clock, _) = started();
        clock.advance(Duration::from_secs(1));
        assert!(o.update_score(50));
        clock.advance(Duration::from_secs(1));
        assert!(o.update_score(120));

        clock.advance(Duration::from_millis(10));
        assert!(!o.update_score(100_000));
        assert_eq!(o.monitor().protected_score(), 120);
        assert!(!o.security_status().score_integrity_valid);
    }

    #[test]
    fn test_final_score_sealed_and_verified() {
        let (mut o, clock, transport) = started();
        clock.advance(Duration::from_secs(1));
        o.update_score(50);
        clock.advance(Duration::from_secs(1));
        o.update_score(120);
        o.record_input(InputKind::Tap, (10.0, 20.0));

        assert_eq!(o.submit_final_score(120), SubmissionStatus::Submitting);
        o.update();

        let completed: Vec<_> = o
            .events()
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                SecurityEvent::Completed { result, .. } => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, SubmissionStatus::Verified);
        assert!(completed[0].integrity_verified);

        let body = transport.sent.lock()[0].body.clone();
        let wire: WirePayload = serde_json::from_str(&body).unwrap();
        let payload = EncryptedScorePayload::from_wire(&wire).unwrap();
        let sealed = o.codec().open_payload(&payload).unwrap();
        assert_eq!(sealed.score, 120);
        assert_eq!(sealed.integrity.score_update_count, 2);
        assert_eq!(sealed.integrity.input_event_count, 1);
    }

    #[test]
    fn test_abandoned_score_marks_incomplete() {
        let (mut o, _, transport) = started();
        o.submit_abandoned_score(0, "player quit");
        let body: serde_json::Value = serde_json::from_str(&transport.sent.lock()[0].body).unwrap();
        assert_eq!(body["completed"], serde_json::Value::Bool(false));
        assert_eq!(body["abortReason"], "player quit");
    }

    #[test]
    fn test_blocked_gameplay_short_circuits() {
        let (mut o, _, transport) = started();
        for _ in 0..3 {
            o.monitor_mut()
                .report_violation(ViolationKind::CodeInjection, Severity::Critical, "hooked");
        }
        assert!(!o.should_allow_gameplay());
        let _ = o.events().drain();

        assert_eq!(o.submit_final_score(0), SubmissionStatus::Rejected);
        assert!(transport.sent.lock().is_empty());

        let events = o.events().drain();
        let rejected = events.iter().find_map(|e| match e {
            SecurityEvent::Completed { result, .. } => Some(result.clone()),
            _ => None,
        });
        let rejected = rejected.unwrap();
        assert_eq!(rejected.status, SubmissionStatus::Rejected);
        assert_eq!(rejected.error_code, Some(ErrorCode::IntegrityViolation));
    }

    #[test]
    fn test_low_trust_blocks_without_criticals() {
        let (mut o, _, _) = started();
        for _ in 0..6 {
            o.monitor_mut().report_violation(ViolationKind::DeviceAnomaly, Severity::High, "odd");
        }
        assert!(!o.monitor().has_critical_violations());
        assert!(o.monitor().device_trust_level() < MIN_TRUST_LEVEL);
        assert!(!o.should_allow_gameplay());
    }

    #[test]
    fn test_submit_outside_match_rejected() {
        let (mut o, _, transport) = orchestrator();
        assert_eq!(o.submit_final_score(10), SubmissionStatus::Rejected);
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn test_end_match_is_idempotent() {
        let (mut o, _, _) = started();
        o.end_match();
        o.end_match();
        let status = o.security_status();
        assert!(!status.encryption_ready);
        assert!(!status.anti_cheat_active);
        assert_eq!(status.violation_count, 0);
        assert!(!o.update_score(10));
    }

    #[test]
    fn test_shared_handle() {
        let (o, _, _) = started();
        let shared = o.into_shared();
        let worker = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || shared.lock().security_status().trust_level)
        };
        assert_eq!(worker.join().unwrap(), 100);
    }
}
