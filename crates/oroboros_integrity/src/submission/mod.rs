//! # Secure Score Submission
//!
//! Delivers one logical score per match, hiding transient network failure
//! behind retries and parking what cannot be delivered.
//!
//! ```text
//!             ┌──────── retry (backoff) ────────┐
//!             ▼                                 │
//! Pending ─► Submitting ─┬─► Verified / Flagged │
//!                        ├─► Rejected           │
//!                        ├─► Failed ────────────┤
//!                        └─► TimedOut ──────────┘
//!                                 │ retries exhausted
//!                                 ▼
//!                          offline queue (or terminal result)
//! ```
//!
//! ## Rules
//!
//! - At most one submission in flight. A second score waits in the queue.
//! - Local validation failures never touch the network.
//! - `Completed` is emitted at most once per submission.
//! - Nothing here blocks. Responses and timers are processed in `update()`.

mod queue;
mod scheduler;
mod transport;

pub use queue::{OfflineQueue, QueueOverflowPolicy, QueuePush, QueuedSubmission};
pub use scheduler::{ClockScheduler, Scheduler, TimerHandle, TimerTask};
pub use transport::{
    ResponseSink, ScoreTransport, SubmissionRequest, TransportFailure, TransportOutcome,
    TransportResponse,
};

use std::collections::HashSet;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::codec::{EncryptedScorePayload, WirePayload};
use crate::error::{CodecError, ConfigError, ErrorCode, IntegrityError, IntegrityResult};
use crate::events::{EventSink, SecurityEvent};
use transport::TransportCompletion;

/// Smallest elapsed time used by the progression predicate (seconds).
const MIN_ELAPSED_SECS: f64 = 0.001;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Submission policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Endpoint path for score submission.
    pub endpoint: String,
    /// Lowest accepted score.
    pub min_score: i64,
    /// Highest accepted score.
    pub max_score: i64,
    /// Maximum score gain per second for the progression predicate.
    pub max_score_per_second: f64,
    /// Retries after the first attempt.
    pub max_retry_attempts: u32,
    /// First backoff delay (seconds).
    pub retry_base_delay_secs: f64,
    /// Backoff ceiling (seconds).
    pub retry_max_delay_secs: f64,
    /// Response deadline per attempt (seconds).
    pub submission_timeout_secs: f64,
    /// Park undeliverable submissions instead of failing them.
    pub enable_offline_queue: bool,
    /// Offline queue capacity.
    pub max_queued_submissions: usize,
    /// What a full queue does with one more entry.
    pub queue_overflow: QueueOverflowPolicy,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            endpoint: "/api/v1/matches/score".to_owned(),
            min_score: 0,
            max_score: 1_000_000_000,
            max_score_per_second: 1000.0,
            max_retry_attempts: 3,
            retry_base_delay_secs: 1.0,
            retry_max_delay_secs: 30.0,
            submission_timeout_secs: 15.0,
            enable_offline_queue: true,
            max_queued_submissions: 10,
            queue_overflow: QueueOverflowPolicy::DropOldest,
        }
    }
}

impl SubmissionConfig {
    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first nonsensical value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(invalid("submission.endpoint", "must not be empty"));
        }
        if self.min_score < 0 {
            return Err(invalid("submission.min_score", "scores are never negative"));
        }
        if self.min_score > self.max_score {
            return Err(invalid("submission.min_score", "must not exceed max_score"));
        }
        if !(self.max_score_per_second.is_finite() && self.max_score_per_second > 0.0) {
            return Err(invalid("submission.max_score_per_second", "must be a positive number"));
        }
        if !(self.retry_max_delay_secs.is_finite() && self.retry_max_delay_secs > 0.0) {
            return Err(invalid("submission.retry_max_delay_secs", "must be a positive number"));
        }
        if !(self.retry_base_delay_secs.is_finite() && self.retry_base_delay_secs > 0.0)
            || self.retry_base_delay_secs > self.retry_max_delay_secs
        {
            return Err(invalid(
                "submission.retry_base_delay_secs",
                "must be positive and not exceed retry_max_delay_secs",
            ));
        }
        if !(self.submission_timeout_secs.is_finite() && self.submission_timeout_secs > 0.0) {
            return Err(invalid("submission.submission_timeout_secs", "must be a positive number"));
        }
        if self.enable_offline_queue && self.max_queued_submissions == 0 {
            return Err(invalid(
                "submission.max_queued_submissions",
                "must be positive while the offline queue is enabled",
            ));
        }
        Ok(())
    }

    /// Backoff before the retry that follows `retry_count` earlier retries.
    ///
    /// `min(base * 2^retry_count, max)`.
    #[must_use]
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let secs = (self.retry_base_delay_secs * 2f64.powi(exponent)).min(self.retry_max_delay_secs);
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }

    /// Response deadline per attempt.
    #[must_use]
    pub fn submission_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.submission_timeout_secs).unwrap_or_default()
    }

    /// Total attempts including the first one.
    #[inline]
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retry_attempts.saturating_add(1)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.to_owned() }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Lifecycle state of a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Nothing in flight.
    Pending,
    /// Request sent or backing off before a retry.
    Submitting,
    /// Server accepted the score.
    Verified,
    /// Delivery failed.
    Failed,
    /// Rejected locally or by the server. Never retried.
    Rejected,
    /// No response within the deadline.
    TimedOut,
    /// Server accepted the score but marked it for review.
    Flagged,
}

impl SubmissionStatus {
    /// Returns true for outcomes the server accepted.
    #[inline]
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Verified | Self::Flagged)
    }
}

/// Outcome of a submission, delivered with [`SecurityEvent::Completed`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    /// Final status.
    pub status: SubmissionStatus,
    /// Score the server accepted (0 unless accepted).
    pub verified_score: i64,
    /// Error category, `None` on success.
    pub error_code: Option<ErrorCode>,
    /// Error detail, empty on success.
    pub error_message: String,
    /// Retries spent.
    pub retry_count: u32,
    /// Server time of the verdict, or local wall time when the server sent none.
    pub server_timestamp: i64,
    /// Server confirmed the integrity evidence.
    pub integrity_verified: bool,
}

impl SubmissionResult {
    /// Builds a failed result from an error.
    #[must_use]
    pub fn from_error(status: SubmissionStatus, error: &IntegrityError, retry_count: u32) -> Self {
        Self::failure(status, error.code(), error.to_string(), retry_count)
    }

    /// Builds a failed result from a code and message.
    #[must_use]
    pub fn failure(
        status: SubmissionStatus,
        code: ErrorCode,
        message: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            status,
            verified_score: 0,
            error_code: Some(code),
            error_message: message.into(),
            retry_count,
            server_timestamp: 0,
            integrity_verified: false,
        }
    }

    /// Returns true only for a clean `Verified`. Flagged scores were
    /// accepted but are not a success.
    #[inline]
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, SubmissionStatus::Verified)
    }
}

// ============================================================================
// SEALING
// ============================================================================

/// Summary statistics sent next to the payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStats {
    /// Score updates recorded.
    pub score_update_count: u64,
    /// Input events recorded.
    pub input_event_count: u64,
    /// Frames recorded.
    pub frame_count: u64,
    /// Average frames per second.
    pub average_fps: f64,
    /// Device trust level at sealing time.
    pub trust_level: u8,
    /// Violations at sealing time.
    pub violation_count: usize,
}

/// A sealed score ready to be sent.
#[derive(Clone, Debug, PartialEq)]
pub struct SealedSubmission {
    /// Encrypted, signed score.
    pub payload: EncryptedScorePayload,
    /// The match ran to completion.
    pub completed: bool,
    /// Why the match ended early, if it did.
    pub abort_reason: Option<String>,
    /// Match duration (ms).
    pub match_duration_ms: u64,
    /// Summary statistics.
    pub stats: SubmissionStats,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody<'a> {
    #[serde(flatten)]
    payload: WirePayload,
    completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    abort_reason: Option<&'a str>,
    match_duration: u64,
    stats: &'a SubmissionStats,
}

impl SealedSubmission {
    /// Serializes the request body: wire payload fields (including its
    /// `timestamp`) plus the match summary.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Encryption`] if serialization fails.
    pub fn to_request_body(&self) -> IntegrityResult<String> {
        let body = RequestBody {
            payload: self.payload.to_wire(),
            completed: self.completed,
            abort_reason: self.abort_reason.as_deref(),
            match_duration: self.match_duration_ms,
            stats: &self.stats,
        };
        serde_json::to_string(&body)
            .map_err(|e| IntegrityError::Encryption(CodecError::Serialization(e.to_string())))
    }
}

/// Produces a sealed payload for a score on demand.
pub trait PayloadSealer {
    /// Collects evidence and encrypts `score`.
    ///
    /// # Errors
    ///
    /// Any error aborts the submission. No partial payload is sent.
    fn seal(&mut self, score: i64) -> IntegrityResult<SealedSubmission>;
}

/// Optional fields of a server response body.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ServerVerdict {
    verified_score: Option<i64>,
    flagged: bool,
    server_timestamp: Option<i64>,
    integrity_verified: Option<bool>,
    message: Option<String>,
    error: Option<String>,
}

impl ServerVerdict {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }
}

// ============================================================================
// CONTROLLER
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    AwaitingResponse,
    BackingOff,
}

#[derive(Debug)]
struct ActiveSubmission {
    id: u64,
    score: i64,
    match_id: String,
    body: String,
    retry_count: u32,
    timer: Option<TimerHandle>,
    phase: Phase,
    /// May be parked in the offline queue once retries run out.
    parkable: bool,
}

impl ActiveSubmission {
    const fn attempt(&self) -> u32 {
        self.retry_count + 1
    }
}

impl From<QueuedSubmission> for ActiveSubmission {
    fn from(entry: QueuedSubmission) -> Self {
        Self {
            id: entry.id,
            score: entry.score,
            match_id: entry.match_id,
            body: entry.body,
            retry_count: 0,
            timer: None,
            phase: Phase::AwaitingResponse,
            parkable: true,
        }
    }
}

/// Retry, timeout and queue state machine for score submission.
pub struct SecureSubmissionController {
    config: SubmissionConfig,
    clock: SharedClock,
    scheduler: Box<dyn Scheduler>,
    transport: Box<dyn ScoreTransport>,
    events: EventSink,
    completions_tx: Sender<TransportCompletion>,
    completions_rx: Receiver<TransportCompletion>,
    status: SubmissionStatus,
    active: Option<ActiveSubmission>,
    queue: OfflineQueue,
    online: bool,
    next_id: u64,
    last_result: Option<SubmissionResult>,
    /// Nonces of every payload sealed this session.
    sent_nonces: HashSet<String>,
}

impl SecureSubmissionController {
    /// Creates an idle controller.
    #[must_use]
    pub fn new(
        config: SubmissionConfig,
        clock: SharedClock,
        scheduler: Box<dyn Scheduler>,
        transport: Box<dyn ScoreTransport>,
        events: EventSink,
    ) -> Self {
        let (completions_tx, completions_rx) = unbounded();
        let queue = OfflineQueue::new(config.max_queued_submissions, config.queue_overflow);
        Self {
            config,
            clock,
            scheduler,
            transport,
            events,
            completions_tx,
            completions_rx,
            status: SubmissionStatus::Pending,
            active: None,
            queue,
            online: true,
            next_id: 1,
            last_result: None,
            sent_nonces: HashSet::new(),
        }
    }

    /// Submits a score.
    ///
    /// Returns the immediate state: `Submitting` if a request went out,
    /// `Pending` if the score was queued, or a terminal status if it was
    /// refused before reaching the network.
    pub fn submit_score(
        &mut self,
        score: i64,
        force_submit: bool,
        sealer: &mut dyn PayloadSealer,
    ) -> SubmissionStatus {
        if let Err(err) = self.validate_score(score) {
            tracing::warn!("Score {} rejected locally: {}", score, err);
            self.refuse(SubmissionResult::from_error(SubmissionStatus::Rejected, &err, 0), score);
            return SubmissionStatus::Rejected;
        }

        if force_submit && self.active.is_some() {
            tracing::warn!("Forced submission of {} supersedes the one in flight", score);
            self.cancel_submission();
        }

        let (match_id, nonce, body) = match Self::seal_request(score, sealer) {
            Ok(sealed) => sealed,
            Err(err) => {
                tracing::warn!("Sealing score {} failed: {}", score, err);
                self.refuse(SubmissionResult::from_error(SubmissionStatus::Failed, &err, 0), score);
                return SubmissionStatus::Failed;
            }
        };
        if !self.sent_nonces.insert(nonce.clone()) {
            let err = IntegrityError::Encryption(CodecError::ReplayDetected(nonce));
            tracing::warn!("Score {} refused before sending: {}", score, err);
            self.refuse(SubmissionResult::from_error(SubmissionStatus::Rejected, &err, 0), score);
            return SubmissionStatus::Rejected;
        }
        let id = self.next_id;
        self.next_id += 1;

        if self.active.is_some() || !self.online {
            let reason = if self.online { "a submission is in flight" } else { "offline" };
            let entry = QueuedSubmission {
                id,
                score,
                match_id,
                body,
                retry_count: 0,
                queued_at_ms: self.clock.wall_millis(),
            };
            return match self.enqueue(entry) {
                Ok(true) => SubmissionStatus::Pending,
                Ok(false) => SubmissionStatus::Failed,
                Err(entry) => {
                    let result = SubmissionResult::failure(
                        SubmissionStatus::Failed,
                        ErrorCode::QueueOverflow,
                        format!("{reason} and the offline queue is disabled"),
                        0,
                    );
                    self.refuse(result, entry.score);
                    SubmissionStatus::Failed
                }
            };
        }

        self.start(ActiveSubmission {
            id,
            score,
            match_id,
            body,
            retry_count: 0,
            timer: None,
            phase: Phase::AwaitingResponse,
            parkable: true,
        });
        SubmissionStatus::Submitting
    }

    /// Processes transport completions, then due timers.
    pub fn update(&mut self) {
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.on_completion(completion);
        }
        for (handle, task) in self.scheduler.poll_due() {
            self.on_timer(handle, task);
        }
    }

    /// Abandons the submission in flight. Queue contents are untouched and
    /// no completion is emitted.
    pub fn cancel_submission(&mut self) -> bool {
        let Some(mut active) = self.active.take() else {
            return false;
        };
        if let Some(handle) = active.timer.take() {
            self.scheduler.cancel(handle);
        }
        self.status = SubmissionStatus::Pending;
        tracing::info!("Submission {} (score {}) cancelled", active.id, active.score);
        true
    }

    /// Starts draining the offline queue, one submission at a time.
    ///
    /// Returns the number of entries waiting when the drain started.
    pub fn retry_queued_submissions(&mut self) -> usize {
        let waiting = self.queue.len();
        if waiting == 0 || !self.online {
            return 0;
        }
        tracing::info!("Draining {} queued submissions", waiting);
        self.advance_queue();
        waiting
    }

    /// Discards every queued entry. Returns how many were dropped.
    pub fn clear_queue(&mut self) -> usize {
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::info!("Discarded {} queued submissions", dropped);
        }
        dropped
    }

    /// Updates connectivity. Going online drains the queue.
    pub fn set_online(&mut self, online: bool) {
        if self.online == online {
            return;
        }
        self.online = online;
        tracing::info!("Submission controller is now {}", if online { "online" } else { "offline" });
        if online {
            self.retry_queued_submissions();
        }
    }

    /// Closes the current match: drops queued entries and forgets sent
    /// nonces. A submission in flight may still finish, but if its retries
    /// run out it ends with a terminal result instead of being parked.
    ///
    /// Returns the number of queued entries dropped.
    pub fn end_match(&mut self) -> usize {
        if let Some(active) = self.active.as_mut() {
            active.parkable = false;
        }
        self.sent_nonces.clear();
        self.clear_queue()
    }

    /// Cancels the submission in flight and empties the queue.
    pub fn reset(&mut self) {
        self.cancel_submission();
        self.clear_queue();
        self.sent_nonces.clear();
        while self.completions_rx.try_recv().is_ok() {}
        self.status = SubmissionStatus::Pending;
        self.last_result = None;
    }

    /// Range and sign check.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Validation`] for negative or out-of-range scores.
    pub fn validate_score(&self, score: i64) -> IntegrityResult<()> {
        if score < 0 {
            return Err(IntegrityError::Validation(format!("score {score} is negative")));
        }
        if !self.is_score_in_range(score) {
            return Err(IntegrityError::Validation(format!(
                "score {score} outside [{}, {}]",
                self.config.min_score, self.config.max_score
            )));
        }
        Ok(())
    }

    /// Returns true if `score` is within the configured bounds.
    #[must_use]
    pub fn is_score_in_range(&self, score: i64) -> bool {
        (self.config.min_score..=self.config.max_score).contains(&score)
    }

    /// Returns true if going from `previous` to `new` in `elapsed_secs` is plausible.
    #[must_use]
    pub fn is_score_progression_valid(&self, previous: i64, new: i64, elapsed_secs: f64) -> bool {
        if new < previous {
            return false;
        }
        let elapsed = if elapsed_secs.is_finite() && elapsed_secs > MIN_ELAPSED_SECS {
            elapsed_secs
        } else {
            MIN_ELAPSED_SECS
        };
        #[allow(clippy::cast_precision_loss)]
        let rate = (i128::from(new) - i128::from(previous)) as f64 / elapsed;
        rate <= self.config.max_score_per_second
    }

    /// Returns true while a submission is in flight or backing off.
    #[inline]
    #[must_use]
    pub const fn is_submitting(&self) -> bool {
        self.active.is_some()
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub const fn status(&self) -> SubmissionStatus {
        self.status
    }

    /// Most recent finished (or parked) result.
    #[must_use]
    pub const fn last_result(&self) -> Option<&SubmissionResult> {
        self.last_result.as_ref()
    }

    /// Number of queued submissions.
    #[inline]
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// The offline queue.
    #[inline]
    #[must_use]
    pub const fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    /// Armed timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending()
    }

    /// Returns true unless `set_online(false)` was called.
    #[inline]
    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.online
    }

    /// Policy in use.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &SubmissionConfig {
        &self.config
    }

    fn seal_request(
        score: i64,
        sealer: &mut dyn PayloadSealer,
    ) -> IntegrityResult<(String, String, String)> {
        let sealed = sealer.seal(score)?;
        let body = sealed.to_request_body()?;
        Ok((sealed.payload.match_id, sealed.payload.nonce, body))
    }

    fn start(&mut self, active: ActiveSubmission) {
        self.active = Some(active);
        self.status = SubmissionStatus::Submitting;
        self.send_submission();
    }

    /// Sends the current attempt and arms its response deadline.
    fn send_submission(&mut self) {
        let timeout = self.config.submission_timeout();
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let attempt = active.attempt();
        let request = SubmissionRequest {
            submission_id: active.id,
            attempt,
            match_id: active.match_id.clone(),
            endpoint: self.config.endpoint.clone(),
            body: active.body.clone(),
        };
        active.phase = Phase::AwaitingResponse;
        self.status = SubmissionStatus::Submitting;
        active.timer = Some(self.scheduler.schedule(
            timeout,
            TimerTask::ResponseTimeout { submission_id: active.id, attempt },
        ));

        let (id, score) = (active.id, active.score);
        let max_attempts = self.config.max_attempts();
        self.events.emit(SecurityEvent::Progress { score, attempt, max_attempts });
        tracing::info!("Submitting score {} (attempt {}/{})", score, attempt, max_attempts);

        let sink = ResponseSink::new(id, attempt, self.completions_tx.clone());
        self.transport.send(request, sink);
    }

    fn on_completion(&mut self, completion: TransportCompletion) {
        let live = self.active.as_ref().is_some_and(|a| {
            a.id == completion.submission_id
                && a.attempt() == completion.attempt
                && a.phase == Phase::AwaitingResponse
        });
        if !live {
            tracing::debug!(
                "Ignoring stale completion for submission {} attempt {}",
                completion.submission_id,
                completion.attempt
            );
            return;
        }
        if let Some(handle) = self.active.as_mut().and_then(|a| a.timer.take()) {
            self.scheduler.cancel(handle);
        }

        match completion.outcome {
            Ok(response) => self.on_response(response),
            Err(failure) => self.on_failure(IntegrityError::Network(failure.0)),
        }
    }

    fn on_timer(&mut self, handle: TimerHandle, task: TimerTask) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.timer != Some(handle) {
            return;
        }
        match task {
            TimerTask::ResponseTimeout { submission_id, attempt }
                if active.id == submission_id
                    && active.attempt() == attempt
                    && active.phase == Phase::AwaitingResponse =>
            {
                active.timer = None;
                tracing::warn!("Submission {} attempt {} timed out", submission_id, attempt);
                self.on_failure(IntegrityError::Timeout);
            }
            TimerTask::Retry { submission_id }
                if active.id == submission_id && active.phase == Phase::BackingOff =>
            {
                active.timer = None;
                self.send_submission();
            }
            _ => {}
        }
    }

    fn on_response(&mut self, response: TransportResponse) {
        match response.status {
            200..=299 => {
                let Some(active) = self.active.take() else {
                    return;
                };
                let verdict = ServerVerdict::parse(&response.body);
                let status = if verdict.flagged {
                    SubmissionStatus::Flagged
                } else {
                    SubmissionStatus::Verified
                };
                let result = SubmissionResult {
                    status,
                    verified_score: verdict.verified_score.unwrap_or(active.score),
                    error_code: None,
                    error_message: String::new(),
                    retry_count: active.retry_count,
                    server_timestamp: verdict.server_timestamp.unwrap_or_else(|| self.clock.wall_millis()),
                    integrity_verified: verdict.integrity_verified.unwrap_or(!verdict.flagged),
                };
                tracing::info!(
                    "Score {} {:?} after {} retries",
                    active.score,
                    status,
                    active.retry_count
                );
                self.finish(result, active.score);
            }
            408 | 429 | 500..=599 => {
                self.on_failure(IntegrityError::Network(format!("server returned {}", response.status)));
            }
            status => {
                let Some(active) = self.active.take() else {
                    return;
                };
                let verdict = ServerVerdict::parse(&response.body);
                let message = verdict.message.or(verdict.error).unwrap_or(response.body);
                let err = IntegrityError::ServerRejection { status, message };
                tracing::warn!("Score {} rejected by server: {}", active.score, err);
                self.finish(
                    SubmissionResult::from_error(SubmissionStatus::Rejected, &err, active.retry_count),
                    active.score,
                );
            }
        }
    }

    /// Retryable failure: back off, or park / fail once retries run out.
    fn on_failure(&mut self, err: IntegrityError) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.retry_count < self.config.max_retry_attempts {
            let delay = self.config.retry_delay(active.retry_count);
            tracing::warn!(
                "Submission {} attempt {} failed ({}), retrying in {:?}",
                active.id,
                active.attempt(),
                err,
                delay
            );
            active.retry_count += 1;
            active.phase = Phase::BackingOff;
            active.timer = Some(
                self.scheduler
                    .schedule(delay, TimerTask::Retry { submission_id: active.id }),
            );
            return;
        }

        let Some(active) = self.active.take() else {
            return;
        };
        let parkable = active.parkable;
        let status = if matches!(err, IntegrityError::Timeout) {
            SubmissionStatus::TimedOut
        } else {
            SubmissionStatus::Failed
        };
        let result = SubmissionResult::from_error(status, &err, active.retry_count);
        tracing::warn!(
            "Submission {} gave up after {} attempts: {}",
            active.id,
            active.attempt(),
            err
        );

        let entry = QueuedSubmission {
            id: active.id,
            score: active.score,
            match_id: active.match_id,
            body: active.body,
            retry_count: active.retry_count,
            queued_at_ms: self.clock.wall_millis(),
        };
        let parked = if parkable { self.enqueue(entry) } else { Err(entry) };
        match parked {
            Ok(_) => {
                self.status = status;
                self.last_result = Some(result);
            }
            Err(entry) => self.finish(result, entry.score),
        }
    }

    /// Parks an entry.
    ///
    /// `Ok(true)` stored, `Ok(false)` refused by the overflow policy (already
    /// reported), `Err` when queueing is disabled.
    fn enqueue(&mut self, entry: QueuedSubmission) -> Result<bool, QueuedSubmission> {
        if !self.config.enable_offline_queue {
            return Err(entry);
        }
        let (id, score) = (entry.id, entry.score);
        match self.queue.push(entry) {
            QueuePush::Queued => {
                tracing::info!("Submission {} (score {}) queued, {} waiting", id, score, self.queue.len());
                Ok(true)
            }
            QueuePush::Evicted(oldest) => {
                tracing::warn!("Offline queue full, evicted submission {}", oldest.id);
                self.report(overflow_result(oldest.retry_count), oldest.score);
                Ok(true)
            }
            QueuePush::Rejected(newest) => {
                tracing::warn!("Offline queue full, refused submission {}", newest.id);
                self.report(overflow_result(newest.retry_count), newest.score);
                Ok(false)
            }
        }
    }

    /// Terminal outcome of the controller's own submission.
    fn finish(&mut self, result: SubmissionResult, original_score: i64) {
        self.status = result.status;
        self.last_result = Some(result.clone());
        let delivered = matches!(
            result.status,
            SubmissionStatus::Verified | SubmissionStatus::Flagged | SubmissionStatus::Rejected
        );
        self.report(result, original_score);
        if delivered {
            self.advance_queue();
        }
    }

    /// Terminal outcome of a score refused before it became the active
    /// submission. Controller state belongs to the one in flight, if any.
    fn refuse(&mut self, result: SubmissionResult, original_score: i64) {
        if self.active.is_none() {
            self.status = result.status;
            self.last_result = Some(result.clone());
        }
        self.report(result, original_score);
    }

    fn report(&self, result: SubmissionResult, original_score: i64) {
        self.events.emit(SecurityEvent::Completed { result, original_score });
    }

    fn advance_queue(&mut self) {
        if self.active.is_some() || !self.online {
            return;
        }
        if let Some(entry) = self.queue.pop_front() {
            self.start(ActiveSubmission::from(entry));
        }
    }
}

fn overflow_result(retry_count: u32) -> SubmissionResult {
    SubmissionResult::failure(
        SubmissionStatus::Failed,
        ErrorCode::QueueOverflow,
        "dropped from full offline queue",
        retry_count,
    )
}
