//! # Score Transport
//!
//! The network seam. The controller hands a request and a one-shot
//! [`ResponseSink`] to the transport; the transport completes the sink
//! whenever the response arrives, from whatever thread it likes. The
//! completion is queued and handled on the controller's next `update()`.

use crossbeam_channel::Sender;
use thiserror::Error;

/// One HTTP-like request carrying a sealed score.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionRequest {
    /// Controller-local submission id.
    pub submission_id: u64,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Match the score belongs to.
    pub match_id: String,
    /// Endpoint path.
    pub endpoint: String,
    /// JSON body.
    pub body: String,
}

/// A response from the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl TransportResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }
}

/// The request never produced a response.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("transport failure: {0}")]
pub struct TransportFailure(
    /// What went wrong.
    pub String,
);

/// Outcome of one send.
pub type TransportOutcome = Result<TransportResponse, TransportFailure>;

/// A completed send, routed back to the controller.
#[derive(Debug)]
pub(crate) struct TransportCompletion {
    pub(crate) submission_id: u64,
    pub(crate) attempt: u32,
    pub(crate) outcome: TransportOutcome,
}

/// One-shot completion handle for a send.
#[derive(Debug)]
pub struct ResponseSink {
    submission_id: u64,
    attempt: u32,
    tx: Sender<TransportCompletion>,
}

impl ResponseSink {
    pub(crate) fn new(submission_id: u64, attempt: u32, tx: Sender<TransportCompletion>) -> Self {
        Self { submission_id, attempt, tx }
    }

    /// Delivers the outcome. Consumes the sink, so a send completes once.
    pub fn complete(self, outcome: TransportOutcome) {
        let completion = TransportCompletion {
            submission_id: self.submission_id,
            attempt: self.attempt,
            outcome,
        };
        if self.tx.send(completion).is_err() {
            tracing::debug!(
                "Completion for submission {} attempt {} dropped: controller gone",
                self.submission_id,
                self.attempt
            );
        }
    }
}

/// Network transport used by the submission controller.
pub trait ScoreTransport: Send {
    /// Starts sending `request`. Must not block.
    fn send(&mut self, request: SubmissionRequest, sink: ResponseSink);
}
