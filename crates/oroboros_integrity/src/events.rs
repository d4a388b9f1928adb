//! # Outbound Events
//!
//! The only signals the pipeline sends to the rest of the application.
//!
//! ```text
//! AntiCheatMonitor ──Violation──┐
//!                               ├──► EventSink ══channel══► EventStream ──► UI / host
//! SubmissionController ─Progress/Completed─┘
//! ```
//!
//! Callers poll the stream once per frame. Nothing is pushed into caller
//! code from inside the pipeline.

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use crate::anti_cheat::Violation;
use crate::submission::SubmissionResult;

/// An event emitted by the pipeline.
#[derive(Clone, Debug)]
pub enum SecurityEvent {
    /// A submission attempt is starting.
    Progress {
        /// Score being submitted.
        score: i64,
        /// 1-based attempt number.
        attempt: u32,
        /// Maximum number of attempts for this submission.
        max_attempts: u32,
    },
    /// A submission reached a terminal state. Emitted at most once per submission.
    Completed {
        /// Final result.
        result: SubmissionResult,
        /// Score the caller asked to submit.
        original_score: i64,
    },
    /// The anti-cheat monitor recorded a violation.
    Violation(Violation),
}

/// Sending half, cloned into every component that emits events.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: Sender<SecurityEvent>,
}

impl EventSink {
    /// Creates a sink with no listener. Events are dropped.
    #[must_use]
    pub fn detached() -> Self {
        channel().0
    }

    /// Emits an event. A missing listener is not an error.
    pub fn emit(&self, event: SecurityEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("security event dropped: no listener");
        }
    }
}

/// Receiving half, owned by the host.
#[derive(Clone, Debug)]
pub struct EventStream {
    rx: Receiver<SecurityEvent>,
}

impl EventStream {
    /// Returns the next pending event, if any.
    #[must_use]
    pub fn poll(&self) -> Option<SecurityEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Takes every pending event.
    #[must_use]
    pub fn drain(&self) -> Vec<SecurityEvent> {
        self.rx.try_iter().collect()
    }

    /// Number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true if no event is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Creates a connected sink/stream pair.
#[must_use]
pub fn channel() -> (EventSink, EventStream) {
    let (tx, rx) = unbounded();
    (EventSink { tx }, EventStream { rx })
}
