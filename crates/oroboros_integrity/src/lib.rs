//! # OROBOROS Score Integrity
//!
//! Client-side pipeline that gets a match score to the server signed,
//! encrypted, plausible and exactly once.
//!
//! ## Components
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                    SecurityOrchestrator                       │
//! │  ┌────────────────┐ ┌────────────────┐ ┌──────────────────┐  │
//! │  │ ScoreIntegrity │ │ AntiCheat      │ │ SecureSubmission │  │
//! │  │ Codec          │ │ Monitor        │ │ Controller       │  │
//! │  │ AES-GCM + HMAC │ │ protected score│ │ retry / backoff  │  │
//! │  │ score trail    │ │ violations     │ │ offline queue    │  │
//! │  └────────────────┘ └────────────────┘ └──────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//!          │ events (Progress / Completed / Violation)
//!          ▼
//!     EventStream ──► game UI
//! ```
//!
//! ## Design Principles
//!
//! 1. **Sans-IO** - transport, clock, scheduler and platform probes are injected
//! 2. **No callbacks into host code** - the host polls events once per frame
//! 3. **Violations are data** - they accumulate, only the orchestrator acts on them
//! 4. **Keys never leave the codec** - zeroized on reset, never logged
//!
//! ## Example
//!
//! ```rust,ignore
//! use oroboros_integrity::{SecurityConfig, SecurityOrchestrator, SystemClock, HostProbe};
//!
//! let mut security = SecurityOrchestrator::new(
//!     SecurityConfig::from_toml_file("config/security.toml")?,
//!     SystemClock::shared(),
//!     Box::new(HostProbe),
//!     Box::new(my_http_transport),
//! )?;
//!
//! security.initialize_for_match(&match_id, &enc_key, &sign_key)?;
//! // every frame
//! security.update_score(score);
//! security.update();
//! while let Some(event) = security.events().poll() { /* ... */ }
//! // at the end
//! security.submit_final_score(score);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod anti_cheat;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod submission;

pub use anti_cheat::{
    AntiCheatConfig, AntiCheatMonitor, AntiCheatReport, HostProbe, NullProbe,
    PlatformIntegrityProbe, ProtectedValue, Severity, Violation, ViolationKind,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use codec::{EncryptedScorePayload, InputKind, ScoreIntegrity, ScoreIntegrityCodec, WirePayload};
pub use config::SecurityConfig;
pub use error::{CodecError, ConfigError, ErrorCode, IntegrityError, IntegrityResult};
pub use events::{EventSink, EventStream, SecurityEvent};
pub use orchestrator::{SecurityOrchestrator, SecurityStatus, SharedOrchestrator};
pub use submission::{
    ClockScheduler, QueueOverflowPolicy, ResponseSink, Scheduler, ScoreTransport,
    SecureSubmissionController, SubmissionConfig, SubmissionRequest, SubmissionResult,
    SubmissionStatus, TransportFailure, TransportResponse,
};
