//! # Violations
//!
//! Immutable records of suspicious conditions. They accumulate for the
//! whole match and are only cleared by a reset.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Category of a violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Protected memory no longer matches its checksum.
    MemoryTamper,
    /// Game time runs faster than real time.
    SpeedHack,
    /// Wall clock moved relative to the monotonic clock.
    TimeTamper,
    /// Foreign code loaded into the process.
    CodeInjection,
    /// A debugger is attached.
    DebuggerPresent,
    /// Running inside an emulator or virtual machine.
    Emulator,
    /// Device is rooted / jailbroken / running privileged.
    RootedDevice,
    /// Implausible score change.
    ScoreAnomaly,
    /// A payload or nonce was reused.
    ReplayAttempt,
    /// Unexpected device characteristics.
    DeviceAnomaly,
    /// Traffic was altered in transit.
    NetworkTamper,
    /// Input looks scripted.
    Automation,
}

/// How bad a violation is. Ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Noise-level signal.
    Low,
    /// Suspicious.
    Medium,
    /// Very likely cheating.
    High,
    /// Blocks gameplay on its own.
    Critical,
}

impl Severity {
    /// Trust points removed from the device trust level per violation.
    #[must_use]
    pub const fn trust_penalty(self) -> u32 {
        match self {
            Self::Low => 2,
            Self::Medium => 5,
            Self::High => 15,
            Self::Critical => 30,
        }
    }

    /// Severity for a value that exceeded its limit by `ratio` (value / limit).
    #[must_use]
    pub fn from_excess_ratio(ratio: f64) -> Self {
        if ratio >= 10.0 {
            Self::Critical
        } else if ratio >= 5.0 {
            Self::High
        } else if ratio >= 2.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// A single recorded violation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Category.
    pub kind: ViolationKind,
    /// Severity.
    pub severity: Severity,
    /// Human readable description.
    pub description: String,
    /// Wall-clock time of detection.
    pub timestamp_ms: i64,
    /// Optional extra data (check parameters, stack info).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Violation {
    /// Creates a violation without metadata.
    #[must_use]
    pub fn new(kind: ViolationKind, severity: Severity, description: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            timestamp_ms,
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}
