//! # Integrity Error Types
//!
//! All errors that can occur between a score being produced and a score
//! being accepted.
//!
//! Integrity violations are NOT errors. They are data
//! ([`crate::anti_cheat::Violation`]) because gameplay keeps collecting
//! evidence instead of crashing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the score integrity codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// An encryption method was called before `initialize`.
    #[error("codec used before initialization")]
    UninitializedCodec,

    /// A key could not be decoded or has the wrong length.
    #[error("invalid {which} key: {reason}")]
    InvalidKey {
        /// Which key was rejected ("encryption" or "signing").
        which: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// RNG, serialization or AEAD failure while sealing a score.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Ciphertext did not authenticate under the match keys.
    #[error("decryption failed: payload does not authenticate")]
    DecryptionFailed,

    /// The nonce was already used in this session.
    #[error("replay detected: nonce {0} already used")]
    ReplayDetected(String),

    /// The payload is structurally invalid.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Plaintext could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors produced while loading or validating configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The TOML document did not parse.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(String),

    /// A field holds a value that makes no sense.
    #[error("invalid config field `{field}`: {reason}")]
    Invalid {
        /// Dotted field path.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Top-level error taxonomy of the pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// A component was used before it was initialized, or is misconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Score out of range, negative, or with an impossible progression.
    #[error("validation error: {0}")]
    Validation(String),

    /// Sealing the score failed. No partial payload exists.
    #[error("encryption error: {0}")]
    Encryption(#[from] CodecError),

    /// Transport-level failure (retryable).
    #[error("network error: {0}")]
    Network(String),

    /// The server explicitly refused the submission (terminal).
    #[error("server rejected submission ({status}): {message}")]
    ServerRejection {
        /// HTTP-like status code.
        status: u16,
        /// Server supplied reason.
        message: String,
    },

    /// No response within the submission timeout (retryable).
    #[error("submission timed out")]
    Timeout,
}

impl From<ConfigError> for IntegrityError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl IntegrityError {
    /// Returns the wire-friendly code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration(_) => ErrorCode::Configuration,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Encryption(_) => ErrorCode::Encryption,
            Self::Network(_) => ErrorCode::Network,
            Self::ServerRejection { .. } => ErrorCode::ServerRejection,
            Self::Timeout => ErrorCode::Timeout,
        }
    }

    /// Returns true if the retry state machine should try again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

/// Copyable error code carried by submission results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// See [`IntegrityError::Configuration`].
    Configuration,
    /// See [`IntegrityError::Validation`].
    Validation,
    /// See [`IntegrityError::Encryption`].
    Encryption,
    /// See [`IntegrityError::Network`].
    Network,
    /// See [`IntegrityError::ServerRejection`].
    ServerRejection,
    /// See [`IntegrityError::Timeout`].
    Timeout,
    /// Gameplay was blocked by accumulated violations.
    IntegrityViolation,
    /// The offline queue was full and this entry was evicted.
    QueueOverflow,
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for pipeline operations.
pub type IntegrityResult<T> = Result<T, IntegrityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(IntegrityError::Network("reset".into()).is_retryable());
        assert!(IntegrityError::Timeout.is_retryable());
        assert!(!IntegrityError::ServerRejection { status: 403, message: "no".into() }.is_retryable());
        assert!(!IntegrityError::Validation("negative".into()).is_retryable());
    }

    #[test]
    fn test_codec_error_converts() {
        let err: IntegrityError = CodecError::UninitializedCodec.into();
        assert_eq!(err.code(), ErrorCode::Encryption);
    }
}
