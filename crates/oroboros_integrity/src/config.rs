//! # Security Configuration
//!
//! One TOML document per game, loaded once at match start.
//!
//! ```toml
//! [anti_cheat]
//! max_score_per_second = 250.0
//! enable_debugger_check = false
//!
//! [submission]
//! endpoint = "/api/v1/matches/score"
//! max_retry_attempts = 5
//! queue_overflow = "reject_newest"
//! ```
//!
//! Every section and field has a default, so a partial file is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::anti_cheat::AntiCheatConfig;
use crate::error::ConfigError;
use crate::submission::SubmissionConfig;

/// Complete pipeline configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Anti-cheat monitor thresholds and check toggles.
    pub anti_cheat: AntiCheatConfig,
    /// Submission retry, timeout and queue policy.
    pub submission: SubmissionConfig,
}

impl SecurityConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`Self::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Serializes the configuration back to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.anti_cheat.validate()?;
        self.submission.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::QueueOverflowPolicy;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = SecurityConfig::from_toml_str(
            r#"
            [anti_cheat]
            max_score_per_second = 250.0

            [submission]
            max_retry_attempts = 5
            queue_overflow = "reject_newest"
            "#,
        )
        .unwrap();

        assert!((config.anti_cheat.max_score_per_second - 250.0).abs() < f64::EPSILON);
        assert_eq!(config.submission.max_retry_attempts, 5);
        assert_eq!(config.submission.queue_overflow, QueueOverflowPolicy::RejectNewest);
        assert_eq!(config.submission.max_queued_submissions, SubmissionConfig::default().max_queued_submissions);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = SecurityConfig::from_toml_str("").unwrap();
        assert_eq!(config, SecurityConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = SecurityConfig::from_toml_str(
            r"
            [submission]
            retry_base_delay_secs = 60.0
            retry_max_delay_secs = 30.0
            ",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "submission.retry_base_delay_secs", .. }));

        let err = SecurityConfig::from_toml_str("[submission]\nmin_score = 10\nmax_score = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_malformed_toml() {
        let err = SecurityConfig::from_toml_str("[submission\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = SecurityConfig::default();
        config.anti_cheat.enable_device_integrity_check = true;
        let text = config.to_toml_string().unwrap();
        assert_eq!(SecurityConfig::from_toml_str(&text).unwrap(), config);
    }
}
