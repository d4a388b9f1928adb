//! # Anti-Cheat Monitor
//!
//! Client-side guard for the one score the rest of the pipeline trusts.
//!
//! ## Detection Methods
//!
//! - **Memory tamper**: the protected score fails its checksum
//! - **Speedhack**: reported frame time drifts from the monotonic clock
//! - **Time tamper**: wall clock moves relative to the monotonic clock
//! - **Debugger / device**: delegated to a [`PlatformIntegrityProbe`]
//! - **Score anomaly**: impossible gain rate or unexplained drops
//! - **Automation**: input timing/positions too regular for a human
//!
//! ## Policy
//!
//! The monitor only records. It never blocks play and never panics on a
//! failed check. Deciding what a pile of violations means is the
//! orchestrator's job.

mod probe;
mod protected;
mod violation;

pub use probe::{DeviceFinding, HostProbe, NullProbe, PlatformIntegrityProbe};
pub use protected::{Checksum, MixChecksum, Obfuscate, ProtectedValue};
pub use violation::{Severity, Violation, ViolationKind};

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::codec::{FrameStats, InputKind};
use crate::error::{ConfigError, IntegrityError, IntegrityResult};
use crate::events::{EventSink, SecurityEvent};

/// Smallest delta time used for rate checks (seconds).
const MIN_DELTA_SECS: f64 = 0.001;

/// Trust level with no violations.
pub const MAX_TRUST_LEVEL: u8 = 100;

/// Configuration for the anti-cheat monitor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiCheatConfig {
    /// Maximum legitimate score gain per second.
    pub max_score_per_second: f64,
    /// Score decrease tolerated without a violation (penalties).
    pub negative_score_tolerance: i64,
    /// Allowed relative deviation between reported and measured frame time.
    pub speed_hack_tolerance: f64,
    /// Frames needed before the speedhack check judges anything.
    pub min_frame_samples: usize,
    /// Frames kept in the speedhack window.
    pub max_frame_samples: usize,
    /// Allowed wall vs monotonic drift (ms).
    pub time_drift_tolerance_ms: i64,
    /// Inputs kept for pattern analysis.
    pub max_input_history: usize,
    /// Inputs needed before pattern analysis judges anything.
    pub min_input_samples_for_pattern: usize,
    /// Coefficient of variation of input intervals below which timing is scripted.
    pub automation_timing_cv_threshold: f64,
    /// Verify the protected score checksum.
    pub enable_memory_check: bool,
    /// Compare reported frame time with the monotonic clock.
    pub enable_speed_hack_check: bool,
    /// Compare the wall clock with the monotonic clock.
    pub enable_time_check: bool,
    /// Ask the probe for an attached debugger.
    pub enable_debugger_check: bool,
    /// Ask the probe for emulator / root / injection findings.
    pub enable_device_integrity_check: bool,
    /// Analyze input history for automation.
    pub enable_input_pattern_check: bool,
}

impl Default for AntiCheatConfig {
    fn default() -> Self {
        Self {
            max_score_per_second: 1000.0,
            negative_score_tolerance: 0,
            speed_hack_tolerance: 0.25,
            min_frame_samples: 30,
            max_frame_samples: 600,
            time_drift_tolerance_ms: 5_000,
            max_input_history: 256,
            min_input_samples_for_pattern: 12,
            automation_timing_cv_threshold: 0.02,
            enable_memory_check: true,
            enable_speed_hack_check: true,
            enable_time_check: true,
            enable_debugger_check: true,
            enable_device_integrity_check: false, // noisy on desktop VMs
            enable_input_pattern_check: true,
        }
    }
}

impl AntiCheatConfig {
    /// Validates thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first nonsensical value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_score_per_second.is_finite() && self.max_score_per_second > 0.0) {
            return Err(invalid("anti_cheat.max_score_per_second", "must be a positive number"));
        }
        if self.negative_score_tolerance < 0 {
            return Err(invalid("anti_cheat.negative_score_tolerance", "must not be negative"));
        }
        if !(self.speed_hack_tolerance.is_finite() && self.speed_hack_tolerance > 0.0) {
            return Err(invalid("anti_cheat.speed_hack_tolerance", "must be a positive number"));
        }
        if self.min_frame_samples < 2 || self.max_frame_samples < self.min_frame_samples {
            return Err(invalid(
                "anti_cheat.min_frame_samples",
                "need 2 <= min_frame_samples <= max_frame_samples",
            ));
        }
        if self.time_drift_tolerance_ms <= 0 {
            return Err(invalid("anti_cheat.time_drift_tolerance_ms", "must be positive"));
        }
        if self.min_input_samples_for_pattern < 3
            || self.max_input_history < self.min_input_samples_for_pattern
        {
            return Err(invalid(
                "anti_cheat.min_input_samples_for_pattern",
                "need 3 <= min_input_samples_for_pattern <= max_input_history",
            ));
        }
        if self.automation_timing_cv_threshold.is_nan() || self.automation_timing_cv_threshold < 0.0 {
            return Err(invalid("anti_cheat.automation_timing_cv_threshold", "must not be negative"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.to_owned() }
}

/// Serializable summary sent alongside a submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AntiCheatReport {
    /// Match the report belongs to.
    pub match_id: String,
    /// Device trust level (0-100).
    pub trust_level: u8,
    /// Number of violations.
    pub violation_count: usize,
    /// True if any violation is critical.
    pub has_critical_violations: bool,
    /// All violations, oldest first.
    pub violations: Vec<Violation>,
    /// Integrity check passes run.
    pub checks_run: u64,
    /// Frames recorded.
    pub frame_count: u64,
    /// Average frames per second.
    pub average_fps: f64,
    /// Wall-clock time of the report.
    pub generated_at_ms: i64,
}

#[derive(Clone, Copy, Debug)]
struct FrameSample {
    at_ms: u64,
    delta_secs: f64,
}

#[derive(Clone, Copy, Debug)]
struct InputSample {
    at_ms: u64,
    kind: InputKind,
    position: (f32, f32),
}

#[derive(Clone, Copy, Debug, Default)]
struct TimeBaseline {
    wall_ms: i64,
    monotonic_ms: u64,
}

/// Anti-cheat monitor for one match at a time.
pub struct AntiCheatMonitor {
    /// Configuration.
    config: AntiCheatConfig,
    /// Time source.
    clock: SharedClock,
    /// Platform checks.
    probe: Box<dyn PlatformIntegrityProbe>,
    /// Violation events go here.
    events: EventSink,
    /// Active match, `None` when uninitialized.
    match_id: Option<String>,
    /// The trusted score.
    score: ProtectedValue<i64>,
    /// Append-only violation list.
    violations: Vec<Violation>,
    /// Speedhack window.
    frames: VecDeque<FrameSample>,
    /// Frames recorded this match.
    frame_count: u64,
    /// Sum of reported frame deltas this match.
    game_time_secs: f64,
    /// Input history for pattern analysis.
    inputs: VecDeque<InputSample>,
    /// Time validation baseline.
    baseline: TimeBaseline,
    /// Integrity check passes run.
    checks_run: u64,
}

impl AntiCheatMonitor {
    /// Creates an uninitialized monitor.
    #[must_use]
    pub fn new(
        config: AntiCheatConfig,
        clock: SharedClock,
        probe: Box<dyn PlatformIntegrityProbe>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            clock,
            probe,
            events,
            match_id: None,
            score: ProtectedValue::new(0),
            violations: Vec::new(),
            frames: VecDeque::new(),
            frame_count: 0,
            game_time_secs: 0.0,
            inputs: VecDeque::new(),
            baseline: TimeBaseline::default(),
            checks_run: 0,
        }
    }

    /// Starts monitoring a match and runs one integrity pass.
    pub fn initialize(&mut self, match_id: &str) {
        self.clear_match_state();
        self.match_id = Some(match_id.to_owned());
        self.baseline = TimeBaseline {
            wall_ms: self.clock.wall_millis(),
            monotonic_ms: self.clock.monotonic_millis(),
        };
        tracing::info!("Anti-cheat monitor initialized for match {}", match_id);

        let clean = self.run_integrity_check();
        tracing::info!("Initial integrity check: {}", if clean { "clean" } else { "violations" });
    }

    /// Stops monitoring and drops all match state.
    pub fn reset(&mut self) {
        if let Some(match_id) = self.match_id.take() {
            tracing::info!("Anti-cheat monitor reset for match {}", match_id);
        }
        self.clear_match_state();
    }

    /// Returns true while a match is being monitored.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.match_id.is_some()
    }

    /// Active match id.
    #[must_use]
    pub fn match_id(&self) -> Option<&str> {
        self.match_id.as_deref()
    }

    /// Configuration in use.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &AntiCheatConfig {
        &self.config
    }

    /// Overwrites the trusted score.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::Configuration`] before `initialize`.
    pub fn set_protected_score(&mut self, score: i64) -> IntegrityResult<()> {
        if !self.is_active() {
            return Err(IntegrityError::Configuration("anti-cheat monitor not initialized".into()));
        }
        self.score.set(score);
        Ok(())
    }

    /// Reads the trusted score (0 when uninitialized).
    #[must_use]
    pub fn protected_score(&self) -> i64 {
        self.score.get()
    }

    /// Checks a score change against the trusted score.
    ///
    /// Valid updates become the new trusted score. Invalid ones record a
    /// [`ViolationKind::ScoreAnomaly`] and leave the trusted score alone.
    pub fn validate_score_update(&mut self, new_score: i64, delta_time_secs: f64) -> bool {
        if !self.is_active() {
            tracing::warn!("Score update {} ignored: monitor not initialized", new_score);
            return false;
        }

        let previous = self.score.get();
        let change = i128::from(new_score) - i128::from(previous);
        let tolerance = i128::from(self.config.negative_score_tolerance);

        if change < -tolerance {
            let drop = -change;
            #[allow(clippy::cast_precision_loss)]
            let ratio = drop as f64 / tolerance.max(1) as f64;
            let severity = Severity::from_excess_ratio(ratio).min(Severity::High);
            let violation = self
                .violation(
                    ViolationKind::ScoreAnomaly,
                    severity,
                    format!("score dropped by {drop} ({previous} -> {new_score})"),
                )
                .with_metadata("tolerance", tolerance);
            self.report(violation);
            return false;
        }

        if change > 0 {
            let dt = if delta_time_secs.is_finite() && delta_time_secs > MIN_DELTA_SECS {
                delta_time_secs
            } else {
                MIN_DELTA_SECS
            };
            #[allow(clippy::cast_precision_loss)]
            let rate = change as f64 / dt;
            if rate > self.config.max_score_per_second {
                let ratio = rate / self.config.max_score_per_second;
                let violation = self
                    .violation(
                        ViolationKind::ScoreAnomaly,
                        Severity::from_excess_ratio(ratio),
                        format!(
                            "score rate {rate:.1}/s exceeds maximum {:.1}/s ({ratio:.1}x)",
                            self.config.max_score_per_second
                        ),
                    )
                    .with_metadata("previous", previous)
                    .with_metadata("new", new_score)
                    .with_metadata("delta_time", dt);
                self.report(violation);
                return false;
            }
        }

        self.score.set(new_score);
        true
    }

    /// Runs every enabled check. Each failing check records one violation.
    ///
    /// Returns true only if all enabled checks pass.
    pub fn run_integrity_check(&mut self) -> bool {
        if !self.is_active() {
            tracing::warn!("Integrity check skipped: monitor not initialized");
            return false;
        }
        self.checks_run += 1;

        let mut clean = true;
        if self.config.enable_memory_check {
            clean &= self.check_memory_integrity();
        }
        if self.config.enable_speed_hack_check {
            clean &= self.check_speed_hack();
        }
        if self.config.enable_time_check {
            clean &= self.check_time_tamper();
        }
        if self.config.enable_debugger_check {
            clean &= self.check_debugger();
        }
        if self.config.enable_device_integrity_check {
            clean &= self.check_device_integrity();
        }
        clean
    }

    /// Records one rendered frame with the game's own delta time.
    pub fn record_frame(&mut self, delta_secs: f64) {
        if !self.is_active() || !delta_secs.is_finite() || delta_secs < 0.0 {
            return;
        }
        self.frame_count += 1;
        self.game_time_secs += delta_secs;
        self.frames.push_back(FrameSample { at_ms: self.clock.monotonic_millis(), delta_secs });
        while self.frames.len() > self.config.max_frame_samples {
            self.frames.pop_front();
        }
    }

    /// Frame statistics for the integrity evidence.
    #[must_use]
    pub fn frame_stats(&self) -> FrameStats {
        #[allow(clippy::cast_precision_loss)]
        let average_fps = if self.game_time_secs > 0.0 {
            self.frame_count as f64 / self.game_time_secs
        } else {
            0.0
        };
        FrameStats { frame_count: self.frame_count, average_fps }
    }

    /// Re-anchors time validation to a server supplied timestamp.
    pub fn sync_server_time(&mut self, server_time_ms: i64) {
        self.baseline = TimeBaseline {
            wall_ms: server_time_ms,
            monotonic_ms: self.clock.monotonic_millis(),
        };
        tracing::debug!("Time baseline synced to server time {}", server_time_ms);
    }

    /// Appends an input to the bounded history.
    pub fn record_input(&mut self, kind: InputKind, position: (f32, f32)) {
        if !self.is_active() {
            return;
        }
        self.inputs.push_back(InputSample { at_ms: self.clock.monotonic_millis(), kind, position });
        while self.inputs.len() > self.config.max_input_history {
            self.inputs.pop_front();
        }
    }

    /// Looks for scripted input. Records at most one violation per call.
    ///
    /// Returns false if automation was detected.
    pub fn validate_input_patterns(&mut self) -> bool {
        if !self.is_active() || !self.config.enable_input_pattern_check {
            return true;
        }
        if self.inputs.len() < self.config.min_input_samples_for_pattern {
            return true;
        }

        let intervals: Vec<f64> = self
            .inputs
            .iter()
            .zip(self.inputs.iter().skip(1))
            .map(|(a, b)| {
                #[allow(clippy::cast_precision_loss)]
                let gap = b.at_ms.saturating_sub(a.at_ms) as f64;
                gap
            })
            .collect();
        let (mean, cv) = mean_and_cv(&intervals);
        let timing_scripted = mean <= 0.0 || cv < self.config.automation_timing_cv_threshold;

        let positional: Vec<(f32, f32)> = self
            .inputs
            .iter()
            .filter(|s| matches!(s.kind, InputKind::Tap | InputKind::Swipe | InputKind::Drag))
            .map(|s| s.position)
            .collect();
        let position_scripted = positional.len() >= self.config.min_input_samples_for_pattern
            && identical_steps(&positional);

        if !timing_scripted && !position_scripted {
            return true;
        }

        let samples = self.inputs.len();
        let violation = if timing_scripted {
            self.violation(
                ViolationKind::Automation,
                Severity::High,
                format!("input timing too uniform: mean {mean:.1}ms, cv {cv:.4} over {samples} inputs"),
            )
            .with_metadata("cv", format!("{cv:.4}"))
        } else {
            self.violation(
                ViolationKind::Automation,
                Severity::Medium,
                format!("identical input position steps over {} inputs", positional.len()),
            )
        };
        self.report(violation);
        self.inputs.clear();
        false
    }

    /// Records a violation and emits it as an event.
    pub fn report_violation(&mut self, kind: ViolationKind, severity: Severity, description: impl Into<String>) {
        let violation = self.violation(kind, severity, description);
        self.report(violation);
    }

    /// Device trust level in `[0, 100]`. Never increases while violations accumulate.
    #[must_use]
    pub fn device_trust_level(&self) -> u8 {
        let penalty: u32 = self
            .violations
            .iter()
            .map(|v| v.severity.trust_penalty())
            .fold(0u32, u32::saturating_add);
        u8::try_from(u32::from(MAX_TRUST_LEVEL).saturating_sub(penalty)).unwrap_or(0)
    }

    /// Returns true if any recorded violation is critical.
    #[must_use]
    pub fn has_critical_violations(&self) -> bool {
        self.violations.iter().any(|v| v.severity == Severity::Critical)
    }

    /// All violations, oldest first.
    #[inline]
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Forgets recorded violations.
    pub fn clear_violations(&mut self) {
        if !self.violations.is_empty() {
            tracing::info!("Clearing {} violations", self.violations.len());
        }
        self.violations.clear();
    }

    /// Builds the serializable report for the server.
    #[must_use]
    pub fn anti_cheat_report(&self) -> AntiCheatReport {
        let frames = self.frame_stats();
        AntiCheatReport {
            match_id: self.match_id.clone().unwrap_or_default(),
            trust_level: self.device_trust_level(),
            violation_count: self.violations.len(),
            has_critical_violations: self.has_critical_violations(),
            violations: self.violations.clone(),
            checks_run: self.checks_run,
            frame_count: frames.frame_count,
            average_fps: frames.average_fps,
            generated_at_ms: self.clock.wall_millis(),
        }
    }

    /// Device fingerprint from the platform probe.
    #[must_use]
    pub fn device_fingerprint(&self) -> String {
        self.probe.device_fingerprint()
    }

    /// Checks the protected score checksum.
    fn check_memory_integrity(&mut self) -> bool {
        if self.score.verify() {
            return true;
        }
        self.report_violation(
            ViolationKind::MemoryTamper,
            Severity::Critical,
            "protected score failed checksum verification",
        );
        false
    }

    /// Compares reported frame time against the monotonic clock.
    fn check_speed_hack(&mut self) -> bool {
        if self.frames.len() < self.config.min_frame_samples {
            return true;
        }
        let (Some(first), Some(last)) = (self.frames.front(), self.frames.back()) else {
            return true;
        };
        #[allow(clippy::cast_precision_loss)]
        let real_secs = last.at_ms.saturating_sub(first.at_ms) as f64 / 1000.0;
        if real_secs <= 0.0 {
            return true;
        }

        #[allow(clippy::cast_precision_loss)]
        let intervals = (self.frames.len() - 1) as f64;
        let expected = real_secs / intervals;
        let observed = self.frames.iter().skip(1).map(|f| f.delta_secs).sum::<f64>() / intervals;
        let deviation = (observed - expected).abs() / expected;
        if deviation <= self.config.speed_hack_tolerance {
            return true;
        }

        let severity = if observed > expected { Severity::High } else { Severity::Medium };
        let violation = self
            .violation(
                ViolationKind::SpeedHack,
                severity,
                format!(
                    "average frame interval {:.2}ms vs measured {:.2}ms ({:.0}% off)",
                    observed * 1000.0,
                    expected * 1000.0,
                    deviation * 100.0
                ),
            )
            .with_metadata("frames", self.frames.len());
        self.report(violation);
        self.frames.clear();
        false
    }

    /// Compares wall-clock progress with monotonic progress since the baseline.
    fn check_time_tamper(&mut self) -> bool {
        let wall_now = self.clock.wall_millis();
        let mono_now = self.clock.monotonic_millis();
        let wall_elapsed = wall_now.saturating_sub(self.baseline.wall_ms);
        let mono_elapsed =
            i64::try_from(mono_now.saturating_sub(self.baseline.monotonic_ms)).unwrap_or(i64::MAX);
        let drift = wall_elapsed.saturating_sub(mono_elapsed).saturating_abs();
        if drift <= self.config.time_drift_tolerance_ms {
            return true;
        }

        let severity = if drift > self.config.time_drift_tolerance_ms.saturating_mul(10) {
            Severity::High
        } else {
            Severity::Medium
        };
        let violation = self
            .violation(
                ViolationKind::TimeTamper,
                severity,
                format!("wall clock drifted {drift}ms from monotonic time"),
            )
            .with_metadata("drift_ms", drift);
        self.report(violation);
        // One report per jump.
        self.baseline = TimeBaseline { wall_ms: wall_now, monotonic_ms: mono_now };
        false
    }

    fn check_debugger(&mut self) -> bool {
        if !self.probe.debugger_attached() {
            return true;
        }
        self.report_violation(ViolationKind::DebuggerPresent, Severity::High, "debugger attached");
        false
    }

    fn check_device_integrity(&mut self) -> bool {
        let findings = self.probe.device_findings();
        let Some(worst) = findings.iter().max_by_key(|f| f.severity) else {
            return true;
        };
        let description = findings
            .iter()
            .map(|f| f.description.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let violation = self
            .violation(worst.kind, worst.severity, description)
            .with_metadata("findings", findings.len());
        self.report(violation);
        false
    }

    fn violation(&self, kind: ViolationKind, severity: Severity, description: impl Into<String>) -> Violation {
        Violation::new(kind, severity, description, self.clock.wall_millis())
    }

    fn report(&mut self, violation: Violation) {
        tracing::warn!(
            "Violation {:?} ({:?}): {}",
            violation.kind,
            violation.severity,
            violation.description
        );
        self.events.emit(SecurityEvent::Violation(violation.clone()));
        self.violations.push(violation);
    }

    fn clear_match_state(&mut self) {
        self.score.set(0);
        self.violations.clear();
        self.frames.clear();
        self.frame_count = 0;
        self.game_time_secs = 0.0;
        self.inputs.clear();
        self.checks_run = 0;
    }
}

/// Mean and coefficient of variation.
fn mean_and_cv(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.sqrt() / mean)
}

/// True if every consecutive position step is the same vector.
fn identical_steps(positions: &[(f32, f32)]) -> bool {
    const EPS: f32 = 1e-3;
    let mut steps = positions
        .iter()
        .zip(positions.iter().skip(1))
        .map(|(a, b)| (b.0 - a.0, b.1 - a.1));
    let Some(first) = steps.next() else {
        return false;
    };
    steps.all(|s| (s.0 - first.0).abs() < EPS && (s.1 - first.1).abs() < EPS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::events::{channel, EventStream};
    use std::time::Duration;

    struct DebuggedProbe;

    impl PlatformIntegrityProbe for DebuggedProbe {
        fn debugger_attached(&self) -> bool {
            true
        }
        fn device_findings(&self) -> Vec<DeviceFinding> {
            vec![
                DeviceFinding {
                    kind: ViolationKind::Emulator,
                    severity: Severity::Low,
                    description: "emulator build props".into(),
                },
                DeviceFinding {
                    kind: ViolationKind::RootedDevice,
                    severity: Severity::High,
                    description: "su binary present".into(),
                },
            ]
        }
        fn device_fingerprint(&self) -> String {
            "debugged".into()
        }
    }

    fn monitor_with(
        config: AntiCheatConfig,
        probe: Box<dyn PlatformIntegrityProbe>,
    ) -> (AntiCheatMonitor, ManualClock, EventStream) {
        let clock = ManualClock::new(1_700_000_000_000);
        let (sink, stream) = channel();
        let mut monitor = AntiCheatMonitor::new(config, clock.shared(), probe, sink);
        monitor.initialize("m1");
        (monitor, clock, stream)
    }

    fn monitor() -> (AntiCheatMonitor, ManualClock, EventStream) {
        monitor_with(AntiCheatConfig::default(), Box::new(NullProbe))
    }

    #[test]
    fn test_initialize_is_clean() {
        let (monitor, _, stream) = monitor();
        assert!(monitor.is_active());
        assert_eq!(monitor.protected_score(), 0);
        assert!(monitor.violations().is_empty());
        assert_eq!(monitor.device_trust_level(), MAX_TRUST_LEVEL);
        assert!(stream.is_empty());
    }

    #[test]
    fn test_rate_of_gain_rejected() {
        let (mut monitor, _, stream) = monitor();

        assert!(!monitor.validate_score_update(100_000, 0.01));

        assert_eq!(monitor.violations().len(), 1);
        let v = &monitor.violations()[0];
        assert_eq!(v.kind, ViolationKind::ScoreAnomaly);
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(monitor.protected_score(), 0);
        assert_eq!(stream.drain().len(), 1);
    }

    #[test]
    fn test_plausible_gain_accepted() {
        let (mut monitor, _, _) = monitor();
        assert!(monitor.validate_score_update(50, 1.0));
        assert!(monitor.validate_score_update(120, 1.0));
        assert_eq!(monitor.protected_score(), 120);
        assert!(monitor.violations().is_empty());
    }

    #[test]
    fn test_penalty_within_tolerance() {
        let config = AntiCheatConfig { negative_score_tolerance: 10, ..Default::default() };
        let (mut monitor, _, _) = monitor_with(config, Box::new(NullProbe));
        assert!(monitor.validate_score_update(100, 1.0));
        assert!(monitor.validate_score_update(95, 1.0));
        assert!(!monitor.validate_score_update(50, 1.0));

        assert_eq!(monitor.violations().len(), 1);
        assert_eq!(monitor.violations()[0].kind, ViolationKind::ScoreAnomaly);
        assert_eq!(monitor.protected_score(), 95);
    }

    #[test]
    fn test_memory_tamper_detected() {
        let (mut monitor, _, _) = monitor();
        monitor.set_protected_score(1_500).unwrap();
        assert!(monitor.run_integrity_check());

        *monitor.score.masked_word_mut() ^= 0xFF;
        assert!(!monitor.run_integrity_check());

        let v = monitor.violations().last().unwrap();
        assert_eq!(v.kind, ViolationKind::MemoryTamper);
        assert!(monitor.has_critical_violations());
    }

    #[test]
    fn test_speed_hack_detected() {
        let (mut monitor, clock, _) = monitor();
        for _ in 0..40 {
            clock.advance(Duration::from_millis(16));
            monitor.record_frame(0.016);
        }
        assert!(monitor.run_integrity_check());

        for _ in 0..40 {
            clock.advance(Duration::from_millis(16));
            monitor.record_frame(0.032);
        }
        assert!(!monitor.run_integrity_check());
        let v = monitor.violations().last().unwrap();
        assert_eq!(v.kind, ViolationKind::SpeedHack);
        assert_eq!(v.severity, Severity::High);
        assert_eq!(monitor.frame_stats().frame_count, 80);
    }

    #[test]
    fn test_time_tamper_reported_once_per_jump() {
        let (mut monitor, clock, _) = monitor();
        clock.advance(Duration::from_secs(2));
        assert!(monitor.run_integrity_check());

        clock.set_wall_millis(clock.wall_millis() + 3_600_000);
        assert!(!monitor.run_integrity_check());
        assert_eq!(monitor.violations()[0].kind, ViolationKind::TimeTamper);

        assert!(monitor.run_integrity_check());
        assert_eq!(monitor.violations().len(), 1);
    }

    #[test]
    fn test_server_sync_flags_skewed_device_clock() {
        let (mut monitor, clock, _) = monitor();
        monitor.sync_server_time(clock.wall_millis() - 60_000);
        assert!(!monitor.run_integrity_check());
        assert_eq!(monitor.violations()[0].kind, ViolationKind::TimeTamper);
    }

    #[test]
    fn test_debugger_and_device_checks() {
        let config = AntiCheatConfig { enable_device_integrity_check: true, ..Default::default() };
        let (monitor, _, stream) = monitor_with(config, Box::new(DebuggedProbe));

        // initialize already ran one pass
        let kinds: Vec<_> = monitor.violations().iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![ViolationKind::DebuggerPresent, ViolationKind::RootedDevice]);
        assert_eq!(monitor.violations()[1].severity, Severity::High);
        assert_eq!(stream.drain().len(), 2);
    }

    #[test]
    fn test_disabled_checks_do_not_run() {
        let config = AntiCheatConfig { enable_debugger_check: false, ..Default::default() };
        let (mut monitor, _, _) = monitor_with(config, Box::new(DebuggedProbe));
        assert!(monitor.run_integrity_check());
        assert!(monitor.violations().is_empty());
    }

    #[test]
    fn test_automation_detected_from_uniform_timing() {
        let (mut monitor, clock, _) = monitor();
        for i in 0..20 {
            clock.advance(Duration::from_millis(100));
            monitor.record_input(InputKind::Tap, (i as f32 * 3.7 % 50.0, 10.0 + (i % 3) as f32));
        }
        assert!(!monitor.validate_input_patterns());
        let v = monitor.violations().last().unwrap();
        assert_eq!(v.kind, ViolationKind::Automation);
        assert_eq!(v.severity, Severity::High);
        assert!(monitor.validate_input_patterns());
    }

    #[test]
    fn test_human_input_passes() {
        let (mut monitor, clock, _) = monitor();
        let gaps = [120, 95, 210, 160, 80, 300, 140, 175, 90, 260, 130, 110, 230, 150];
        for (i, gap) in gaps.iter().enumerate() {
            clock.advance(Duration::from_millis(*gap));
            monitor.record_input(InputKind::Tap, (i as f32 * 13.0 % 40.0, (i * i) as f32 % 17.0));
        }
        assert!(monitor.validate_input_patterns());
        assert!(monitor.violations().is_empty());
    }

    #[test]
    fn test_identical_position_steps_flagged() {
        let (mut monitor, clock, _) = monitor();
        let gaps = [120, 95, 210, 160, 80, 300, 140, 175, 90, 260, 130, 110, 230, 150];
        for (i, gap) in gaps.iter().enumerate() {
            clock.advance(Duration::from_millis(*gap));
            monitor.record_input(InputKind::Drag, (i as f32 * 5.0, 100.0));
        }
        assert!(!monitor.validate_input_patterns());
        assert_eq!(monitor.violations()[0].severity, Severity::Medium);
    }

    #[test]
    fn test_trust_level_monotonic() {
        let (mut monitor, _, _) = monitor();
        let mut last = monitor.device_trust_level();
        for severity in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical, Severity::Critical, Severity::Critical] {
            monitor.report_violation(ViolationKind::DeviceAnomaly, severity, "test");
            let now = monitor.device_trust_level();
            assert!(now <= last);
            last = now;
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn test_three_criticals_drop_trust_below_gate() {
        let (mut monitor, _, _) = monitor();
        for _ in 0..3 {
            monitor.report_violation(ViolationKind::CodeInjection, Severity::Critical, "hook");
        }
        assert_eq!(monitor.device_trust_level(), 10);
        assert!(monitor.has_critical_violations());
    }

    #[test]
    fn test_uninitialized_monitor() {
        let clock = ManualClock::new(1);
        let mut monitor = AntiCheatMonitor::new(
            AntiCheatConfig::default(),
            clock.shared(),
            Box::new(NullProbe),
            EventSink::detached(),
        );
        assert!(monitor.set_protected_score(5).is_err());
        assert!(!monitor.validate_score_update(5, 1.0));
        assert!(!monitor.run_integrity_check());
        monitor.reset();
        assert!(!monitor.is_active());
    }

    #[test]
    fn test_reset_and_report() {
        let (mut monitor, clock, _) = monitor();
        clock.advance(Duration::from_millis(16));
        monitor.record_frame(0.016);
        monitor.report_violation(ViolationKind::NetworkTamper, Severity::Medium, "proxy cert");

        let report = monitor.anti_cheat_report();
        assert_eq!(report.match_id, "m1");
        assert_eq!(report.violation_count, 1);
        assert_eq!(report.trust_level, 95);
        assert_eq!(report.frame_count, 1);
        assert!(serde_json::to_string(&report).unwrap().contains("trustLevel"));

        monitor.reset();
        assert!(monitor.violations().is_empty());
        assert_eq!(monitor.frame_stats().frame_count, 0);
    }

    #[test]
    fn test_config_validation() {
        assert!(AntiCheatConfig::default().validate().is_ok());
        let bad = AntiCheatConfig { max_score_per_second: 0.0, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = AntiCheatConfig { min_frame_samples: 10, max_frame_samples: 5, ..Default::default() };
        assert!(bad.validate().is_err());
    }
}
