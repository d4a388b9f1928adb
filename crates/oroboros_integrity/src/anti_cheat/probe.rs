//! # Platform Integrity Probes
//!
//! Everything platform specific the monitor needs, behind one trait.
//! The monitor never looks at `/proc`, the registry, or a jailbreak path
//! directly.

use sha2::{Digest, Sha256};

use super::violation::{Severity, ViolationKind};

/// A device-level finding reported by a probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceFinding {
    /// Violation category.
    pub kind: ViolationKind,
    /// Severity.
    pub severity: Severity,
    /// What was found.
    pub description: String,
}

/// Platform capability interface. One implementation per target.
pub trait PlatformIntegrityProbe: Send {
    /// Returns true if a debugger or tracer is attached.
    fn debugger_attached(&self) -> bool;

    /// Emulator / root / injection findings. Empty on a clean device.
    fn device_findings(&self) -> Vec<DeviceFinding>;

    /// Stable, non-reversible identifier of this device.
    fn device_fingerprint(&self) -> String;
}

/// Probe that finds nothing. For platforms without checks, and for tests.
#[derive(Clone, Debug, Default)]
pub struct NullProbe;

impl PlatformIntegrityProbe for NullProbe {
    fn debugger_attached(&self) -> bool {
        false
    }

    fn device_findings(&self) -> Vec<DeviceFinding> {
        Vec::new()
    }

    fn device_fingerprint(&self) -> String {
        "unknown-device".to_owned()
    }
}

/// Probe for the host the game runs on.
///
/// On Linux: `TracerPid` from `/proc/self/status`, `LD_PRELOAD`,
/// effective root, and the CPU `hypervisor` flag. Elsewhere it reports
/// a clean device.
#[derive(Clone, Debug, Default)]
pub struct HostProbe;

impl PlatformIntegrityProbe for HostProbe {
    fn debugger_attached(&self) -> bool {
        proc_status_field("TracerPid:")
            .and_then(|v| v.parse::<u32>().ok())
            .is_some_and(|pid| pid != 0)
    }

    fn device_findings(&self) -> Vec<DeviceFinding> {
        let mut findings = Vec::new();

        if std::env::var_os("LD_PRELOAD").is_some_and(|v| !v.is_empty()) {
            findings.push(DeviceFinding {
                kind: ViolationKind::CodeInjection,
                severity: Severity::High,
                description: "LD_PRELOAD is set".to_owned(),
            });
        }

        let root = proc_status_field("Uid:")
            .and_then(|uids| uids.split_whitespace().nth(1).map(str::to_owned))
            .is_some_and(|euid| euid == "0");
        if root {
            findings.push(DeviceFinding {
                kind: ViolationKind::RootedDevice,
                severity: Severity::Medium,
                description: "running with effective uid 0".to_owned(),
            });
        }

        let hypervisor = std::fs::read_to_string("/proc/cpuinfo")
            .map(|info| info.lines().any(|l| l.starts_with("flags") && l.contains(" hypervisor")))
            .unwrap_or(false);
        if hypervisor {
            findings.push(DeviceFinding {
                kind: ViolationKind::Emulator,
                severity: Severity::Low,
                description: "hypervisor CPU flag present".to_owned(),
            });
        }

        findings
    }

    fn device_fingerprint(&self) -> String {
        let source = ["/etc/machine-id", "/var/lib/dbus/machine-id", "/etc/hostname"]
            .iter()
            .find_map(|path| std::fs::read_to_string(path).ok())
            .unwrap_or_else(|| "unknown-device".to_owned());
        let digest = Sha256::digest(source.trim().as_bytes());
        hex::encode(&digest[..16])
    }
}

fn proc_status_field(field: &str) -> Option<String> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix(field))
        .map(|rest| rest.trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_probe_is_clean() {
        let probe = NullProbe;
        assert!(!probe.debugger_attached());
        assert!(probe.device_findings().is_empty());
    }

    #[test]
    fn test_host_fingerprint_is_stable_hex() {
        let probe = HostProbe;
        let a = probe.device_fingerprint();
        assert_eq!(a, probe.device_fingerprint());
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
