//! `ScanConfig`: the validated input to one scan engine invocation, and
//! the option mapping from [`ScanType`] to probe behavior.

use scanorama_core::{Error, PortSpec, Result, ScanType};
use std::net::IpAddr;

/// Input to [`crate::ScanEngine::run`]. Built by the Worker Pool from a
/// `Job`'s target snapshot before every scan attempt.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub targets: Vec<IpAddr>,
    pub ports: PortSpec,
    pub scan_type: ScanType,
    pub timeout_sec: u64,
    pub concurrency: usize,
}

impl ScanConfig {
    /// Input constraints: non-empty targets, a non-empty port spec
    /// (already guaranteed well-formed by [`PortSpec`]'s own parser), a
    /// scan type within the enumerated set (guaranteed by the type
    /// system), and at least one unit of concurrency.
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::Validation("scan config has no targets".to_string()));
        }
        if self.ports.count() == 0 {
            return Err(Error::Validation("scan config has no ports".to_string()));
        }
        if self.concurrency == 0 {
            return Err(Error::Validation(
                "scan config concurrency must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The probe behavior this scan type/timeout combination maps to.
    pub fn probe_options(&self) -> ProbeOptions {
        let timing = TimingTemplate::from_timeout_secs(self.timeout_sec);
        let service_detection = matches!(
            self.scan_type,
            ScanType::Version | ScanType::Aggressive | ScanType::Comprehensive
        );
        let timing = match self.scan_type {
            ScanType::Aggressive => TimingTemplate::Aggressive,
            ScanType::Stealth => TimingTemplate::Polite,
            _ => timing,
        };
        ProbeOptions {
            method: ProbeMethod::TcpConnect,
            service_detection,
            timing,
        }
    }
}

/// Timing template derived from `timeout_sec`:
/// `<=5s` aggressive, `<=15s` normal, else polite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingTemplate {
    Aggressive,
    Normal,
    Polite,
}

impl TimingTemplate {
    pub fn from_timeout_secs(timeout_sec: u64) -> Self {
        if timeout_sec <= 5 {
            TimingTemplate::Aggressive
        } else if timeout_sec <= 15 {
            TimingTemplate::Normal
        } else {
            TimingTemplate::Polite
        }
    }

    /// Extra settle delay between probes a polite/normal timing template
    /// asks for, to avoid hammering a target. Aggressive timing applies
    /// none.
    pub fn inter_probe_delay(self) -> std::time::Duration {
        match self {
            TimingTemplate::Aggressive => std::time::Duration::ZERO,
            TimingTemplate::Normal => std::time::Duration::from_millis(5),
            TimingTemplate::Polite => std::time::Duration::from_millis(50),
        }
    }
}

/// The only probe method this adapter's default implementation knows
/// how to execute. SYN crafting and raw-socket capture are out of
/// scope; a `syn` scan type is still accepted and mapped here, but
/// executes as a TCP-connect probe like `stealth` does (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    TcpConnect,
}

/// The resolved behavior for one scan invocation: how to probe, whether
/// to attempt service detection, and what timing template to honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    pub method: ProbeMethod,
    pub service_detection: bool,
    pub timing: TimingTemplate,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(scan_type: ScanType, timeout_sec: u64) -> ScanConfig {
        ScanConfig {
            targets: vec!["127.0.0.1".parse().unwrap()],
            ports: PortSpec::parse("80").unwrap(),
            scan_type,
            timeout_sec,
            concurrency: 10,
        }
    }

    #[test]
    fn validate_rejects_empty_targets() {
        let mut c = config(ScanType::Connect, 5);
        c.targets.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut c = config(ScanType::Connect, 5);
        c.concurrency = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn timing_template_boundaries() {
        assert_eq!(TimingTemplate::from_timeout_secs(5), TimingTemplate::Aggressive);
        assert_eq!(TimingTemplate::from_timeout_secs(6), TimingTemplate::Normal);
        assert_eq!(TimingTemplate::from_timeout_secs(15), TimingTemplate::Normal);
        assert_eq!(TimingTemplate::from_timeout_secs(16), TimingTemplate::Polite);
    }

    #[test]
    fn version_scan_enables_service_detection() {
        let c = config(ScanType::Version, 5);
        assert!(c.probe_options().service_detection);
    }

    #[test]
    fn connect_scan_disables_service_detection() {
        let c = config(ScanType::Connect, 5);
        assert!(!c.probe_options().service_detection);
    }

    #[test]
    fn aggressive_scan_forces_aggressive_timing() {
        let c = config(ScanType::Aggressive, 20);
        assert_eq!(c.probe_options().timing, TimingTemplate::Aggressive);
    }

    #[test]
    fn stealth_scan_forces_polite_timing() {
        let c = config(ScanType::Stealth, 2);
        assert_eq!(c.probe_options().timing, TimingTemplate::Polite);
    }
}
