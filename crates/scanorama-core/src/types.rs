//! Core data model for the scan execution subsystem: targets, jobs,
//! hosts, and port-scan rows, plus the port-spec parser shared by every
//! layer that accepts a port list from an operator or the database.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use uuid::Uuid;

/// One of the six scan types the engine adapter understands. The
/// persistence layer may narrow this further when writing a row (see
/// [`ScanType::persisted_value`]); the scheduler and engine always see
/// the value the operator originally requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Connect,
    Syn,
    Version,
    Aggressive,
    Stealth,
    Comprehensive,
}

impl ScanType {
    /// All six wire values, in the order the glossary lists them.
    pub const ALL: [ScanType; 6] = [
        ScanType::Connect,
        ScanType::Syn,
        ScanType::Version,
        ScanType::Aggressive,
        ScanType::Stealth,
        ScanType::Comprehensive,
    ];

    /// The value the DB schema accepts for this type. `comprehensive` and
    /// `aggressive` narrow to `version`; `stealth` narrows to `connect`.
    /// Everything else (the scheduler, the engine, in-memory `Job`s)
    /// keeps the original value — only storage sees this mapping.
    pub fn persisted_value(self) -> ScanType {
        match self {
            ScanType::Comprehensive | ScanType::Aggressive => ScanType::Version,
            ScanType::Stealth => ScanType::Connect,
            other => other,
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanType::Connect => "connect",
            ScanType::Syn => "syn",
            ScanType::Version => "version",
            ScanType::Aggressive => "aggressive",
            ScanType::Stealth => "stealth",
            ScanType::Comprehensive => "comprehensive",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScanType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "connect" => Ok(ScanType::Connect),
            "syn" => Ok(ScanType::Syn),
            "version" => Ok(ScanType::Version),
            "aggressive" => Ok(ScanType::Aggressive),
            "stealth" => Ok(ScanType::Stealth),
            "comprehensive" => Ok(ScanType::Comprehensive),
            other => Err(Error::Validation(format!("unknown scan type: {other}"))),
        }
    }
}

/// Transport protocol for a probed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// State of a probed port. Exactly the three values the wire contract
/// and the `PortScan` row define — no "unknown" fourth state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Filtered => write!(f, "filtered"),
        }
    }
}

/// Liveness state of a scanned host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Up,
    Down,
    Filtered,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Up => write!(f, "up"),
            HostStatus::Down => write!(f, "down"),
            HostStatus::Filtered => write!(f, "filtered"),
        }
    }
}

/// A parsed, validated port specification: a comma-separated list of
/// single ports or `a-b` ranges, every value in `[0, 65535]`.
///
/// Port `0` is a valid port per this spec (unlike a conventional port
/// scanner), so this type cannot reuse a parser that treats `0` as an
/// error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortSpec {
    ranges: Vec<(u16, u16)>,
}

impl PortSpec {
    /// Parse `"80,443,8080-8090"`-style input. Rejects empty input,
    /// values outside `[0, 65535]`, and ranges where `end < start`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::Validation("empty port specification".to_string()));
        }

        let ranges = input
            .split(',')
            .map(Self::parse_token)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { ranges })
    }

    fn parse_token(token: &str) -> Result<(u16, u16)> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::Validation("empty port token".to_string()));
        }

        // Skip the first byte when looking for a range separator so a
        // leading '-' (a negative number, itself invalid) isn't mistaken
        // for a range dash.
        if let Some(rel) = token[1..].find('-') {
            let dash = rel + 1;
            let (start_s, rest) = token.split_at(dash);
            let end_s = &rest[1..];
            if start_s.is_empty() || end_s.is_empty() {
                return Err(Error::Validation(format!("invalid port range: {token}")));
            }
            let start = Self::parse_port_value(start_s)?;
            let end = Self::parse_port_value(end_s)?;
            if end < start {
                return Err(Error::Validation(format!(
                    "end port {end} < start port {start}"
                )));
            }
            Ok((start, end))
        } else {
            let p = Self::parse_port_value(token)?;
            Ok((p, p))
        }
    }

    fn parse_port_value(s: &str) -> Result<u16> {
        let n: i64 = s
            .trim()
            .parse()
            .map_err(|_| Error::Validation(format!("invalid port number: {s}")))?;
        if !(0..=65535).contains(&n) {
            return Err(Error::Validation(format!("port out of range: {s}")));
        }
        Ok(n as u16)
    }

    /// True if `port` falls within any range of this spec.
    pub fn contains(&self, port: u16) -> bool {
        self.ranges.iter().any(|(s, e)| port >= *s && port <= *e)
    }

    /// Total number of distinct ports named by this spec.
    pub fn count(&self) -> usize {
        self.ranges
            .iter()
            .map(|(s, e)| *e as usize - *s as usize + 1)
            .sum()
    }

    /// Iterate every port named by this spec, in the order given.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ranges.iter().flat_map(|(s, e)| *s..=*e)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|(s, e)| {
                if s == e {
                    s.to_string()
                } else {
                    format!("{s}-{e}")
                }
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

impl TryFrom<String> for PortSpec {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PortSpec> for String {
    fn from(value: PortSpec) -> Self {
        value.to_string()
    }
}

/// Persistent description of something to scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTarget {
    pub id: Uuid,
    pub name: String,
    /// Single address (implicit `/32` or `/128`) or explicit CIDR.
    pub network: IpNetwork,
    pub ports: PortSpec,
    pub scan_type: ScanType,
    /// Scan interval in seconds; `0` means ad-hoc (not scheduled).
    pub scan_interval_seconds: i64,
    pub enabled: bool,
}

impl ScanTarget {
    /// Parse a network specification: a bare IP (widened to `/32`/`/128`)
    /// or an explicit CIDR.
    pub fn parse_network(input: &str) -> Result<IpNetwork> {
        if let Ok(network) = input.parse::<IpNetwork>() {
            return Ok(network);
        }
        let ip: IpAddr = input.parse()?;
        Ok(match ip {
            IpAddr::V4(addr) => IpNetwork::V4(ipnetwork::Ipv4Network::new(addr, 32)?),
            IpAddr::V6(addr) => IpNetwork::V6(ipnetwork::Ipv6Network::new(addr, 128)?),
        })
    }

    /// Validate the invariants: non-negative interval, a
    /// well-formed non-empty port spec (already guaranteed by the
    /// `PortSpec` type itself, so this only re-checks the interval).
    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_seconds < 0 {
            return Err(Error::Validation(
                "scan_interval_seconds must be >= 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_ad_hoc(&self) -> bool {
        self.scan_interval_seconds == 0
    }
}

/// In-memory scheduling record owned exclusively by the Scheduler.
#[derive(Debug, Clone)]
pub struct ScheduledTarget {
    pub target: ScanTarget,
    pub next_scan: DateTime<Utc>,
    pub last_scan: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl ScheduledTarget {
    /// Deterministic jitter in `[0, 60s)` derived from the low 64 bits of
    /// the target id, used to avoid a thundering herd of newly-loaded
    /// targets all coming due at once.
    pub fn jitter_seconds(target_id: Uuid) -> i64 {
        (target_id.as_u128() as u64 % 60) as i64
    }

    /// `next_scan` for a target with no prior scan: `now + jitter`.
    pub fn initial_next_scan(target_id: Uuid, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::seconds(Self::jitter_seconds(target_id))
    }

    pub fn new(target: ScanTarget, now: DateTime<Utc>) -> Self {
        let next_scan = Self::initial_next_scan(target.id, now);
        let enabled = target.enabled;
        Self {
            target,
            next_scan,
            last_scan: None,
            enabled,
        }
    }

    /// Recompute `next_scan` after advancing `last_scan` by the target's
    /// current interval (called once a submitted job is accepted).
    pub fn advance(&mut self, completed_at: DateTime<Utc>) {
        self.last_scan = Some(completed_at);
        self.next_scan =
            completed_at + chrono::Duration::seconds(self.target.scan_interval_seconds.max(0));
    }

    /// An interval of 0 (or less) marks the target ad-hoc: it is never
    /// due on its own, regardless of `next_scan`. Scheduling it requires
    /// an explicit submission, not a tick.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.target.scan_interval_seconds > 0 && self.next_scan <= now
    }
}

/// Status of a `Job`/`ScanJob`, wire contract: `pending|running|completed|failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A single unit of work owned exclusively by the Worker Pool from
/// submission until the Result Sink removes it from the pending set.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub target_id: Uuid,
    pub target: ScanTarget,
    /// Reserved; all jobs currently carry equal priority.
    pub priority: u8,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(target: ScanTarget, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id: target.id,
            target,
            priority: 0,
            retries: 0,
            created_at,
        }
    }
}

/// Durable mirror of a `Job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub job_id: Uuid,
    pub target_id: Uuid,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: Option<ScanStats>,
    pub error_message: Option<String>,
}

impl ScanJob {
    pub fn new_pending(job_id: Uuid, target_id: Uuid) -> Self {
        Self {
            job_id,
            target_id,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            stats: None,
            error_message: None,
        }
    }

    /// Transition status, keeping `started_at`/`completed_at` monotonic:
    /// `started_at` is set on the first `Pending -> Running` move;
    /// `completed_at` is set iff the new status is terminal.
    pub fn transition(&mut self, status: JobStatus, now: DateTime<Utc>) {
        if status == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if matches!(status, JobStatus::Completed | JobStatus::Failed) {
            self.completed_at = Some(now);
        } else {
            self.completed_at = None;
        }
        self.status = status;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Stats blob stored on a completed `ScanJob`. Field names are a
/// stable wire contract consumed by the metrics endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub hosts_up: i64,
    pub hosts_down: i64,
    pub total_hosts: i64,
    pub duration_seconds: i64,
}

/// One probed port within a `ScanResult`'s host entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortResult {
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service_name: Option<String>,
    pub service_version: Option<String>,
    pub service_product: Option<String>,
}

impl PortResult {
    pub fn new(port: u16, protocol: Protocol, state: PortState) -> Self {
        Self {
            port,
            protocol,
            state,
            service_name: None,
            service_version: None,
            service_product: None,
        }
    }
}

/// One host entry within a `ScanResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostResult {
    pub address: IpAddr,
    pub status: HostStatus,
    pub ports: Vec<PortResult>,
}

/// In-memory output of one `Job` execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub hosts: Vec<HostResult>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration: Duration,
    pub error: Option<String>,
}

impl ScanResult {
    pub fn hosts_up(&self) -> i64 {
        self.hosts
            .iter()
            .filter(|h| h.status == HostStatus::Up)
            .count() as i64
    }

    pub fn hosts_down(&self) -> i64 {
        self.hosts
            .iter()
            .filter(|h| h.status != HostStatus::Up)
            .count() as i64
    }

    pub fn total_hosts(&self) -> i64 {
        self.hosts.len() as i64
    }

    /// Build the stats blob stored on a completed job for this result.
    pub fn to_stats(&self) -> ScanStats {
        ScanStats {
            hosts_up: self.hosts_up(),
            hosts_down: self.hosts_down(),
            total_hosts: self.total_hosts(),
            duration_seconds: self.duration.as_secs() as i64,
        }
    }
}

/// One row per distinct scanned IP.
///
/// Discovery-origin fields (`discovery_method`, `discovery_response_time_ms`,
/// `discovery_count`, `first_seen`) are owned by the out-of-scope discovery
/// subsystem; the scan path must only ever touch `status`/`last_seen`,
/// which is why [`Host::apply_scan_update`] is the single chokepoint for
/// scan-originated writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: Uuid,
    pub ip: IpAddr,
    pub status: HostStatus,
    pub discovery_method: Option<String>,
    pub discovery_response_time_ms: Option<i64>,
    pub discovery_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub os_name: Option<String>,
    pub os_confidence: Option<i32>,
    pub ignore_scanning: bool,
}

impl Host {
    /// The only mutation the scan path is allowed to make: advance
    /// `status` and `last_seen`. Every other field is left untouched.
    pub fn apply_scan_update(&mut self, status: HostStatus, seen_at: DateTime<Utc>) {
        self.status = status;
        self.last_seen = seen_at;
    }

    pub fn new_from_scan(ip: IpAddr, status: HostStatus, seen_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ip,
            status,
            discovery_method: None,
            discovery_response_time_ms: None,
            discovery_count: 0,
            first_seen: seen_at,
            last_seen: seen_at,
            os_name: None,
            os_confidence: None,
            ignore_scanning: false,
        }
    }
}

/// Result row attached to a `ScanJob` and `Host`; unique per
/// `(job, host, port, protocol)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortScan {
    pub id: Uuid,
    pub job_id: Uuid,
    pub host_id: Uuid,
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service_name: Option<String>,
    pub service_version: Option<String>,
    pub service_product: Option<String>,
}

impl PortScan {
    pub fn from_port_result(job_id: Uuid, host_id: Uuid, port: &PortResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            host_id,
            port: port.port,
            protocol: port.protocol,
            state: port.state,
            service_name: port.service_name.clone(),
            service_version: port.service_version.clone(),
            service_product: port.service_product.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_spec_single() {
        let spec = PortSpec::parse("80").unwrap();
        assert_eq!(spec.count(), 1);
        assert!(spec.contains(80));
        assert!(!spec.contains(81));
    }

    #[test]
    fn port_spec_range() {
        let spec = PortSpec::parse("80-83").unwrap();
        assert_eq!(spec.iter().collect::<Vec<_>>(), vec![80, 81, 82, 83]);
    }

    #[test]
    fn port_spec_list_and_mixed() {
        let spec = PortSpec::parse("22,80-82,443").unwrap();
        assert_eq!(spec.iter().collect::<Vec<_>>(), vec![22, 80, 81, 82, 443]);
    }

    #[test]
    fn port_spec_zero_is_accepted() {
        let spec = PortSpec::parse("0").unwrap();
        assert!(spec.contains(0));
    }

    #[test]
    fn port_spec_65535_is_accepted() {
        let spec = PortSpec::parse("65535").unwrap();
        assert!(spec.contains(65535));
    }

    #[test]
    fn port_spec_65536_is_rejected() {
        assert!(PortSpec::parse("65536").is_err());
    }

    #[test]
    fn port_spec_negative_is_rejected() {
        assert!(PortSpec::parse("-1").is_err());
    }

    #[test]
    fn port_spec_inverted_range_is_rejected() {
        assert!(PortSpec::parse("100-50").is_err());
    }

    #[test]
    fn port_spec_empty_is_rejected() {
        assert!(PortSpec::parse("").is_err());
    }

    #[test]
    fn scan_type_persisted_normalization() {
        assert_eq!(ScanType::Comprehensive.persisted_value(), ScanType::Version);
        assert_eq!(ScanType::Aggressive.persisted_value(), ScanType::Version);
        assert_eq!(ScanType::Stealth.persisted_value(), ScanType::Connect);
        assert_eq!(ScanType::Syn.persisted_value(), ScanType::Syn);
    }

    #[test]
    fn scheduled_target_jitter_is_bounded() {
        for _ in 0..1000 {
            let id = Uuid::new_v4();
            let j = ScheduledTarget::jitter_seconds(id);
            assert!((0..60).contains(&j));
        }
    }

    #[test]
    fn ad_hoc_target_is_never_due() {
        let target = ScanTarget {
            id: Uuid::new_v4(),
            name: "ad-hoc".to_string(),
            network: "10.0.0.1".parse().unwrap(),
            ports: PortSpec::parse("80").unwrap(),
            scan_type: ScanType::Connect,
            scan_interval_seconds: 0,
            enabled: true,
        };
        let now = Utc::now();
        let mut scheduled = ScheduledTarget::new(target, now);
        // next_scan is in [now, now+60s), well within "due" range, but an
        // ad-hoc target must never be selected by a tick regardless.
        scheduled.next_scan = now;
        assert!(!scheduled.is_due(now));
        assert!(!scheduled.is_due(now + chrono::Duration::hours(1)));
    }

    #[test]
    fn host_scan_update_preserves_discovery_fields() {
        let first_seen = Utc::now();
        let mut host = Host {
            id: Uuid::new_v4(),
            ip: "10.0.0.5".parse().unwrap(),
            status: HostStatus::Up,
            discovery_method: Some("ping".to_string()),
            discovery_response_time_ms: Some(12),
            discovery_count: 3,
            first_seen,
            last_seen: first_seen,
            os_name: None,
            os_confidence: None,
            ignore_scanning: false,
        };

        let later = first_seen + chrono::Duration::seconds(60);
        host.apply_scan_update(HostStatus::Up, later);

        assert_eq!(host.discovery_method, Some("ping".to_string()));
        assert_eq!(host.discovery_response_time_ms, Some(12));
        assert_eq!(host.discovery_count, 3);
        assert_eq!(host.first_seen, first_seen);
        assert_eq!(host.last_seen, later);
    }

    #[test]
    fn scan_job_transition_sets_started_and_completed() {
        let mut job = ScanJob::new_pending(Uuid::new_v4(), Uuid::new_v4());
        let t1 = Utc::now();
        job.transition(JobStatus::Running, t1);
        assert_eq!(job.started_at, Some(t1));
        assert!(job.completed_at.is_none());

        let t2 = t1 + chrono::Duration::seconds(5);
        job.transition(JobStatus::Completed, t2);
        assert_eq!(job.started_at, Some(t1));
        assert_eq!(job.completed_at, Some(t2));
        assert!(job.is_terminal());
    }

    #[test]
    fn scan_result_stats_blob_fields() {
        let now = Utc::now();
        let result = ScanResult {
            hosts: vec![
                HostResult {
                    address: "10.0.0.1".parse().unwrap(),
                    status: HostStatus::Up,
                    ports: vec![],
                },
                HostResult {
                    address: "10.0.0.2".parse().unwrap(),
                    status: HostStatus::Down,
                    ports: vec![],
                },
            ],
            start: now,
            end: now,
            duration: Duration::from_secs(7),
            error: None,
        };

        let stats = result.to_stats();
        assert_eq!(stats.hosts_up, 1);
        assert_eq!(stats.hosts_down, 1);
        assert_eq!(stats.total_hosts, 2);
        assert_eq!(stats.duration_seconds, 7);
    }
}
