//! Shared types, error taxonomy, configuration, and retry policy for the
//! Scanorama scan execution subsystem.
//!
//! # Examples
//!
//! ```
//! use scanorama_core::{Config, PortSpec, ScanTarget};
//!
//! let ports = PortSpec::parse("22,80,443,8080-8090").unwrap();
//! assert_eq!(ports.count(), 14);
//!
//! let network = ScanTarget::parse_network("192.168.1.0/24").unwrap();
//! assert_eq!(network.prefix(), 24);
//!
//! let config = Config::default();
//! assert!(config.validate().is_ok());
//! ```

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::{Config, RateLimitConfig, RetryPolicyConfig};
pub use error::{Error, Result};
pub use retry::{backoff_delay, retry_with_backoff};
pub use types::{
    Host, HostResult, HostStatus, Job, JobStatus, PortResult, PortScan, PortSpec, PortState,
    Protocol, ScanJob, ScanResult, ScanStats, ScanTarget, ScanType, ScheduledTarget,
};
