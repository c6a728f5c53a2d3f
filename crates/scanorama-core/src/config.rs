//! Environment / config surface: the subset of fields the scan
//! execution core actually reads. Parsing the config file from disk and
//! hot-reloading it are owned by the surrounding CLI/API layer; this
//! type only needs to be loadable, validated, and cheap to clone into
//! each component at construction time.

use crate::error::{Error, Result};
use crate::types::ScanType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration consumed by the Scheduler, Worker Pool, and
/// Resource Manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub worker_pool_size: usize,
    pub max_concurrent_targets: usize,
    pub max_scan_timeout_secs: u64,
    pub default_ports: String,
    pub default_scan_type: ScanType,
    pub retry: RetryPolicyConfig,
    /// Rate limiting is consumed by the outer API, not the core; carried
    /// here only because it's part of the shared environment contract.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            max_concurrent_targets: 4,
            max_scan_timeout_secs: 300,
            default_ports: "1-1000".to_string(),
            default_scan_type: ScanType::Connect,
            retry: RetryPolicyConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {path:?}: {e}")))?;
        Self::load_from_str(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|e| Error::Config(format!("failed to write config file {path:?}: {e}")))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(Error::Config("worker_pool_size must be >= 1".to_string()));
        }
        if self.max_scan_timeout_secs == 0 {
            return Err(Error::Config(
                "max_scan_timeout_secs must be >= 1".to_string(),
            ));
        }
        crate::types::PortSpec::parse(&self.default_ports)
            .map_err(|e| Error::Config(format!("invalid default_ports: {e}")))?;
        self.retry.validate()?;
        Ok(())
    }

    /// Resource Manager capacity, clamped to at least 1.
    pub fn resource_manager_capacity(&self) -> usize {
        self.max_concurrent_targets.max(1)
    }
}

/// Per-job retry policy: max attempts, base delay, and backoff growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: u32,
    /// Hard cap on the computed delay.
    #[serde(default = "default_retry_delay_max_ms")]
    pub retry_delay_max_ms: u64,
}

fn default_retry_delay_max_ms() -> u64 {
    30_000
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            backoff_multiplier: 2,
            retry_delay_max_ms: default_retry_delay_max_ms(),
        }
    }
}

impl RetryPolicyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier == 0 {
            return Err(Error::Config(
                "backoff_multiplier must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// `RateLimit.{Enabled, RequestsPerSecond, BurstSize}` — read by the
/// outer API only; the scan core never consults these fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 10,
            burst_size: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_worker_pool_size_rejected() {
        let mut config = Config::default();
        config.worker_pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = Config::default();
        config.max_scan_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_default_ports_rejected() {
        let mut config = Config::default();
        config.default_ports = "not-a-port".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn resource_manager_capacity_clamped_to_one() {
        let mut config = Config::default();
        config.max_concurrent_targets = 0;
        assert_eq!(config.resource_manager_capacity(), 1);
    }

    #[test]
    fn toml_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = Config::load_from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn load_from_str_rejects_invalid_config() {
        let toml_str = r#"
            worker_pool_size = 0
            max_concurrent_targets = 4
            max_scan_timeout_secs = 300
            default_ports = "1-1000"
            default_scan_type = "connect"

            [retry]
            max_retries = 3
            retry_delay_ms = 500
            backoff_multiplier = 2
        "#;
        assert!(Config::load_from_str(toml_str).is_err());
    }
}
