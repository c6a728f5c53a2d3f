//! Error types shared across the scan execution subsystem.

use std::io;
use std::net::AddrParseError;
use thiserror::Error;

/// Result type alias used throughout Scanorama.
pub type Result<T> = std::result::Result<T, Error>;

/// Tagged error taxonomy for the scan execution subsystem. Each variant
/// corresponds to one outcome a caller at a component boundary needs to
/// branch on (retry, surface to the submitter, or treat as fatal).
#[derive(Error, Debug)]
pub enum Error {
    /// Input failed validation (bad target, bad port spec, bad scan type).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A scan or a query exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The scan engine adapter reported a failure running the scan itself.
    #[error("scan failed: {0}")]
    ScanFailed(String),

    /// The network underneath the target is unreachable.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// The specific host is unreachable (routed network, dead host).
    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    /// Could not obtain or use a database connection.
    #[error("database connection error: {0}")]
    DatabaseConnection(String),

    /// A database statement failed.
    #[error("database query error: {0}")]
    DatabaseQuery(String),

    /// A database operation exceeded its deadline.
    #[error("database operation timed out: {0}")]
    DatabaseTimeout(String),

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// The owning component is shutting down and rejects new work.
    #[error("shutting down")]
    Shutdown,

    /// A host record could not be verified to exist before writing
    /// dependent `PortScan` rows.
    #[error("host verification failed: {0}")]
    HostVerificationFailed(String),

    /// I/O errors with automatic conversion.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Parsing errors for IP addresses, CIDR, ports.
    #[error("parse error: {0}")]
    Parse(String),

    /// Configuration errors.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization errors.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether a caller should retry this error per the worker pool's
    /// backoff policy, as opposed to surfacing it immediately.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Timeout
                | Error::NetworkUnreachable(_)
                | Error::HostUnreachable(_)
                | Error::DatabaseTimeout(_)
                | Error::ScanFailed(_)
        )
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::Parse(format!("invalid IP address: {err}"))
    }
}

impl From<ipnetwork::IpNetworkError> for Error {
    fn from(err: ipnetwork::IpNetworkError) -> Self {
        Error::Parse(format!("invalid IP network: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON error: {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("TOML parse error: {err}"))
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(format!("TOML serialization error: {err}"))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => Error::DatabaseTimeout(err.to_string()),
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Error::DatabaseConnection(err.to_string())
            }
            _ => Error::DatabaseQuery(err.to_string()),
        }
    }
}
