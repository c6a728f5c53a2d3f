//! The default scan engine implementation: TCP-connect probing.
//!
//! Connection-refused means closed, a timeout means filtered, and
//! permission-denied means filtered with a privilege warning.

use crate::config::{ProbeOptions, ScanConfig};
use async_trait::async_trait;
use chrono::Utc;
use scanorama_core::{
    Error, HostResult, HostStatus, PortResult, PortState, Protocol, Result, ScanResult,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout as tokio_timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Runs one scan invocation to completion, returning the raw result plus
/// any non-fatal warnings collected along the way.
#[async_trait]
pub trait ScanEngine: Send + Sync {
    async fn run(
        &self,
        cancel: CancellationToken,
        config: &ScanConfig,
    ) -> Result<(ScanResult, Vec<String>)>;
}

/// Default `ScanEngine`: probes every (target, port) pair with a
/// concurrency-bounded TCP connect attempt.
#[derive(Debug, Clone, Default)]
pub struct TcpConnectEngine;

impl TcpConnectEngine {
    pub fn new() -> Self {
        Self
    }

    async fn attempt_connect(
        &self,
        addr: SocketAddr,
        probe_timeout: Duration,
        warnings: &Arc<parking_lot_free::Warnings>,
    ) -> PortState {
        match tokio_timeout(probe_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {
                trace!(%addr, "port open");
                PortState::Open
            }
            Ok(Err(e)) => match e.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    trace!(%addr, "port closed");
                    PortState::Closed
                }
                std::io::ErrorKind::PermissionDenied => {
                    warnings.push(format!(
                        "permission denied probing {addr}; a raw-socket scan type may require elevated privileges"
                    ));
                    PortState::Filtered
                }
                _ => {
                    trace!(%addr, error = %e, "probe i/o error, treating as filtered");
                    PortState::Filtered
                }
            },
            Err(_elapsed) => {
                trace!(%addr, "probe timed out, treating as filtered");
                PortState::Filtered
            }
        }
    }

    async fn scan_host(
        &self,
        ip: IpAddr,
        config: &ScanConfig,
        options: ProbeOptions,
        cancel: &CancellationToken,
        warnings: &Arc<parking_lot_free::Warnings>,
    ) -> Option<HostResult> {
        let probe_timeout = Duration::from_secs(config.timeout_sec.max(1));
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        let mut handles = Vec::new();

        for port in config.ports.iter() {
            if cancel.is_cancelled() {
                break;
            }
            let permit = semaphore.clone().acquire_owned().await.ok()?;
            let this = self.clone();
            let warnings = warnings.clone();
            let delay = options.timing.inter_probe_delay();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let addr = SocketAddr::new(ip, port);
                let state = this.attempt_connect(addr, probe_timeout, &warnings).await;
                (port, state)
            }));
        }

        let mut ports = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok((port, state)) = handle.await {
                let mut result = PortResult::new(port, Protocol::Tcp, state);
                if options.service_detection && state == PortState::Open {
                    result.service_name = well_known_service(port).map(str::to_string);
                }
                ports.push(result);
            }
        }
        ports.sort_by_key(|p| p.port);

        let status = if ports.iter().any(|p| p.state != PortState::Filtered) {
            HostStatus::Up
        } else {
            HostStatus::Filtered
        };

        Some(HostResult {
            address: ip,
            status,
            ports,
        })
    }
}

#[async_trait]
impl ScanEngine for TcpConnectEngine {
    async fn run(
        &self,
        cancel: CancellationToken,
        config: &ScanConfig,
    ) -> Result<(ScanResult, Vec<String>)> {
        config.validate()?;
        let options = config.probe_options();
        let warnings = Arc::new(parking_lot_free::Warnings::default());
        let start = Utc::now();
        let start_instant = Instant::now();

        let mut hosts = Vec::new();
        for ip in &config.targets {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let scan = self.scan_host(*ip, config, options, &cancel, &warnings);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                result = scan => {
                    if let Some(host) = result {
                        hosts.push(host);
                    }
                }
            }
        }

        let end = Utc::now();
        debug!(hosts = hosts.len(), "scan engine run complete");

        Ok((
            ScanResult {
                hosts,
                start,
                end,
                duration: start_instant.elapsed(),
                error: None,
            },
            warnings.drain(),
        ))
    }
}

/// A handful of well-known TCP ports, used only to populate
/// `service_name` for scan types that request service detection. This is
/// a stand-in for the out-of-scope full service/version probe database.
fn well_known_service(port: u16) -> Option<&'static str> {
    match port {
        21 => Some("ftp"),
        22 => Some("ssh"),
        23 => Some("telnet"),
        25 => Some("smtp"),
        53 => Some("domain"),
        80 => Some("http"),
        110 => Some("pop3"),
        143 => Some("imap"),
        443 => Some("https"),
        3306 => Some("mysql"),
        5432 => Some("postgresql"),
        6379 => Some("redis"),
        8080 => Some("http-alt"),
        _ => None,
    }
}

/// A tiny lock-free-ish warning collector shared across concurrent probe
/// tasks; named to make clear it is not a general concurrency primitive,
/// just a push-only bag guarded by a mutex.
mod parking_lot_free {
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct Warnings(Mutex<Vec<String>>);

    impl Warnings {
        pub fn push(&self, message: String) {
            self.0.lock().unwrap().push(message);
        }

        pub fn drain(&self) -> Vec<String> {
            std::mem::take(&mut self.0.lock().unwrap())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanorama_core::{PortSpec, ScanType};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn scan_detects_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        // Bind, then immediately drop, a second listener to get a port
        // that's very likely closed (connection refused) at scan time.
        let throwaway = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = throwaway.local_addr().unwrap().port();
        drop(throwaway);

        let config = ScanConfig {
            targets: vec!["127.0.0.1".parse().unwrap()],
            ports: PortSpec::parse(&format!("{open_port},{closed_port}")).unwrap(),
            scan_type: ScanType::Connect,
            timeout_sec: 2,
            concurrency: 4,
        };

        let engine = TcpConnectEngine::new();
        let (result, _warnings) = engine.run(CancellationToken::new(), &config).await.unwrap();

        assert_eq!(result.hosts.len(), 1);
        let host = &result.hosts[0];
        assert_eq!(host.status, HostStatus::Up);
        let open = host.ports.iter().find(|p| p.port == open_port).unwrap();
        assert_eq!(open.state, PortState::Open);
        let closed = host.ports.iter().find(|p| p.port == closed_port).unwrap();
        assert_eq!(closed.state, PortState::Closed);
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let config = ScanConfig {
            targets: vec!["127.0.0.1".parse().unwrap()],
            ports: PortSpec::parse("80").unwrap(),
            scan_type: ScanType::Connect,
            timeout_sec: 2,
            concurrency: 1,
        };

        let engine = TcpConnectEngine::new();
        let err = engine.run(cancel, &config).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_probing() {
        let mut config = ScanConfig {
            targets: vec!["127.0.0.1".parse().unwrap()],
            ports: PortSpec::parse("80").unwrap(),
            scan_type: ScanType::Connect,
            timeout_sec: 2,
            concurrency: 1,
        };
        config.targets.clear();

        let engine = TcpConnectEngine::new();
        let err = engine
            .run(CancellationToken::new(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn version_scan_tags_well_known_service() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let config = ScanConfig {
            targets: vec!["127.0.0.1".parse().unwrap()],
            ports: PortSpec::parse(&port.to_string()).unwrap(),
            scan_type: ScanType::Version,
            timeout_sec: 2,
            concurrency: 1,
        };

        let engine = TcpConnectEngine::new();
        let (result, _) = engine.run(CancellationToken::new(), &config).await.unwrap();
        // port is ephemeral, so we can't assert a name, just that no panic occurs
        // and the port is reported open.
        assert_eq!(result.hosts[0].ports[0].state, PortState::Open);
    }
}
