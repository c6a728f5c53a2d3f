//! Resource Manager, Worker Pool, Scheduler, and Result Sink for the
//! scan execution subsystem, plus the core boundary interfaces an
//! HTTP/CLI layer consumes.
//!
//! [`Daemon`] wires the four components together the way an operator's
//! process entry point would: a shared root [`CancellationToken`], one
//! [`scanorama_persistence::PersistenceGateway`], one scan engine, and a
//! single data flow — `Scheduler -> Pool.jobQueue -> Worker ->
//! ResourceManager.Acquire -> Scan Engine -> resultChan -> Result Sink ->
//! Persistence Gateway`.

pub mod pool;
pub mod resource_manager;
pub mod result_sink;
pub mod scheduler;

pub use pool::{JobOutcome, PoolStats, WorkerPool};
pub use resource_manager::ResourceManager;
pub use result_sink::ResultSink;
pub use scheduler::{Scheduler, SchedulerStats};

use scanorama_core::{Config, Error, Job, Result, ScanTarget};
use scanorama_engine::ScanEngine;
use scanorama_persistence::PersistenceGateway;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything the CLI/HTTP layer needs to start, stop, and drive the
/// scan execution subsystem as one unit.
pub struct Daemon {
    pub pool: Arc<WorkerPool>,
    pub resource_manager: Arc<ResourceManager>,
    pub scheduler: Arc<Scheduler>,
    root_cancel: CancellationToken,
    sink_handle: JoinHandle<()>,
}

impl Daemon {
    /// Construct and start every component, wired per the data flow above.
    /// Does not populate the scheduler's target set — call
    /// [`Scheduler::refresh_targets`] on the returned `scheduler` once the
    /// caller is ready to start scheduling.
    pub fn start(config: Config, gateway: PersistenceGateway, engine: Arc<dyn ScanEngine>) -> Self {
        let root_cancel = CancellationToken::new();
        let resource_manager = Arc::new(ResourceManager::new(config.resource_manager_capacity()));

        let (pool, result_rx) = WorkerPool::new(
            config,
            engine,
            gateway.clone(),
            resource_manager.clone(),
            root_cancel.clone(),
        );
        pool.start();

        let sink = Arc::new(ResultSink::new(gateway.clone(), pool.clone()));
        let sink_handle = sink.spawn(result_rx, root_cancel.clone());

        let scheduler = Scheduler::new(gateway, pool.clone());
        scheduler.start(root_cancel.clone());

        Self {
            pool,
            resource_manager,
            scheduler,
            root_cancel,
            sink_handle,
        }
    }

    /// Submits a target directly to the pool, bypassing the scheduler,
    /// for ad-hoc scans.
    pub async fn submit_ad_hoc(&self, target: ScanTarget) -> Result<Job> {
        if !target.is_ad_hoc() {
            return Err(Error::Validation(
                "ad-hoc submission requires scan_interval_seconds == 0".to_string(),
            ));
        }
        self.pool.submit_job(target).await
    }

    /// Graceful shutdown, in the order that keeps every in-flight result
    /// observed: stop the scheduler first (no more new submissions), let
    /// the pool drain its in-flight jobs to completion with the root
    /// context still live (the pool's graceful-drain mode), only then cancel
    /// the root context and let the Result Sink exit once it has drained
    /// whatever the pool just produced.
    pub async fn stop(self) {
        self.scheduler.stop().await;
        self.pool.stop().await;
        self.root_cancel.cancel();
        self.resource_manager.close();
        let _ = self.sink_handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use scanorama_core::{PortSpec, ScanResult, ScanType};
    use scanorama_engine::ScanConfig;
    use std::time::Duration;
    use uuid::Uuid;

    struct NoopEngine;

    #[async_trait]
    impl ScanEngine for NoopEngine {
        async fn run(
            &self,
            _cancel: CancellationToken,
            _config: &ScanConfig,
        ) -> Result<(ScanResult, Vec<String>)> {
            Ok((
                ScanResult {
                    hosts: vec![],
                    start: Utc::now(),
                    end: Utc::now(),
                    duration: Duration::from_millis(1),
                    error: None,
                },
                vec![],
            ))
        }
    }

    #[tokio::test]
    async fn daemon_wires_submit_through_to_completion() {
        let gateway = PersistenceGateway::open(":memory:").await.unwrap();
        let config = Config::default();
        let daemon = Daemon::start(config, gateway.clone(), Arc::new(NoopEngine));

        let target = ScanTarget {
            id: Uuid::new_v4(),
            name: "ad-hoc".to_string(),
            network: "127.0.0.1".parse().unwrap(),
            ports: PortSpec::parse("80").unwrap(),
            scan_type: ScanType::Connect,
            scan_interval_seconds: 0,
            enabled: true,
        };

        let job = daemon.submit_ad_hoc(target).await.unwrap();

        for _ in 0..50 {
            if let Some(row) = gateway.get_scan_job(job.id).await.unwrap() {
                if row.status == scanorama_core::JobStatus::Completed {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let row = gateway.get_scan_job(job.id).await.unwrap().unwrap();
        assert_eq!(row.status, scanorama_core::JobStatus::Completed);

        daemon.stop().await;
    }

    #[tokio::test]
    async fn submit_ad_hoc_rejects_scheduled_targets() {
        let gateway = PersistenceGateway::open(":memory:").await.unwrap();
        let daemon = Daemon::start(Config::default(), gateway, Arc::new(NoopEngine));

        let target = ScanTarget {
            id: Uuid::new_v4(),
            name: "scheduled".to_string(),
            network: "127.0.0.1".parse().unwrap(),
            ports: PortSpec::parse("80").unwrap(),
            scan_type: ScanType::Connect,
            scan_interval_seconds: 3600,
            enabled: true,
        };

        let err = daemon.submit_ad_hoc(target).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        daemon.stop().await;
    }
}
