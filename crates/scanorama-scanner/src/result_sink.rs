//! Result Sink: the single consumer of the Worker Pool's result channel.
//! Owns every PortScan write, so ordering and failure handling for one
//! job's storage stay sequential and local to this one task.

use crate::pool::{JobOutcome, WorkerPool};
use scanorama_core::{JobStatus, PortScan};
use scanorama_persistence::PersistenceGateway;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

pub struct ResultSink {
    gateway: PersistenceGateway,
    pool: Arc<WorkerPool>,
}

impl ResultSink {
    pub fn new(gateway: PersistenceGateway, pool: Arc<WorkerPool>) -> Self {
        Self { gateway, pool }
    }

    /// Drain `result_rx` until the root context is cancelled or the
    /// channel closes (the pool, and every worker holding a sender clone,
    /// has been dropped).
    pub fn spawn(
        self: Arc<Self>,
        mut result_rx: mpsc::UnboundedReceiver<JobOutcome>,
        root_cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = root_cancel.cancelled() => {
                        // Drain whatever the pool already produced before
                        // the cancellation was observed here, so a result
                        // that landed in the channel a moment earlier
                        // isn't silently dropped on shutdown.
                        while let Ok(outcome) = result_rx.try_recv() {
                            self.handle_outcome(outcome).await;
                        }
                        break;
                    }
                    outcome = result_rx.recv() => {
                        match outcome {
                            Some(outcome) => self.handle_outcome(outcome).await,
                            None => break,
                        }
                    }
                }
            }
        })
    }

    /// Per-result sequence: remove from pending, then either persist a
    /// successful result or hand the failure to the pool's retry logic.
    async fn handle_outcome(&self, outcome: JobOutcome) {
        let JobOutcome { job, outcome } = outcome;
        self.pool.remove_pending(job.id);

        match outcome {
            Ok(result) => {
                let stats = result.to_stats();
                if let Err(e) = self
                    .gateway
                    .update_scan_job_status(job.id, JobStatus::Completed, Some(stats), None)
                    .await
                {
                    error!(job_id = %job.id, error = %e, "failed to persist completed job status");
                }
                self.pool.record_completed();
                self.persist_result(job.id, &result).await;
            }
            Err(e) => {
                self.pool.handle_failure(job, e).await;
            }
        }
    }

    /// Race-safe host upsert per host, verify-before-write, then a
    /// single batch insert for every `PortScan` row in the job. Storage
    /// errors here are logged and counted, never turned into a job
    /// failure — the scan itself already succeeded, a deliberate
    /// asymmetry.
    async fn persist_result(&self, job_id: uuid::Uuid, result: &scanorama_core::ScanResult) {
        let mut rows = Vec::new();

        for host in &result.hosts {
            let host_row = match self
                .gateway
                .create_or_update_host(host.address, host.status, result.end)
                .await
            {
                Ok(h) => h,
                Err(e) => {
                    error!(job_id = %job_id, address = %host.address, error = %e, "host upsert failed");
                    continue;
                }
            };

            match self.gateway.verify_host_exists(host_row.id).await {
                Ok(true) => {}
                Ok(false) => {
                    error!(
                        job_id = %job_id,
                        host_id = %host_row.id,
                        "host verification failed, skipping port scans for this host"
                    );
                    continue;
                }
                Err(e) => {
                    error!(job_id = %job_id, host_id = %host_row.id, error = %e, "host verification query failed");
                    continue;
                }
            }

            rows.extend(
                host.ports
                    .iter()
                    .map(|p| PortScan::from_port_result(job_id, host_row.id, p)),
            );
        }

        if let Err(e) = self.gateway.batch_create_port_scans(&rows).await {
            error!(job_id = %job_id, error = %e, "port scan batch write failed, job remains completed");
        }
    }
}
