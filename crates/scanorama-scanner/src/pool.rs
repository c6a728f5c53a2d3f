//! Worker Pool: a fixed fleet of workers pulling from a shared, bounded
//! job queue. A job that fails with a retriable error re-enters the
//! queue after an exponential backoff; one that exhausts its retries,
//! or fails with a non-retriable error, is marked `Failed` and dropped.
//!
//! Fan-out needs no helper task spawned per dispatch: every worker task
//! pulls directly from one shared `mpsc::Receiver` behind a
//! `tokio::Mutex`, so there is no separate dispatcher task at all — the
//! channel itself is the fan-out point.

use crate::resource_manager::ResourceManager;
use chrono::Utc;
use scanorama_core::retry::backoff_delay;
use scanorama_core::{Config, Error, Job, JobStatus, Result, ScanTarget};
use scanorama_engine::{ScanConfig, ScanEngine};
use scanorama_persistence::PersistenceGateway;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// Port-probe fan-out within one job. Internal to the engine invocation,
/// not a tunable the operator sets — [`Config`] governs target-level
/// concurrency via the Resource Manager instead.
const PORT_PROBE_CONCURRENCY: usize = 64;

/// One job's terminal outcome, handed to the Result Sink.
pub struct JobOutcome {
    pub job: Job,
    pub outcome: Result<scanorama_core::ScanResult>,
}

#[derive(Debug, Default)]
struct PoolStatsInner {
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// Snapshot returned by [`WorkerPool::get_stats`].
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub queued: usize,
    pub workers_active: usize,
    pub workers_idle: usize,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
}

pub struct WorkerPool {
    config: Config,
    engine: Arc<dyn ScanEngine>,
    gateway: PersistenceGateway,
    resource_manager: Arc<ResourceManager>,
    root_cancel: CancellationToken,
    pending: dashmap::DashMap<Uuid, Job>,
    job_tx: StdMutex<Option<mpsc::Sender<Job>>>,
    job_rx: AsyncMutex<mpsc::Receiver<Job>>,
    result_tx: mpsc::UnboundedSender<JobOutcome>,
    stats: PoolStatsInner,
    workers_active: AtomicUsize,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Queue capacity is `2 * worker_pool_size`, so a burst of
    /// submissions can outrun the worker fleet briefly without callers
    /// blocking on every single submit.
    pub fn new(
        config: Config,
        engine: Arc<dyn ScanEngine>,
        gateway: PersistenceGateway,
        resource_manager: Arc<ResourceManager>,
        root_cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<JobOutcome>) {
        let queue_capacity = (config.worker_pool_size * 2).max(2);
        let (job_tx, job_rx) = mpsc::channel(queue_capacity);
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        let pool = Arc::new(Self {
            config,
            engine,
            gateway,
            resource_manager,
            root_cancel,
            pending: dashmap::DashMap::new(),
            job_tx: StdMutex::new(Some(job_tx)),
            job_rx: AsyncMutex::new(job_rx),
            result_tx,
            stats: PoolStatsInner::default(),
            workers_active: AtomicUsize::new(0),
            handles: StdMutex::new(Vec::new()),
        });

        (pool, result_rx)
    }

    /// Spawn the fixed worker fleet. Idempotent is not guaranteed —
    /// callers should invoke this once per pool.
    pub fn start(self: &Arc<Self>) {
        for _ in 0..self.config.worker_pool_size {
            let pool = self.clone();
            let handle = tokio::spawn(async move { pool.worker_loop().await });
            self.handles.lock().unwrap().push(handle);
        }
    }

    async fn worker_loop(self: Arc<Self>) {
        loop {
            let job = {
                let mut rx = self.job_rx.lock().await;
                rx.recv().await
            };
            let Some(job) = job else { break };

            self.workers_active.fetch_add(1, Ordering::SeqCst);
            self.execute_job(job).await;
            self.workers_active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Accept a new target into the pool: persist the `ScanJob` row,
    /// record the in-memory `Job` as pending, and enqueue it. Rejects
    /// new work once [`Self::stop`] has closed the queue, and returns as
    /// soon as the root context is cancelled even if the queue is still
    /// full, rather than blocking indefinitely on backpressure.
    pub async fn submit_job(&self, target: ScanTarget) -> Result<Job> {
        let tx = { self.job_tx.lock().unwrap().clone() };
        let Some(tx) = tx else { return Err(Error::Shutdown) };

        let job = Job::new(target, Utc::now());
        self.gateway.create_scan_job(job.id, job.target_id).await?;
        self.pending.insert(job.id, job.clone());

        tokio::select! {
            biased;
            _ = self.root_cancel.cancelled() => {
                self.pending.remove(&job.id);
                return Err(Error::Shutdown);
            }
            res = tx.send(job.clone()) => {
                res.map_err(|_| Error::Shutdown)?;
            }
        }
        Ok(job)
    }

    /// Stop accepting submissions, let every queued and in-flight job
    /// drain, then join the worker fleet. `root_cancel` is left to the
    /// caller — cancelling it first turns this into an abrupt shutdown
    /// instead of a graceful drain.
    pub async fn stop(self: &Arc<Self>) {
        *self.job_tx.lock().unwrap() = None;
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub fn get_stats(&self) -> PoolStats {
        let workers_active = self.workers_active.load(Ordering::SeqCst);
        PoolStats {
            queued: self.pending.len(),
            workers_active,
            workers_idle: self.config.worker_pool_size.saturating_sub(workers_active),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
        }
    }

    /// Remove a job from the pending set. Only the Result Sink calls
    /// this — it's the map's single writer.
    pub(crate) fn remove_pending(&self, job_id: Uuid) -> Option<Job> {
        self.pending.remove(&job_id).map(|(_, job)| job)
    }

    pub(crate) fn record_completed(&self) {
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Decide whether `job` gets another attempt. Called by the Result
    /// Sink once it has removed the job from pending and determined its
    /// engine invocation failed.
    pub(crate) async fn handle_failure(self: &Arc<Self>, mut job: Job, error: Error) {
        if error.is_retriable() && job.retries < self.config.retry.max_retries {
            job.retries += 1;
            self.stats.retried.fetch_add(1, Ordering::Relaxed);
            self.pending.insert(job.id, job.clone());

            if let Err(e) = self
                .gateway
                .update_scan_job_status(job.id, JobStatus::Pending, None, None)
                .await
            {
                warn!(error = %e, job_id = %job.id, "failed to persist retry status");
            }

            let delay = backoff_delay(&self.config.retry, job.retries);
            let pool = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let tx = { pool.job_tx.lock().unwrap().clone() };
                match tx {
                    Some(tx) => {
                        if tx.send(job.clone()).await.is_err() {
                            pool.pending.remove(&job.id);
                        }
                    }
                    None => {
                        pool.pending.remove(&job.id);
                    }
                }
            });
        } else {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self
                .gateway
                .update_scan_job_status(job.id, JobStatus::Failed, None, Some(error.to_string()))
                .await
            {
                warn!(error = %e, job_id = %job.id, "failed to persist failed status");
            }
        }
    }

    async fn execute_job(&self, job: Job) {
        if let Err(e) = self
            .gateway
            .update_scan_job_status(job.id, JobStatus::Running, None, None)
            .await
        {
            warn!(error = %e, job_id = %job.id, "failed to persist running status");
        }

        let targets = match expand_network(&job.target.network) {
            Ok(t) => t,
            Err(e) => {
                let _ = self.result_tx.send(JobOutcome { job, outcome: Err(e) });
                return;
            }
        };

        let scan_config = ScanConfig {
            targets,
            ports: job.target.ports.clone(),
            scan_type: job.target.scan_type,
            timeout_sec: self.config.max_scan_timeout_secs,
            concurrency: PORT_PROBE_CONCURRENCY,
        };

        let outcome = match self.resource_manager.acquire(&self.root_cancel, job.id).await {
            Ok(()) => {
                let result = self.run_with_deadline(&scan_config).await;
                self.resource_manager.release(job.id);
                result
            }
            Err(e) => Err(e),
        };

        let outcome = outcome.map(|(result, warnings)| {
            for warning in warnings {
                warn!(job_id = %job.id, %warning, "scan engine warning");
            }
            result
        });

        let _ = self.result_tx.send(JobOutcome { job, outcome });
    }

    /// Per-job deadline: `min(remaining root context, MaxScanTimeout)`.
    /// The root context has no wall-clock deadline of its own, only
    /// cancellation, so this races `MaxScanTimeout` against
    /// `root_cancel` rather than against a second duration.
    async fn run_with_deadline(
        &self,
        scan_config: &ScanConfig,
    ) -> Result<(scanorama_core::ScanResult, Vec<String>)> {
        let timeout_dur = Duration::from_secs(self.config.max_scan_timeout_secs);
        let run_fut = self.engine.run(self.root_cancel.child_token(), scan_config);

        tokio::select! {
            biased;
            _ = self.root_cancel.cancelled() => Err(Error::Cancelled),
            res = tokio::time::timeout(timeout_dur, run_fut) => {
                match res {
                    Ok(inner) => inner,
                    Err(_elapsed) => Err(Error::Timeout),
                }
            }
        }
    }
}

fn expand_network(network: &ipnetwork::IpNetwork) -> Result<Vec<IpAddr>> {
    let ips: Vec<IpAddr> = match network {
        ipnetwork::IpNetwork::V4(net) => net.iter().map(IpAddr::V4).collect(),
        ipnetwork::IpNetwork::V6(net) => net.iter().map(IpAddr::V6).collect(),
    };
    if ips.is_empty() {
        return Err(Error::Validation(
            "scan target network expands to zero addresses".to_string(),
        ));
    }
    Ok(ips)
}
