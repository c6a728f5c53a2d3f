//! Scheduler: owns the live set of [`ScheduledTarget`]s and submits due
//! `Job`s to the [`WorkerPool`].

use crate::pool::WorkerPool;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use scanorama_core::{Error, Job, Result, ScanTarget, ScheduledTarget};
use scanorama_persistence::PersistenceGateway;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Full reconcile / tick cadence.
const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// A [`ScheduledTarget`] plus an insertion sequence number, used only to
/// break ties deterministically when two targets share a `next_scan`.
/// A `HashMap`'s iteration order carries no such guarantee on its own.
struct Entry {
    scheduled: ScheduledTarget,
    seq: u64,
}

#[derive(Debug, Default)]
struct StatsInner {
    jobs_scheduled: AtomicU64,
    jobs_submitted: AtomicU64,
}

/// Snapshot returned by [`Scheduler::get_stats`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerStats {
    pub targets_total: usize,
    pub targets_enabled: usize,
    pub jobs_scheduled: u64,
    pub jobs_submitted: u64,
}

pub struct Scheduler {
    gateway: PersistenceGateway,
    pool: Arc<WorkerPool>,
    targets: RwLock<HashMap<Uuid, Entry>>,
    next_seq: AtomicU64,
    stats: StatsInner,
    stop_token: CancellationToken,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(gateway: PersistenceGateway, pool: Arc<WorkerPool>) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            pool,
            targets: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            stats: StatsInner::default(),
            stop_token: CancellationToken::new(),
            handle: StdMutex::new(None),
        })
    }

    /// Spawn the 30s tick loop. An initial [`Self::refresh_targets`] call
    /// is the caller's responsibility (e.g. right after `start`) so the
    /// scheduler begins with a populated set rather than waiting a full
    /// tick to load anything.
    pub fn start(self: &Arc<Self>, root_cancel: CancellationToken) {
        let scheduler = self.clone();
        let stop_token = self.stop_token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = root_cancel.cancelled() => break,
                    _ = stop_token.cancelled() => break,
                    _ = tokio::time::sleep(TICK_INTERVAL) => {
                        let now = Utc::now();
                        scheduler.submit_due_jobs(now).await;
                    }
                }
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    pub async fn stop(self: &Arc<Self>) {
        self.stop_token.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Add (or replace) an in-memory [`ScheduledTarget`]. The `ScanTarget`
    /// row itself is assumed already persisted by the caller — the
    /// Scheduler owns only the scheduling record.
    pub fn add_target(&self, target: ScanTarget) {
        let now = Utc::now();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let id = target.id;
        self.targets
            .write()
            .insert(id, Entry { scheduled: ScheduledTarget::new(target, now), seq });
    }

    pub fn remove_target(&self, id: Uuid) {
        self.targets.write().remove(&id);
    }

    /// Replace the stored snapshot for `target`. If its interval changed,
    /// `next_scan` is recomputed as `(last_scan or now) + new_interval`;
    /// otherwise the existing `next_scan` is left untouched.
    pub fn update_target(&self, target: ScanTarget) {
        let now = Utc::now();
        let mut targets = self.targets.write();
        let Some(entry) = targets.get_mut(&target.id) else {
            drop(targets);
            return self.add_target(target);
        };

        let interval_changed =
            entry.scheduled.target.scan_interval_seconds != target.scan_interval_seconds;
        entry.scheduled.enabled = target.enabled;
        entry.scheduled.target = target;

        if interval_changed {
            let base = entry.scheduled.last_scan.unwrap_or(now);
            entry.scheduled.next_scan =
                base + chrono::Duration::seconds(entry.scheduled.target.scan_interval_seconds.max(0));
        }
    }

    /// Full reconcile from the Persistence Gateway: targets present in
    /// the DB but not in memory are added with `last_scan = None` (so
    /// they get fresh jitter); targets in memory but absent from the DB
    /// are dropped; targets in both are updated in place, preserving
    /// their existing schedule. Immediately followed by a due-job
    /// submission pass.
    pub async fn refresh_targets(self: &Arc<Self>) -> Result<()> {
        let db_targets = self.gateway.get_all_scan_targets().await?;
        let db_ids: std::collections::HashSet<Uuid> = db_targets.iter().map(|t| t.id).collect();

        {
            let mut targets = self.targets.write();
            targets.retain(|id, _| db_ids.contains(id));

            for target in db_targets {
                match targets.get_mut(&target.id) {
                    Some(entry) => {
                        entry.scheduled.enabled = target.enabled;
                        entry.scheduled.target = target;
                    }
                    None => {
                        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                        let now = Utc::now();
                        targets.insert(
                            target.id,
                            Entry { scheduled: ScheduledTarget::new(target, now), seq },
                        );
                    }
                }
            }
        }

        self.submit_due_jobs(Utc::now()).await;
        Ok(())
    }

    /// Immediately submit `id`'s job regardless of its `next_scan`, then
    /// advance its schedule as if it had come due normally.
    pub async fn force_schedule(self: &Arc<Self>, id: Uuid) -> Result<Job> {
        let target = {
            let targets = self.targets.read();
            let entry = targets
                .get(&id)
                .ok_or_else(|| Error::Validation(format!("unknown scheduled target {id}")))?;
            entry.scheduled.target.clone()
        };

        self.stats.jobs_scheduled.fetch_add(1, Ordering::Relaxed);
        let job = self.pool.submit_job(target).await?;
        self.stats.jobs_submitted.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now();
        if let Some(entry) = self.targets.write().get_mut(&id) {
            entry.scheduled.advance(now);
        }
        Ok(job)
    }

    pub fn get_overdue_targets(&self, now: DateTime<Utc>) -> Vec<ScanTarget> {
        self.targets
            .read()
            .values()
            .filter(|e| e.scheduled.is_due(now))
            .map(|e| e.scheduled.target.clone())
            .collect()
    }

    pub fn get_stats(&self) -> SchedulerStats {
        let targets = self.targets.read();
        SchedulerStats {
            targets_total: targets.len(),
            targets_enabled: targets.values().filter(|e| e.scheduled.enabled).count(),
            jobs_scheduled: self.stats.jobs_scheduled.load(Ordering::Relaxed),
            jobs_submitted: self.stats.jobs_submitted.load(Ordering::Relaxed),
        }
    }

    /// One tick's work: collect every target due at `now`, sorted
    /// ascending by `next_scan` (ties broken by insertion order), and
    /// submit each. A target whose submission fails stays due — its
    /// `last_scan`/`next_scan` are left untouched so the next tick
    /// retries it.
    async fn submit_due_jobs(self: &Arc<Self>, now: DateTime<Utc>) {
        let mut due: Vec<(Uuid, ScanTarget, DateTime<Utc>, u64)> = {
            let targets = self.targets.read();
            targets
                .iter()
                .filter(|(_, e)| e.scheduled.is_due(now))
                .map(|(id, e)| (*id, e.scheduled.target.clone(), e.scheduled.next_scan, e.seq))
                .collect()
        };
        due.sort_by(|a, b| a.2.cmp(&b.2).then(a.3.cmp(&b.3)));

        for (id, target, _, _) in due {
            self.stats.jobs_scheduled.fetch_add(1, Ordering::Relaxed);
            match self.pool.submit_job(target).await {
                Ok(_job) => {
                    self.stats.jobs_submitted.fetch_add(1, Ordering::Relaxed);
                    if let Some(entry) = self.targets.write().get_mut(&id) {
                        entry.scheduled.advance(now);
                    }
                    info!(target_id = %id, "scheduler submitted due target");
                }
                Err(e) => {
                    warn!(target_id = %id, error = %e, "scheduler submission failed, target stays due");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_manager::ResourceManager;
    use async_trait::async_trait;
    use scanorama_core::{Config, PortSpec, ScanResult, ScanType};
    use scanorama_engine::ScanConfig;
    use std::sync::atomic::AtomicUsize;

    struct CountingEngine(Arc<AtomicUsize>);

    #[async_trait]
    impl scanorama_engine::ScanEngine for CountingEngine {
        async fn run(
            &self,
            _cancel: CancellationToken,
            _config: &ScanConfig,
        ) -> Result<(ScanResult, Vec<String>)> {
            self.0.fetch_add(1, Ordering::SeqCst);
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

    fn target(interval: i64) -> ScanTarget {
        ScanTarget {
            id: Uuid::new_v4(),
            name: "t".to_string(),
            network: "127.0.0.1".parse().unwrap(),
            ports: PortSpec::parse("80").unwrap(),
            scan_type: ScanType::Connect,
            scan_interval_seconds: interval,
            enabled: true,
        }
    }

    async fn setup() -> (Arc<Scheduler>, Arc<WorkerPool>, Arc<AtomicUsize>) {
        let gateway = PersistenceGateway::open(":memory:").await.unwrap();
        let config = Config::default();
        let resource_manager = Arc::new(ResourceManager::new(config.resource_manager_capacity()));
        let calls = Arc::new(AtomicUsize::new(0));
        let (pool, _results) = WorkerPool::new(
            config,
            Arc::new(CountingEngine(calls.clone())),
            gateway.clone(),
            resource_manager,
            CancellationToken::new(),
        );
        pool.start();
        let scheduler = Scheduler::new(gateway, pool.clone());
        (scheduler, pool, calls)
    }

    #[tokio::test]
    async fn force_schedule_submits_immediately_and_advances() {
        let (scheduler, _pool, calls) = setup().await;
        let t = target(3600);
        let id = t.id;
        scheduler.add_target(t);

        scheduler.force_schedule(id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let overdue = scheduler.get_overdue_targets(Utc::now());
        assert!(overdue.is_empty(), "target should no longer be due right after a force-schedule");
    }

    #[tokio::test]
    async fn ad_hoc_target_is_never_submitted_by_a_tick() {
        let (scheduler, _pool, calls) = setup().await;
        let t = target(0);
        let id = t.id;
        scheduler.add_target(t);

        // next_scan starts in [now, now+60s) from jitter; force it to
        // "now" so it would be selected by submit_due_jobs if the
        // interval guard were missing.
        {
            let mut targets = scheduler.targets.write();
            targets.get_mut(&id).unwrap().scheduled.next_scan = Utc::now();
        }

        scheduler.submit_due_jobs(Utc::now()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(scheduler.get_overdue_targets(Utc::now()).is_empty());
    }

    #[tokio::test]
    async fn refresh_reconcile_adds_removes_and_updates() {
        let (scheduler, _pool, _calls) = setup().await;
        let t1 = target(60);
        scheduler.gateway_for_test().create_scan_target(&t1).await.unwrap();

        scheduler.refresh_targets().await.unwrap();
        assert_eq!(scheduler.get_stats().targets_total, 1);

        // A second refresh with the same DB contents is idempotent: same
        // target count, and the in-memory next_scan for t1 is unchanged
        // (only freshly-introduced targets get new jitter).
        let next_scan_before = {
            let targets = scheduler.targets.read();
            targets.get(&t1.id).unwrap().scheduled.next_scan
        };
        scheduler.refresh_targets().await.unwrap();
        let next_scan_after = {
            let targets = scheduler.targets.read();
            targets.get(&t1.id).unwrap().scheduled.next_scan
        };
        assert_eq!(next_scan_before, next_scan_after);
    }

    #[tokio::test]
    async fn update_target_recomputes_next_scan_on_interval_change() {
        let (scheduler, _pool, _calls) = setup().await;
        let mut t = target(3600);
        let id = t.id;
        scheduler.add_target(t.clone());

        t.scan_interval_seconds = 60;
        scheduler.update_target(t);

        let targets = scheduler.targets.read();
        let entry = targets.get(&id).unwrap();
        assert!(entry.scheduled.next_scan <= Utc::now() + chrono::Duration::seconds(61));
    }

    #[tokio::test]
    async fn remove_target_drops_it_from_overdue() {
        let (scheduler, _pool, _calls) = setup().await;
        let t = target(0);
        let id = t.id;
        scheduler.add_target(t);
        scheduler.remove_target(id);
        assert_eq!(scheduler.get_stats().targets_total, 0);
    }

    impl Scheduler {
        fn gateway_for_test(&self) -> &PersistenceGateway {
            &self.gateway
        }
    }
}
