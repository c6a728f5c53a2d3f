//! Resource Manager: a semaphore-backed admission gate the Worker Pool
//! consults before handing a job to the scan engine, so the total
//! number of concurrently-running scans never exceeds
//! `max_concurrent_targets` regardless of how many workers are idle.
//!
//! An owned-permit semaphore plus a side map from in-flight id to
//! permit, so release is a single idempotent removal rather than a
//! manually-tracked counter.

use dashmap::DashMap;
use scanorama_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Admission control over concurrently-running scans.
pub struct ResourceManager {
    semaphore: Arc<Semaphore>,
    active: DashMap<Uuid, OwnedSemaphorePermit>,
    closed: AtomicBool,
}

impl ResourceManager {
    /// `capacity` is clamped to at least 1, matching
    /// [`scanorama_core::Config::resource_manager_capacity`].
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
            active: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Block until a slot is free, the manager is closed, or `cancel`
    /// fires. The slot is keyed by `scan_id` so [`Self::release`] stays
    /// idempotent even if called twice or for an id that never acquired.
    pub async fn acquire(&self, cancel: &CancellationToken, scan_id: Uuid) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                match permit {
                    Ok(p) => {
                        if self.closed.load(Ordering::SeqCst) {
                            drop(p);
                            return Err(Error::Shutdown);
                        }
                        self.active.insert(scan_id, p);
                        Ok(())
                    }
                    Err(_acquire_error) => Err(Error::Shutdown),
                }
            }
        }
    }

    /// Return `scan_id`'s slot. A no-op if `scan_id` holds no slot, so
    /// callers never need to track whether they actually acquired one.
    pub fn release(&self, scan_id: Uuid) {
        self.active.remove(&scan_id);
    }

    pub fn active_scans(&self) -> usize {
        self.active.len()
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Reject all future and pending acquires, and drop every
    /// outstanding permit, returning their slots to the semaphore.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.semaphore.close();
        self.active.clear();
    }
}
