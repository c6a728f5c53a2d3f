//! `Host` repository and the race-safe host upsert — the hardest
//! contract in the gateway: a scan-originated write must never clobber
//! the discovery-origin fields an independent discovery pipeline owns.

use crate::gateway::PersistenceGateway;
use chrono::{DateTime, Utc};
use scanorama_core::{Error, Host, HostStatus, Result};
use sqlx::error::DatabaseError;
use sqlx::Row;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bounded retry for the host upsert: absorbs brief read-write skew
/// between the discovery and scan pipelines on eventually-consistent
/// setups.
const UPSERT_ATTEMPTS: u32 = 3;
const UPSERT_RETRY_DELAY: Duration = Duration::from_millis(100);

impl PersistenceGateway {
    pub async fn get_host_by_ip(&self, ip: IpAddr) -> Result<Option<Host>> {
        let row = sqlx::query(
            "SELECT id, ip, status, discovery_method, discovery_response_time_ms, \
             discovery_count, first_seen, last_seen, os_name, os_confidence, ignore_scanning \
             FROM hosts WHERE ip = ?",
        )
        .bind(ip.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_host).transpose()
    }

    pub async fn get_host_by_id(&self, id: Uuid) -> Result<Option<Host>> {
        let row = sqlx::query(
            "SELECT id, ip, status, discovery_method, discovery_response_time_ms, \
             discovery_count, first_seen, last_seen, os_name, os_confidence, ignore_scanning \
             FROM hosts WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_host).transpose()
    }

    /// `CreateOrUpdateHost`: the race-safe host upsert.
    ///
    /// 1. In a short read transaction, select the host by IP.
    /// 2. If found: commit, update only `status`/`last_seen`, return it.
    /// 3. If not found: roll back the read, then attempt an insert.
    ///    A unique-violation on that insert means the discovery pipeline
    ///    won the race between our read and our write; re-read and
    ///    retry rather than error.
    /// 4. The whole dance is retried up to [`UPSERT_ATTEMPTS`] times,
    ///    spaced by [`UPSERT_RETRY_DELAY`].
    pub async fn create_or_update_host(
        &self,
        ip: IpAddr,
        status: HostStatus,
        seen_at: DateTime<Utc>,
    ) -> Result<Host> {
        for attempt in 1..=UPSERT_ATTEMPTS {
            let mut tx = self.pool.begin().await?;
            let existing = sqlx::query(
                "SELECT id, ip, status, discovery_method, discovery_response_time_ms, \
                 discovery_count, first_seen, last_seen, os_name, os_confidence, ignore_scanning \
                 FROM hosts WHERE ip = ?",
            )
            .bind(ip.to_string())
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = existing {
                tx.commit().await?;
                let mut host = row_to_host(&row)?;
                host.apply_scan_update(status, seen_at);
                sqlx::query("UPDATE hosts SET status = ?, last_seen = ? WHERE id = ?")
                    .bind(status.to_string())
                    .bind(seen_at.to_rfc3339())
                    .bind(host.id.to_string())
                    .execute(&self.pool)
                    .await?;
                return Ok(host);
            }
            tx.rollback().await?;

            let new_host = Host::new_from_scan(ip, status, seen_at);
            let insert = sqlx::query(
                "INSERT INTO hosts \
                 (id, ip, status, discovery_method, discovery_response_time_ms, discovery_count, \
                  first_seen, last_seen, os_name, os_confidence, ignore_scanning) \
                 VALUES (?, ?, ?, NULL, NULL, 0, ?, ?, NULL, NULL, 0)",
            )
            .bind(new_host.id.to_string())
            .bind(ip.to_string())
            .bind(status.to_string())
            .bind(seen_at.to_rfc3339())
            .bind(seen_at.to_rfc3339())
            .execute(&self.pool)
            .await;

            match insert {
                Ok(_) => return Ok(new_host),
                Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                    warn!(
                        %ip,
                        attempt,
                        "host upsert raced with a concurrent insert, retrying"
                    );
                    tokio::time::sleep(UPSERT_RETRY_DELAY).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::DatabaseQuery(format!(
            "host upsert for {ip} did not converge after {UPSERT_ATTEMPTS} attempts"
        )))
    }

    /// Insert a host row the way the discovery subsystem would:
    /// populating the discovery-origin fields the scan path must never
    /// touch. Exists so the race-safe upsert's concurrent-write behavior
    /// is exercisable from outside this crate without reaching into
    /// private pool internals.
    pub async fn create_discovered_host(
        &self,
        ip: IpAddr,
        discovery_method: &str,
        discovery_response_time_ms: i64,
        seen_at: DateTime<Utc>,
    ) -> Result<Host> {
        let host = Host {
            id: Uuid::new_v4(),
            ip,
            status: HostStatus::Up,
            discovery_method: Some(discovery_method.to_string()),
            discovery_response_time_ms: Some(discovery_response_time_ms),
            discovery_count: 1,
            first_seen: seen_at,
            last_seen: seen_at,
            os_name: None,
            os_confidence: None,
            ignore_scanning: false,
        };
        sqlx::query(
            "INSERT INTO hosts \
             (id, ip, status, discovery_method, discovery_response_time_ms, discovery_count, \
              first_seen, last_seen, os_name, os_confidence, ignore_scanning) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, 0)",
        )
        .bind(host.id.to_string())
        .bind(ip.to_string())
        .bind(host.status.to_string())
        .bind(&host.discovery_method)
        .bind(host.discovery_response_time_ms)
        .bind(host.discovery_count)
        .bind(seen_at.to_rfc3339())
        .bind(seen_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(host)
    }

    /// Verify the host row exists by id before the Result Sink emits any
    /// `PortScan` rows for it.
    pub async fn verify_host_exists(&self, host_id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM hosts WHERE id = ?")
            .bind(host_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        debug!(%host_id, found = row.is_some(), "host verification");
        Ok(row.is_some())
    }
}

fn row_to_host(row: &sqlx::sqlite::SqliteRow) -> Result<Host> {
    let id: String = row.get("id");
    let ip: String = row.get("ip");
    let status: String = row.get("status");
    let first_seen: String = row.get("first_seen");
    let last_seen: String = row.get("last_seen");

    Ok(Host {
        id: Uuid::from_str(&id).map_err(|e| Error::Parse(format!("bad host id: {e}")))?,
        ip: IpAddr::from_str(&ip)?,
        status: parse_host_status(&status)?,
        discovery_method: row.get("discovery_method"),
        discovery_response_time_ms: row.get("discovery_response_time_ms"),
        discovery_count: row.get("discovery_count"),
        first_seen: parse_rfc3339(&first_seen)?,
        last_seen: parse_rfc3339(&last_seen)?,
        os_name: row.get("os_name"),
        os_confidence: row.get("os_confidence"),
        ignore_scanning: row.get("ignore_scanning"),
    })
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Parse(format!("bad timestamp: {e}")))
}

fn parse_host_status(s: &str) -> Result<HostStatus> {
    match s {
        "up" => Ok(HostStatus::Up),
        "down" => Ok(HostStatus::Down),
        "filtered" => Ok(HostStatus::Filtered),
        other => Err(Error::Parse(format!("unknown host status: {other}"))),
    }
}
