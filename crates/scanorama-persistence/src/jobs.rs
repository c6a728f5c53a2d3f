//! `ScanJob` repository: create, status update, and lookup.

use crate::gateway::PersistenceGateway;
use chrono::{DateTime, Utc};
use scanorama_core::{Error, JobStatus, Result, ScanJob, ScanStats};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

impl PersistenceGateway {
    /// Insert a new `ScanJob` row with `status = Pending`, mirroring the
    /// in-memory `Job` the Worker Pool just created.
    pub async fn create_scan_job(&self, job_id: Uuid, target_id: Uuid) -> Result<ScanJob> {
        let job = ScanJob::new_pending(job_id, target_id);
        sqlx::query(
            "INSERT INTO scan_jobs (job_id, target_id, status, started_at, completed_at, stats_json, error_message) \
             VALUES (?, ?, ?, NULL, NULL, NULL, NULL)",
        )
        .bind(job_id.to_string())
        .bind(target_id.to_string())
        .bind(job.status.to_string())
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    /// Transition a job's persisted status. `started_at`/`completed_at`
    /// are kept monotonic per [`ScanJob::transition`]'s rules.
    pub async fn update_scan_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        stats: Option<ScanStats>,
        error_message: Option<String>,
    ) -> Result<()> {
        let mut job = self
            .get_scan_job(job_id)
            .await?
            .ok_or_else(|| Error::DatabaseQuery(format!("unknown job {job_id}")))?;

        let now = Utc::now();
        job.transition(status, now);
        job.stats = stats;
        job.error_message = error_message;

        let stats_json = job
            .stats
            .map(|s| serde_json::to_string(&s))
            .transpose()?;

        sqlx::query(
            "UPDATE scan_jobs SET status = ?, started_at = ?, completed_at = ?, stats_json = ?, error_message = ? \
             WHERE job_id = ?",
        )
        .bind(job.status.to_string())
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.completed_at.map(|t| t.to_rfc3339()))
        .bind(stats_json)
        .bind(job.error_message)
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_scan_job(&self, job_id: Uuid) -> Result<Option<ScanJob>> {
        let row = sqlx::query(
            "SELECT job_id, target_id, status, started_at, completed_at, stats_json, error_message \
             FROM scan_jobs WHERE job_id = ?",
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let status: String = row.get("status");
        let started_at: Option<String> = row.get("started_at");
        let completed_at: Option<String> = row.get("completed_at");
        let stats_json: Option<String> = row.get("stats_json");
        let target_id: String = row.get("target_id");

        Ok(Some(ScanJob {
            job_id,
            target_id: Uuid::from_str(&target_id)
                .map_err(|e| Error::Parse(format!("bad target id: {e}")))?,
            status: parse_job_status(&status)?,
            started_at: started_at.map(|s| parse_rfc3339(&s)).transpose()?,
            completed_at: completed_at.map(|s| parse_rfc3339(&s)).transpose()?,
            stats: stats_json
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            error_message: row.get("error_message"),
        }))
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Parse(format!("bad timestamp: {e}")))
}

fn parse_job_status(s: &str) -> Result<JobStatus> {
    match s {
        "pending" => Ok(JobStatus::Pending),
        "running" => Ok(JobStatus::Running),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        other => Err(Error::Parse(format!("unknown job status: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn gateway() -> PersistenceGateway {
        PersistenceGateway::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_job_starts_pending() {
        let gw = gateway().await;
        let job_id = Uuid::new_v4();
        let target_id = Uuid::new_v4();
        gw.create_scan_job(job_id, target_id).await.unwrap();

        let job = gw.get_scan_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[tokio::test]
    async fn transition_to_running_then_completed_sets_timestamps() {
        let gw = gateway().await;
        let job_id = Uuid::new_v4();
        gw.create_scan_job(job_id, Uuid::new_v4()).await.unwrap();

        gw.update_scan_job_status(job_id, JobStatus::Running, None, None)
            .await
            .unwrap();
        let running = gw.get_scan_job(job_id).await.unwrap().unwrap();
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        let stats = ScanStats {
            hosts_up: 2,
            hosts_down: 0,
            total_hosts: 2,
            duration_seconds: 5,
        };
        gw.update_scan_job_status(job_id, JobStatus::Completed, Some(stats), None)
            .await
            .unwrap();
        let completed = gw.get_scan_job(job_id).await.unwrap().unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(completed.stats, Some(stats));
    }

    #[tokio::test]
    async fn failed_job_carries_error_message() {
        let gw = gateway().await;
        let job_id = Uuid::new_v4();
        gw.create_scan_job(job_id, Uuid::new_v4()).await.unwrap();

        gw.update_scan_job_status(
            job_id,
            JobStatus::Failed,
            None,
            Some("scan failed: timeout".to_string()),
        )
        .await
        .unwrap();

        let job = gw.get_scan_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("scan failed: timeout"));
    }

    #[tokio::test]
    async fn updating_unknown_job_is_an_error() {
        let gw = gateway().await;
        let err = gw
            .update_scan_job_status(Uuid::new_v4(), JobStatus::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DatabaseQuery(_)));
    }
}
