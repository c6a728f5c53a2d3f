//! Connection management and schema initialization for the Persistence
//! Gateway: WAL journal mode, a short busy timeout, and idempotent
//! `CREATE TABLE IF NOT EXISTS`.

use scanorama_core::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Durable CRUD and the race-safe host upsert shared by the scan and
/// discovery pipelines.
#[derive(Clone)]
pub struct PersistenceGateway {
    pub(crate) pool: SqlitePool,
}

impl PersistenceGateway {
    /// Open (and create if missing) a SQLite database at `path`. Use
    /// `":memory:"` for an ephemeral in-process database (test fixtures).
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path_str}"))
            .map_err(|e| Error::DatabaseConnection(format!("invalid database path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::DatabaseConnection(format!("failed to open database: {e}")))?;

        info!(path = %path_str, "connected to persistence database");

        let gateway = Self { pool };
        gateway.init_schema().await?;
        Ok(gateway)
    }

    async fn init_schema(&self) -> Result<()> {
        debug!("initializing persistence schema");

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .ok();
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await
            .ok();

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_targets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                network TEXT NOT NULL,
                ports TEXT NOT NULL,
                scan_type TEXT NOT NULL,
                scan_interval_seconds INTEGER NOT NULL,
                enabled INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_jobs (
                job_id TEXT PRIMARY KEY,
                target_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                stats_json TEXT,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
                id TEXT PRIMARY KEY,
                ip TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                discovery_method TEXT,
                discovery_response_time_ms INTEGER,
                discovery_count INTEGER NOT NULL DEFAULT 0,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                os_name TEXT,
                os_confidence INTEGER,
                ignore_scanning INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS port_scans (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                host_id TEXT NOT NULL,
                port INTEGER NOT NULL,
                protocol TEXT NOT NULL,
                state TEXT NOT NULL,
                service_name TEXT,
                service_version TEXT,
                service_product TEXT,
                UNIQUE(job_id, host_id, port, protocol),
                FOREIGN KEY (host_id) REFERENCES hosts(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_port_scans_job ON port_scans(job_id)")
            .execute(&self.pool)
            .await
            .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_scan_jobs_target ON scan_jobs(target_id)")
            .execute(&self.pool)
            .await
            .ok();

        debug!("persistence schema ready");
        Ok(())
    }
}
