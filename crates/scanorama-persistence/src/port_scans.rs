//! `PortScan` repository: batch insert for a completed job's results,
//! one transaction, chunked multi-row `INSERT ... VALUES` to stay under
//! SQLite's 999-parameter limit.

use crate::gateway::PersistenceGateway;
use scanorama_core::{PortScan, Result};
use uuid::Uuid;

/// Rows per multi-row INSERT. Each row binds 9 parameters; 100 rows
/// keeps every statement comfortably under SQLite's 999-parameter cap.
const ROWS_PER_STATEMENT: usize = 100;

impl PersistenceGateway {
    /// Insert every `PortScan` row for one job's result in a single
    /// transaction. `ON CONFLICT DO NOTHING` makes the whole batch
    /// idempotent against the `(job, host, port, protocol)` uniqueness
    /// constraint, so a retried batch after a partial prior failure
    /// can't duplicate rows.
    ///
    /// A partial batch failure fails the whole result storage for that
    /// job. The caller (Result Sink) is responsible for the deliberate
    /// asymmetry of still marking the scan itself completed.
    pub async fn batch_create_port_scans(&self, rows: &[PortScan]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for chunk in rows.chunks(ROWS_PER_STATEMENT) {
            let placeholders: Vec<&str> = chunk.iter().map(|_| "(?, ?, ?, ?, ?, ?, ?, ?, ?)").collect();
            let query_str = format!(
                "INSERT INTO port_scans \
                 (id, job_id, host_id, port, protocol, state, service_name, service_version, service_product) \
                 VALUES {} ON CONFLICT(job_id, host_id, port, protocol) DO NOTHING",
                placeholders.join(", ")
            );

            let mut query = sqlx::query(&query_str);
            for row in chunk {
                query = query
                    .bind(row.id.to_string())
                    .bind(row.job_id.to_string())
                    .bind(row.host_id.to_string())
                    .bind(row.port as i64)
                    .bind(row.protocol.to_string())
                    .bind(row.state.to_string())
                    .bind(row.service_name.clone())
                    .bind(row.service_version.clone())
                    .bind(row.service_product.clone());
            }

            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Count of `PortScan` rows stored for a job, used by tests and the
    /// stats endpoint to cross-check that a completed job's batch write
    /// landed in full.
    pub async fn count_port_scans_for_job(&self, job_id: Uuid) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM port_scans WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanorama_core::{PortState, Protocol};

    async fn gateway() -> PersistenceGateway {
        PersistenceGateway::open(":memory:").await.unwrap()
    }

    fn row(job_id: Uuid, host_id: Uuid, port: u16) -> PortScan {
        PortScan {
            id: Uuid::new_v4(),
            job_id,
            host_id,
            port,
            protocol: Protocol::Tcp,
            state: PortState::Open,
            service_name: None,
            service_version: None,
            service_product: None,
        }
    }

    #[tokio::test]
    async fn batch_insert_stores_all_rows() {
        let gw = gateway().await;
        let job_id = Uuid::new_v4();
        let host_id = Uuid::new_v4();
        let rows = vec![row(job_id, host_id, 80), row(job_id, host_id, 443), row(job_id, host_id, 8080)];

        gw.batch_create_port_scans(&rows).await.unwrap();
        assert_eq!(gw.count_port_scans_for_job(job_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let gw = gateway().await;
        gw.batch_create_port_scans(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn repeated_batch_is_idempotent() {
        let gw = gateway().await;
        let job_id = Uuid::new_v4();
        let host_id = Uuid::new_v4();
        let rows = vec![row(job_id, host_id, 80)];

        gw.batch_create_port_scans(&rows).await.unwrap();
        gw.batch_create_port_scans(&rows).await.unwrap();
        assert_eq!(gw.count_port_scans_for_job(job_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn large_batch_spans_multiple_chunks() {
        let gw = gateway().await;
        let job_id = Uuid::new_v4();
        let host_id = Uuid::new_v4();
        let rows: Vec<PortScan> = (0u16..250).map(|p| row(job_id, host_id, p)).collect();

        gw.batch_create_port_scans(&rows).await.unwrap();
        assert_eq!(gw.count_port_scans_for_job(job_id).await.unwrap(), 250);
    }
}
