//! `ScanTarget` repository: full-table reconcile read and insert.

use crate::gateway::PersistenceGateway;
use scanorama_core::{Error, PortSpec, Result, ScanTarget, ScanType};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

impl PersistenceGateway {
    /// Insert a new `ScanTarget` row. Used both by the operator/API path
    /// and by the scheduler when materializing an ad-hoc target.
    ///
    /// The row stores the scan type the operator originally requested,
    /// not [`ScanType::persisted_value`]'s narrowed form — that narrowing
    /// models a constraint an external DB schema variant applies, not
    /// this gateway's own schema, so the scheduler and engine reading a
    /// row back see exactly what was written. `persisted_value` remains
    /// available for any external consumer that needs the narrower wire
    /// value.
    pub async fn create_scan_target(&self, target: &ScanTarget) -> Result<()> {
        target.validate()?;
        sqlx::query(
            "INSERT INTO scan_targets (id, name, network, ports, scan_type, scan_interval_seconds, enabled) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(target.id.to_string())
        .bind(&target.name)
        .bind(target.network.to_string())
        .bind(target.ports.to_string())
        .bind(target.scan_type.to_string())
        .bind(target.scan_interval_seconds)
        .bind(target.enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Full reconcile source for the Scheduler's periodic target refresh.
    /// Returns every target row, regardless of `enabled`; the caller
    /// decides scheduling eligibility.
    pub async fn get_all_scan_targets(&self) -> Result<Vec<ScanTarget>> {
        let rows = sqlx::query(
            "SELECT id, name, network, ports, scan_type, scan_interval_seconds, enabled FROM scan_targets",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_target).collect()
    }

    pub async fn get_scan_target(&self, id: Uuid) -> Result<Option<ScanTarget>> {
        let row = sqlx::query(
            "SELECT id, name, network, ports, scan_type, scan_interval_seconds, enabled \
             FROM scan_targets WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_target).transpose()
    }

    fn row_to_target(row: &sqlx::sqlite::SqliteRow) -> Result<ScanTarget> {
        let id: String = row.get("id");
        let network: String = row.get("network");
        let ports: String = row.get("ports");
        let scan_type: String = row.get("scan_type");

        Ok(ScanTarget {
            id: Uuid::from_str(&id).map_err(|e| Error::Parse(format!("bad target id: {e}")))?,
            name: row.get("name"),
            network: ScanTarget::parse_network(&network)?,
            ports: PortSpec::parse(&ports)?,
            scan_type: ScanType::from_str(&scan_type)?,
            scan_interval_seconds: row.get("scan_interval_seconds"),
            enabled: row.get("enabled"),
        })
    }
}
