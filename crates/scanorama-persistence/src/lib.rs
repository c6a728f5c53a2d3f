//! Persistence Gateway: durable CRUD for `ScanTarget`, `ScanJob`, `Host`,
//! and `PortScan` rows, plus the race-safe host upsert that keeps the
//! scan and discovery pipelines from clobbering each other.
//!
//! Built on `sqlx`'s SQLite driver: WAL journal mode, a single
//! connection pool, transaction-scoped batch writes.

mod gateway;
mod hosts;
mod jobs;
mod port_scans;
mod targets;

pub use gateway::PersistenceGateway;
