pub mod metrics_service;
pub mod server_service;

use chrono::{DateTime, Utc};
use duckdb::{Connection, DuckdbConnectionManager};
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};

pub use self::metrics_service::DuckDbMetricsStore;
pub use self::server_service::{DuckDbServerRegistry, NewManagedServer};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DuckDB(#[from] duckdb::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Blocking database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Not Found: {0}")]
    NotFound(String),
}

pub type DuckDbPool = r2d2::Pool<DuckdbConnectionManager>;

const POOL_SIZE: u32 = 8;

/// Opens (or creates) the DuckDB file and runs migrations.
pub fn open_file_pool(path: &Path) -> Result<DuckDbPool, Error> {
    info!(path = %path.display(), "Opening DuckDB database.");
    let manager = DuckdbConnectionManager::file(path)?;
    let pool = r2d2::Pool::builder().max_size(POOL_SIZE).build(manager)?;
    initialize_db(&pool)?;
    Ok(pool)
}

/// In-memory database shared by every pooled connection. Used by tests and
/// throwaway deployments.
pub fn open_memory_pool() -> Result<DuckDbPool, Error> {
    let manager = DuckdbConnectionManager::memory()?;
    let pool = r2d2::Pool::builder().max_size(2).build(manager)?;
    initialize_db(&pool)?;
    Ok(pool)
}

fn initialize_db(pool: &DuckDbPool) -> Result<(), Error> {
    let conn = pool.get()?;
    run_migrations(&conn)?;
    Ok(())
}

fn run_migrations(conn: &Connection) -> duckdb::Result<()> {
    info!("Running DuckDB migrations...");
    let migrations =
        include_str!("../../../duckdb_migrations/20260101000000_create_initial_tables.sql");
    conn.execute_batch(migrations).map_err(|e| {
        error!("Failed to execute DuckDB migrations: {}", e);
        e
    })?;
    info!("DuckDB migrations completed successfully.");
    Ok(())
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

// Byte counters are u64 in the model but BIGINT in the table.
pub(crate) fn bytes_to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn bytes_from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
