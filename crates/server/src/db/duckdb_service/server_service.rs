use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{params, Connection, Row, ToSql};
use fleetdock_common::{ManagedServer, ServerStatus};
use tracing::debug;

use super::{millis_to_datetime, DuckDbPool, Error};
use crate::db::stores::ServerRegistry;

/// Input for provisioning a managed server. The password, if any, must
/// already be encrypted.
#[derive(Debug, Clone)]
pub struct NewManagedServer {
    pub name: String,
    pub host: String,
    pub ssh_port: u16,
    pub ssh_username: String,
    pub ssh_password_encrypted: Option<String>,
    pub ssh_key_path: Option<String>,
}

fn row_to_server(row: &Row<'_>) -> Result<ManagedServer, duckdb::Error> {
    let port: i32 = row.get("ssh_port")?;
    let status: String = row.get("status")?;
    let last_checked_at: Option<i64> = row.get("last_checked_at")?;
    Ok(ManagedServer {
        id: row.get("id")?,
        name: row.get("name")?,
        host: row.get("host")?,
        ssh_port: u16::try_from(port).unwrap_or(22),
        ssh_username: row.get("ssh_username")?,
        ssh_password_encrypted: row.get("ssh_password_encrypted")?,
        ssh_key_path: row.get("ssh_key_path")?,
        status: status.parse().unwrap_or(ServerStatus::Unknown),
        last_checked_at: last_checked_at.map(millis_to_datetime),
    })
}

fn query_servers(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<ManagedServer>, duckdb::Error> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, row_to_server)?;
    let servers = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(servers)
}

/// Server registry backed by the `managed_servers` table.
#[derive(Clone)]
pub struct DuckDbServerRegistry {
    pool: DuckDbPool,
}

impl DuckDbServerRegistry {
    pub fn new(pool: DuckDbPool) -> Self {
        Self { pool }
    }

    pub async fn create_server(&self, new_server: NewManagedServer) -> Result<ManagedServer, Error> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<ManagedServer, Error> {
            let conn = pool.get()?;
            let now = Utc::now();
            let id: i32 = conn.query_row(
                "INSERT INTO managed_servers (name, host, ssh_port, ssh_username, ssh_password_encrypted, ssh_key_path, status, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
                params![
                    new_server.name,
                    new_server.host,
                    i32::from(new_server.ssh_port),
                    new_server.ssh_username,
                    new_server.ssh_password_encrypted,
                    new_server.ssh_key_path,
                    ServerStatus::Unknown.as_str(),
                    now.timestamp_millis(),
                ],
                |row| row.get(0),
            )?;
            debug!(server_id = id, host = %new_server.host, "Managed server created.");

            Ok(ManagedServer {
                id,
                name: new_server.name,
                host: new_server.host,
                ssh_port: new_server.ssh_port,
                ssh_username: new_server.ssh_username,
                ssh_password_encrypted: new_server.ssh_password_encrypted,
                ssh_key_path: new_server.ssh_key_path,
                status: ServerStatus::Unknown,
                last_checked_at: None,
            })
        })
        .await?
    }
}

#[async_trait]
impl ServerRegistry for DuckDbServerRegistry {
    async fn list_servers(&self, filter: Option<ServerStatus>) -> Result<Vec<ManagedServer>, Error> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ManagedServer>, Error> {
            let conn = pool.get()?;
            let servers = match filter {
                Some(status) => query_servers(
                    &conn,
                    "SELECT * FROM managed_servers WHERE status = ? ORDER BY id",
                    params![status.as_str()],
                )?,
                None => query_servers(&conn, "SELECT * FROM managed_servers ORDER BY id", params![])?,
            };
            Ok(servers)
        })
        .await?
    }

    async fn get_server(&self, server_id: i32) -> Result<Option<ManagedServer>, Error> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<ManagedServer>, Error> {
            let conn = pool.get()?;
            let mut servers =
                query_servers(&conn, "SELECT * FROM managed_servers WHERE id = ?", params![server_id])?;
            Ok(servers.pop())
        })
        .await?
    }

    async fn update_status(
        &self,
        server_id: i32,
        status: ServerStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<(), Error> {
            let conn = pool.get()?;
            let rows_affected = conn.execute(
                "UPDATE managed_servers SET status = ?, last_checked_at = ? WHERE id = ?",
                params![status.as_str(), checked_at.timestamp_millis(), server_id],
            )?;
            if rows_affected == 0 {
                return Err(Error::NotFound(format!("managed server {server_id}")));
            }
            Ok(())
        })
        .await?
    }
}
