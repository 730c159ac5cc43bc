use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Advisory reachability state of a managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Online,
    Offline,
    Unknown,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Online => "online",
            ServerStatus::Offline => "offline",
            ServerStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for ServerStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(ServerStatus::Online),
            "offline" => Ok(ServerStatus::Offline),
            "unknown" => Ok(ServerStatus::Unknown),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A supervised host. Source of truth for which servers the collector polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServer {
    pub id: i32,
    pub name: String,
    pub host: String,
    pub ssh_port: u16,
    pub ssh_username: String,
    /// Hex encoded AES-GCM ciphertext of the SSH password.
    pub ssh_password_encrypted: Option<String>,
    pub ssh_key_path: Option<String>,
    pub status: ServerStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Credentials of a saved connection profile. Only one secret form can exist
/// for a given auth method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "authMethod", rename_all = "camelCase")]
pub enum ConnectionAuth {
    #[serde(rename_all = "camelCase")]
    Password { encrypted_password: String },
    #[serde(rename_all = "camelCase")]
    PrivateKey { key_path: String },
}

impl ConnectionAuth {
    pub fn method_name(&self) -> &'static str {
        match self {
            ConnectionAuth::Password { .. } => "password",
            ConnectionAuth::PrivateKey { .. } => "privateKey",
        }
    }
}

/// A saved SSH connection profile owned by the connection registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConnection {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: ConnectionAuth,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One immutable per-container observation taken during a collection tick.
/// Unique on `(server_id, container_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMetricSample {
    pub server_id: i32,
    pub container_id: String,
    pub container_name: String,
    pub timestamp: DateTime<Utc>,
    pub cpu_percentage: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub memory_percentage: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
}

/// Projection of a `docker ps` row. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteContainer {
    pub id: String,
    pub name: String,
    pub status: String,
    pub image: String,
    pub server_id: i32,
}

/// Point-in-time stats for one container, returned to the caller as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    pub container_id: String,
    pub cpu_percentage: f64,
    pub memory_usage: String,
    pub memory_percentage: f64,
    pub network_io: String,
    pub block_io: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate of one server's newest collection tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetricsSummary {
    pub server_id: i32,
    pub timestamp: DateTime<Utc>,
    pub container_count: usize,
    pub total_cpu_percentage: f64,
    pub total_memory_usage_bytes: u64,
    pub total_network_rx_bytes: u64,
    pub total_network_tx_bytes: u64,
}
