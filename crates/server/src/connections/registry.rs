//! Saved SSH connection profiles, persisted as a single JSON document.

use chrono::Utc;
use fleetdock_common::{ConnectionAuth, ServerConnection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::remote::{commands, ConnectionInfo, ConnectionResolver, RemoteExecutor, SshAuth};
use crate::services::encryption_service::{EncryptionError, EncryptionService};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Connections file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connections file is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),
}

/// Plaintext credential supplied by the caller. Passwords are encrypted
/// before they reach disk.
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionSecret {
    Password(String),
    PrivateKey(String),
}

impl fmt::Debug for ConnectionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionSecret::Password(_) => f.write_str("Password(<redacted>)"),
            ConnectionSecret::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewConnection {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: ConnectionSecret,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub secret: Option<ConnectionSecret>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConnectionsFile {
    #[serde(default)]
    connections: Vec<ServerConnection>,
}

fn require_non_empty(field: &str, value: &str) -> Result<(), RegistryError> {
    if value.trim().is_empty() {
        return Err(RegistryError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_port(port: u16) -> Result<(), RegistryError> {
    if port == 0 {
        return Err(RegistryError::InvalidInput("port must be between 1 and 65535".to_string()));
    }
    Ok(())
}

pub struct ConnectionRegistry {
    path: PathBuf,
    // Serialises every read and read-modify-write of `path`.
    lock: Mutex<()>,
    encryption: Arc<EncryptionService>,
    resolver: ConnectionResolver,
    executor: Arc<dyn RemoteExecutor>,
    test_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(
        path: impl Into<PathBuf>,
        encryption: Arc<EncryptionService>,
        resolver: ConnectionResolver,
        executor: Arc<dyn RemoteExecutor>,
        test_timeout: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            encryption,
            resolver,
            executor,
            test_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<ConnectionsFile, RegistryError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ConnectionsFile::default()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(ConnectionsFile::default());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    /// Writes next to the target and renames over it so readers never see a
    /// half-written file.
    async fn save(&self, file: &ConnectionsFile) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let json = serde_json::to_vec_pretty(file)?;
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        debug!(path = %self.path.display(), count = file.connections.len(), "Connections file saved.");
        Ok(())
    }

    fn encode_secret(&self, secret: &ConnectionSecret) -> Result<ConnectionAuth, RegistryError> {
        Ok(match secret {
            ConnectionSecret::Password(password) => ConnectionAuth::Password {
                encrypted_password: self.encryption.encrypt(password)?,
            },
            ConnectionSecret::PrivateKey(key_path) => {
                require_non_empty("key path", key_path)?;
                ConnectionAuth::PrivateKey {
                    key_path: key_path.clone(),
                }
            }
        })
    }

    pub async fn list(&self) -> Result<Vec<ServerConnection>, RegistryError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.connections)
    }

    pub async fn get(&self, id: &str) -> Result<ServerConnection, RegistryError> {
        let _guard = self.lock.lock().await;
        self.load()
            .await?
            .connections
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| RegistryError::NotFound(format!("connection {id}")))
    }

    pub async fn add(&self, input: NewConnection) -> Result<ServerConnection, RegistryError> {
        require_non_empty("name", &input.name)?;
        require_non_empty("host", &input.host)?;
        require_non_empty("username", &input.username)?;
        validate_port(input.port)?;
        let auth = self.encode_secret(&input.secret)?;

        let connection = ServerConnection {
            id: Uuid::new_v4().to_string(),
            name: input.name.trim().to_string(),
            host: input.host.trim().to_string(),
            port: input.port,
            username: input.username.trim().to_string(),
            auth,
            last_connected_at: None,
            created_at: Utc::now(),
        };

        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        file.connections.push(connection.clone());
        self.save(&file).await?;
        info!(connection_id = %connection.id, host = %connection.host, auth = connection.auth.method_name(), "Connection profile added.");
        Ok(connection)
    }

    pub async fn update(&self, id: &str, changes: ConnectionUpdate) -> Result<ServerConnection, RegistryError> {
        let auth = changes
            .secret
            .as_ref()
            .map(|secret| self.encode_secret(secret))
            .transpose()?;

        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        let connection = file
            .connections
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RegistryError::NotFound(format!("connection {id}")))?;

        if let Some(name) = changes.name {
            require_non_empty("name", &name)?;
            connection.name = name.trim().to_string();
        }
        if let Some(host) = changes.host {
            require_non_empty("host", &host)?;
            connection.host = host.trim().to_string();
        }
        if let Some(port) = changes.port {
            validate_port(port)?;
            connection.port = port;
        }
        if let Some(username) = changes.username {
            require_non_empty("username", &username)?;
            connection.username = username.trim().to_string();
        }
        if let Some(auth) = auth {
            connection.auth = auth;
        }

        let updated = connection.clone();
        self.save(&file).await?;
        info!(connection_id = %id, "Connection profile updated.");
        Ok(updated)
    }

    /// Returns `false` when no profile had this id.
    pub async fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        let before = file.connections.len();
        file.connections.retain(|c| c.id != id);
        if file.connections.len() == before {
            return Ok(false);
        }
        self.save(&file).await?;
        info!(connection_id = %id, "Connection profile deleted.");
        Ok(true)
    }

    /// Runs the probe command against a saved profile. A host that accepts
    /// the login counts as reachable even when docker itself fails.
    pub async fn test_connection(&self, id: &str) -> Result<bool, RegistryError> {
        let connection = self.get(id).await?;
        let target = self.resolver.for_connection(&connection);
        if !self.probe(&target).await {
            return Ok(false);
        }

        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        if let Some(stored) = file.connections.iter_mut().find(|c| c.id == id) {
            stored.last_connected_at = Some(Utc::now());
            self.save(&file).await?;
        }
        Ok(true)
    }

    /// Same check for a profile that has not been saved yet.
    pub async fn test_connection_profile(&self, input: &NewConnection) -> bool {
        let auth = match &input.secret {
            ConnectionSecret::Password(password) => SshAuth::Password(password.clone()),
            ConnectionSecret::PrivateKey(key_path) => SshAuth::PrivateKey(PathBuf::from(key_path)),
        };
        let target = ConnectionInfo {
            host: input.host.trim().to_string(),
            port: input.port,
            username: input.username.trim().to_string(),
            auth,
        };
        self.probe(&target).await
    }

    async fn probe(&self, target: &ConnectionInfo) -> bool {
        match self
            .executor
            .execute(target, commands::CONNECTION_PROBE, self.test_timeout)
            .await
        {
            Ok(output) => {
                if !output.success() {
                    debug!(endpoint = %target.endpoint(), status = output.exit_status, "Probe command exited non-zero.");
                }
                true
            }
            Err(e) if e.is_unreachable() => {
                warn!(endpoint = %target.endpoint(), error = %e, "Connection test could not reach host.");
                false
            }
            Err(e) => {
                warn!(endpoint = %target.endpoint(), error = %e, "Connection test failed after login.");
                false
            }
        }
    }
}
