use fleetdock_common::{ConnectionAuth, ManagedServer, ServerConnection};
use std::path::PathBuf;
use std::sync::Arc;

use super::error::RemoteError;
use super::executor::{ConnectionInfo, SshAuth};
use crate::db::ServerRegistry;
use crate::services::encryption_service::EncryptionService;

/// Turns stored server records into ready-to-use SSH credentials.
#[derive(Clone)]
pub struct ConnectionResolver {
    servers: Arc<dyn ServerRegistry>,
    encryption: Arc<EncryptionService>,
}

impl ConnectionResolver {
    pub fn new(servers: Arc<dyn ServerRegistry>, encryption: Arc<EncryptionService>) -> Self {
        Self {
            servers,
            encryption,
        }
    }

    pub async fn resolve_server(&self, server_id: i32) -> Result<ConnectionInfo, RemoteError> {
        let server = self
            .servers
            .get_server(server_id)
            .await?
            .ok_or_else(|| RemoteError::NotFound(format!("server {server_id}")))?;
        Ok(self.for_managed_server(&server))
    }

    /// A configured key path wins over a stored password.
    pub fn for_managed_server(&self, server: &ManagedServer) -> ConnectionInfo {
        let auth = match (&server.ssh_key_path, &server.ssh_password_encrypted) {
            (Some(path), _) if !path.trim().is_empty() => SshAuth::PrivateKey(PathBuf::from(path)),
            (_, Some(encrypted)) => SshAuth::Password(self.encryption.decrypt_or_empty(encrypted)),
            _ => SshAuth::Password(String::new()),
        };
        ConnectionInfo {
            host: server.host.clone(),
            port: server.ssh_port,
            username: server.ssh_username.clone(),
            auth,
        }
    }

    pub fn for_connection(&self, connection: &ServerConnection) -> ConnectionInfo {
        let auth = match &connection.auth {
            ConnectionAuth::Password { encrypted_password } => {
                SshAuth::Password(self.encryption.decrypt_or_empty(encrypted_password))
            }
            ConnectionAuth::PrivateKey { key_path } => SshAuth::PrivateKey(PathBuf::from(key_path)),
        };
        ConnectionInfo {
            host: connection.host.clone(),
            port: connection.port,
            username: connection.username.clone(),
            auth,
        }
    }
}
