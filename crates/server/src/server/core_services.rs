//! Constructs every long-lived component once and hands out shared handles.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::collector::{CollectorSettings, MetricsCollector, ServerHealthMonitor};
use crate::connections::ConnectionRegistry;
use crate::db::duckdb_service::{self, DuckDbMetricsStore, DuckDbServerRegistry};
use crate::db::DuckDbPool;
use crate::remote::{ConnectionResolver, RemoteContainerService, RemoteExecutor, SshExecutor};
use crate::server::config::ServerConfig;
use crate::services::{EncryptionError, EncryptionService, MetricsQueryService};

#[derive(Error, Debug)]
pub enum CoreServicesError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Encryption setup failed: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("Database setup failed: {0}")]
    Database(#[from] crate::db::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct CoreServices {
    pub config: Arc<ServerConfig>,
    pub servers: Arc<DuckDbServerRegistry>,
    pub metrics_store: Arc<DuckDbMetricsStore>,
    pub resolver: ConnectionResolver,
    pub containers: RemoteContainerService,
    pub connections: Arc<ConnectionRegistry>,
    pub metrics: MetricsQueryService,
    pub collector: Arc<MetricsCollector>,
    pub health_monitor: Arc<ServerHealthMonitor>,
}

impl CoreServices {
    /// Opens the DuckDB file under `data_dir` and wires the SSH executor.
    pub fn build(config: Arc<ServerConfig>) -> Result<Self, CoreServicesError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let pool = duckdb_service::open_file_pool(&config.database_path())?;
        let executor: Arc<dyn RemoteExecutor> =
            Arc::new(SshExecutor::new(config.ssh_connect_timeout()));
        Self::build_with_pool(config, pool, executor)
    }

    pub fn build_with_pool(
        config: Arc<ServerConfig>,
        pool: DuckDbPool,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Result<Self, CoreServicesError> {
        config.validate().map_err(CoreServicesError::Config)?;
        let encryption = Arc::new(EncryptionService::from_hex_key(&config.secret_encryption_key)?);

        let servers = Arc::new(DuckDbServerRegistry::new(pool.clone()));
        let metrics_store = Arc::new(DuckDbMetricsStore::new(pool));
        let resolver = ConnectionResolver::new(servers.clone(), encryption.clone());

        let containers = RemoteContainerService::new(
            resolver.clone(),
            executor.clone(),
            config.ssh_command_timeout(),
        );
        let connections = Arc::new(ConnectionRegistry::new(
            config.connections_path(),
            encryption,
            resolver.clone(),
            executor.clone(),
            config.ssh_command_timeout(),
        ));
        let metrics = MetricsQueryService::new(metrics_store.clone());
        let collector = Arc::new(MetricsCollector::new(
            servers.clone(),
            metrics_store.clone(),
            resolver.clone(),
            executor,
            CollectorSettings::from_config(&config),
        ));
        let health_monitor = Arc::new(ServerHealthMonitor::new(
            servers.clone(),
            config.health_check_interval(),
            config.ssh_connect_timeout(),
            config.max_concurrent_collections,
        ));

        info!(
            database = %config.database_path().display(),
            connections = %config.connections_path().display(),
            "Core services initialized."
        );

        Ok(Self {
            config,
            servers,
            metrics_store,
            resolver,
            containers,
            connections,
            metrics,
            collector,
            health_monitor,
        })
    }

    /// Starts the collector and the health monitor. Both exit once
    /// `shutdown_rx` reads `true`.
    pub fn spawn_background_tasks(&self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.collector.clone().run(shutdown_rx.clone())),
            tokio::spawn(self.health_monitor.clone().run(shutdown_rx)),
        ]
    }
}
