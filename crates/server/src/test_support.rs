//! Builders and scripted doubles shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetdock_common::{ContainerMetricSample, ManagedServer, ServerStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::db::duckdb_service::open_memory_pool;
use crate::db::memory::InMemoryMetricsStore;
use crate::db::{Error, MetricsStore, ServerRegistry};
use crate::remote::{CommandOutput, ConnectionInfo, RemoteError, RemoteExecutor};
use crate::services::encryption_service::EncryptionService;

pub(crate) const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

pub(crate) fn encryption() -> Arc<EncryptionService> {
    Arc::new(EncryptionService::from_hex_key(KEY_HEX).unwrap())
}

pub(crate) fn sample(server_id: i32, container_id: &str, timestamp: DateTime<Utc>) -> ContainerMetricSample {
    ContainerMetricSample {
        server_id,
        container_id: container_id.to_string(),
        container_name: format!("{container_id}-name"),
        timestamp,
        cpu_percentage: 12.5,
        memory_usage_bytes: 1024 * 1024,
        memory_limit_bytes: 8 * 1024 * 1024,
        memory_percentage: 12.5,
        network_rx_bytes: 2048,
        network_tx_bytes: 4096,
        block_read_bytes: 0,
        block_write_bytes: 512,
    }
}

pub(crate) fn managed_server(id: i32, host: &str, status: ServerStatus) -> ManagedServer {
    ManagedServer {
        id,
        name: format!("server-{id}"),
        host: host.to_string(),
        ssh_port: 22,
        ssh_username: "root".to_string(),
        ssh_password_encrypted: None,
        ssh_key_path: None,
        status,
        last_checked_at: None,
    }
}

/// A port on loopback that nothing listens on.
pub(crate) fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Output(CommandOutput),
    ConnectFailure,
    Timeout,
}

impl Scripted {
    pub(crate) fn stdout(text: &str) -> Self {
        Scripted::Output(CommandOutput {
            stdout: text.to_string(),
            stderr: String::new(),
            exit_status: 0,
        })
    }
}

/// Executor double that answers per host and records what it was asked.
pub(crate) struct ScriptedExecutor {
    responses: HashMap<String, Scripted>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    commands: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    pub(crate) fn new() -> Self {
        Self {
            responses: HashMap::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn respond(mut self, host: &str, response: Scripted) -> Self {
        self.responses.insert(host.to_string(), response);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        target: &ConnectionInfo,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.commands
            .lock()
            .unwrap()
            .push((target.host.clone(), command.to_string()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.responses.get(&target.host) {
            Some(Scripted::Output(output)) => Ok(output.clone()),
            Some(Scripted::ConnectFailure) => {
                Err(RemoteError::Connect(format!("{}: connection refused", target.host)))
            }
            Some(Scripted::Timeout) => Err(RemoteError::CommandTimeout(timeout)),
            None => Ok(CommandOutput::default()),
        }
    }
}

/// A genuine DuckDB error, from querying a table that does not exist.
pub(crate) fn store_error() -> Error {
    let pool = open_memory_pool().unwrap();
    let conn = pool.get().unwrap();
    conn.execute_batch("SELECT * FROM missing_table").unwrap_err().into()
}

/// Metrics store whose writes and deletes can be made to fail. Reads and
/// the operations left working go to an in-memory store.
pub(crate) struct FlakyMetricsStore {
    inner: InMemoryMetricsStore,
    fail_appends: bool,
    fail_deletes: bool,
    append_attempts: AtomicUsize,
    delete_attempts: AtomicUsize,
}

impl FlakyMetricsStore {
    pub(crate) fn new(inner: InMemoryMetricsStore) -> Self {
        Self {
            inner,
            fail_appends: false,
            fail_deletes: false,
            append_attempts: AtomicUsize::new(0),
            delete_attempts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing_appends(mut self) -> Self {
        self.fail_appends = true;
        self
    }

    pub(crate) fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub(crate) fn append_attempts(&self) -> usize {
        self.append_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn delete_attempts(&self) -> usize {
        self.delete_attempts.load(Ordering::SeqCst)
    }

    pub(crate) async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl MetricsStore for FlakyMetricsStore {
    async fn append_samples(&self, samples: &[ContainerMetricSample]) -> Result<usize, Error> {
        self.append_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends {
            return Err(store_error());
        }
        self.inner.append_samples(samples).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, Error> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes {
            return Err(store_error());
        }
        self.inner.delete_older_than(cutoff).await
    }

    async fn query_range(
        &self,
        server_id: Option<i32>,
        container_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContainerMetricSample>, Error> {
        self.inner.query_range(server_id, container_id, since).await
    }
}

/// Registry whose listing always fails.
pub(crate) struct UnavailableServerRegistry;

#[async_trait]
impl ServerRegistry for UnavailableServerRegistry {
    async fn list_servers(&self, _filter: Option<ServerStatus>) -> Result<Vec<ManagedServer>, Error> {
        Err(store_error())
    }

    async fn get_server(&self, _server_id: i32) -> Result<Option<ManagedServer>, Error> {
        Err(store_error())
    }

    async fn update_status(
        &self,
        _server_id: i32,
        _status: ServerStatus,
        _checked_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        Err(store_error())
    }
}
