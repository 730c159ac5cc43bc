use chrono::Utc;
use fleetdock_common::ServerStatus;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{is_shutting_down, sleep_or_shutdown};
use crate::db::ServerRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub online: usize,
    pub offline: usize,
    pub update_failures: usize,
}

/// Marks managed servers online or offline by whether their SSH port
/// accepts a TCP connection.
pub struct ServerHealthMonitor {
    servers: Arc<dyn ServerRegistry>,
    interval: Duration,
    connect_timeout: Duration,
    max_concurrent: usize,
}

async fn probe(host: &str, port: u16, connect_timeout: Duration) -> ServerStatus {
    match tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => ServerStatus::Online,
        Ok(Err(e)) => {
            debug!(host, port, error = %e, "SSH port probe refused.");
            ServerStatus::Offline
        }
        Err(_) => {
            debug!(host, port, "SSH port probe timed out.");
            ServerStatus::Offline
        }
    }
}

impl ServerHealthMonitor {
    pub fn new(
        servers: Arc<dyn ServerRegistry>,
        interval: Duration,
        connect_timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            servers,
            interval,
            connect_timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "Server health monitor started.");
        loop {
            let report = self.check_all(&shutdown_rx).await;
            debug!(
                online = report.online,
                offline = report.offline,
                update_failures = report.update_failures,
                "Health check pass finished."
            );
            if sleep_or_shutdown(self.interval, &mut shutdown_rx).await {
                break;
            }
        }
        info!("Server health monitor stopped.");
    }

    pub async fn check_all(&self, shutdown_rx: &watch::Receiver<bool>) -> HealthReport {
        let mut report = HealthReport::default();
        let servers = match self.servers.list_servers(None).await {
            Ok(servers) => servers,
            Err(e) => {
                error!(error = %e, "Failed to list servers for health check.");
                return report;
            }
        };

        let connect_timeout = self.connect_timeout;
        let results: Vec<Option<(i32, ServerStatus, ServerStatus)>> = stream::iter(servers)
            .map(|server| {
                let shutdown_rx = shutdown_rx.clone();
                async move {
                    if is_shutting_down(&shutdown_rx) {
                        return None;
                    }
                    let status = probe(&server.host, server.ssh_port, connect_timeout).await;
                    Some((server.id, server.status, status))
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for (server_id, previous, status) in results.into_iter().flatten() {
            match status {
                ServerStatus::Online => report.online += 1,
                _ => report.offline += 1,
            }
            if previous != status {
                info!(server_id, from = %previous, to = %status, "Server status changed.");
            }
            if let Err(e) = self.servers.update_status(server_id, status, Utc::now()).await {
                warn!(server_id, error = %e, "Failed to record server status.");
                report.update_failures += 1;
            }
        }
        report
    }
}
