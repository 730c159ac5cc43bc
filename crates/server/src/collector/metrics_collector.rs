//! Periodic fleet-wide `docker stats` collection with retention cleanup.

use chrono::{DateTime, Utc};
use fleetdock_common::parsers::parse_fleet_stats;
use fleetdock_common::{ContainerMetricSample, ManagedServer, ServerStatus};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::{is_shutting_down, sleep_or_shutdown};
use crate::db::{MetricsStore, ServerRegistry};
use crate::remote::{commands, ConnectionResolver, RemoteError, RemoteExecutor};
use crate::server::config::ServerConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorSettings {
    pub collection_interval: Duration,
    pub startup_delay: Duration,
    pub retention: Duration,
    pub max_concurrent_collections: usize,
    pub command_timeout: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(30),
            startup_delay: Duration::from_secs(10),
            retention: Duration::from_secs(24 * 60 * 60),
            max_concurrent_collections: 5,
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl CollectorSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            collection_interval: config.collection_interval(),
            startup_delay: config.startup_delay(),
            retention: config.retention(),
            max_concurrent_collections: config.max_concurrent_collections.max(1),
            command_timeout: config.ssh_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorPhase {
    Idle,
    Collecting,
    Cleaning,
    Sleeping,
    Stopped,
}

/// What one collect-then-cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub collected_at: Option<DateTime<Utc>>,
    pub servers_polled: usize,
    pub servers_failed: usize,
    pub servers_skipped: usize,
    pub samples_collected: usize,
    pub samples_written: usize,
    pub samples_evicted: usize,
    pub elapsed: Duration,
}

enum UnitOutcome {
    Collected(Vec<ContainerMetricSample>),
    Failed,
    Skipped,
}

/// Owned handles for one per-server unit of work.
#[derive(Clone)]
struct StatsProbe {
    resolver: ConnectionResolver,
    executor: Arc<dyn RemoteExecutor>,
    command_timeout: Duration,
}

impl StatsProbe {
    async fn collect(
        &self,
        server: &ManagedServer,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<ContainerMetricSample>, RemoteError> {
        let target = self.resolver.for_managed_server(server);
        let output = self
            .executor
            .execute(&target, commands::FLEET_STATS, self.command_timeout)
            .await?
            .into_success()?;
        Ok(parse_fleet_stats(&output.stdout)
            .into_iter()
            .map(|row| row.into_sample(server.id, timestamp))
            .collect())
    }
}

pub(crate) fn retention_cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub struct MetricsCollector {
    servers: Arc<dyn ServerRegistry>,
    store: Arc<dyn MetricsStore>,
    probe: StatsProbe,
    settings: CollectorSettings,
    phase_tx: watch::Sender<CollectorPhase>,
}

impl MetricsCollector {
    pub fn new(
        servers: Arc<dyn ServerRegistry>,
        store: Arc<dyn MetricsStore>,
        resolver: ConnectionResolver,
        executor: Arc<dyn RemoteExecutor>,
        settings: CollectorSettings,
    ) -> Self {
        let (phase_tx, _) = watch::channel(CollectorPhase::Idle);
        Self {
            servers,
            store,
            probe: StatsProbe {
                resolver,
                executor,
                command_timeout: settings.command_timeout,
            },
            settings,
            phase_tx,
        }
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<CollectorPhase> {
        self.phase_tx.subscribe()
    }

    fn set_phase(&self, phase: CollectorPhase) {
        self.phase_tx.send_replace(phase);
    }

    /// Runs until `shutdown_rx` flips to `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval = ?self.settings.collection_interval,
            startup_delay = ?self.settings.startup_delay,
            max_concurrent = self.settings.max_concurrent_collections,
            "Metrics collector started."
        );

        if !sleep_or_shutdown(self.settings.startup_delay, &mut shutdown_rx).await {
            loop {
                let report = self.run_tick(&shutdown_rx).await;
                info!(
                    servers_polled = report.servers_polled,
                    servers_failed = report.servers_failed,
                    servers_skipped = report.servers_skipped,
                    samples_written = report.samples_written,
                    samples_evicted = report.samples_evicted,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Metrics collection tick finished."
                );

                self.set_phase(CollectorPhase::Sleeping);
                if sleep_or_shutdown(self.settings.collection_interval, &mut shutdown_rx).await {
                    break;
                }
                self.set_phase(CollectorPhase::Idle);
            }
        }

        self.set_phase(CollectorPhase::Stopped);
        info!("Metrics collector stopped.");
    }

    /// One collection pass over every online server followed by retention
    /// cleanup. With no online servers the tick ends before cleanup. Failures
    /// are logged and reflected in the report, never returned.
    #[instrument(skip_all)]
    pub async fn run_tick(&self, shutdown_rx: &watch::Receiver<bool>) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();
        self.set_phase(CollectorPhase::Collecting);

        match self.servers.list_servers(Some(ServerStatus::Online)).await {
            Ok(servers) if servers.is_empty() => {
                debug!("No online servers; skipping collection and cleanup.");
                report.elapsed = started.elapsed();
                return report;
            }
            Ok(servers) => {
                let samples = self.collect_fleet(servers, shutdown_rx, &mut report).await;
                report.samples_collected = samples.len();
                if !samples.is_empty() {
                    match self.store.append_samples(&samples).await {
                        Ok(written) => report.samples_written = written,
                        Err(e) => {
                            error!(count = samples.len(), error = %e, "Failed to persist container samples.")
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to list online servers; ending tick early.");
                report.elapsed = started.elapsed();
                return report;
            }
        }

        self.set_phase(CollectorPhase::Cleaning);
        let cutoff = retention_cutoff(Utc::now(), self.settings.retention);
        match self.store.delete_older_than(cutoff).await {
            Ok(evicted) => report.samples_evicted = evicted,
            Err(e) => error!(cutoff = %cutoff, error = %e, "Failed to delete expired container samples."),
        }

        report.elapsed = started.elapsed();
        report
    }

    async fn collect_fleet(
        &self,
        servers: Vec<ManagedServer>,
        shutdown_rx: &watch::Receiver<bool>,
        report: &mut TickReport,
    ) -> Vec<ContainerMetricSample> {
        let timestamp = Utc::now();
        report.collected_at = Some(timestamp);

        let outcomes: Vec<UnitOutcome> = stream::iter(servers)
            .map(|server| {
                let probe = self.probe.clone();
                let shutdown_rx = shutdown_rx.clone();
                async move {
                    if is_shutting_down(&shutdown_rx) {
                        return UnitOutcome::Skipped;
                    }
                    match probe.collect(&server, timestamp).await {
                        Ok(samples) => {
                            debug!(server_id = server.id, count = samples.len(), "Collected container stats.");
                            UnitOutcome::Collected(samples)
                        }
                        Err(e) => {
                            warn!(server_id = server.id, host = %server.host, error = %e, "Failed to collect container stats.");
                            UnitOutcome::Failed
                        }
                    }
                }
            })
            .buffer_unordered(self.settings.max_concurrent_collections.max(1))
            .collect()
            .await;

        let mut samples = Vec::new();
        for outcome in outcomes {
            match outcome {
                UnitOutcome::Collected(batch) => {
                    report.servers_polled += 1;
                    samples.extend(batch);
                }
                UnitOutcome::Failed => {
                    report.servers_polled += 1;
                    report.servers_failed += 1;
                }
                UnitOutcome::Skipped => report.servers_skipped += 1,
            }
        }
        samples
    }
}
