use chrono::{DateTime, Duration, Utc};
use fleetdock_common::{ContainerMetricSample, ServerMetricsSummary};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::{Error, MetricsStore};

/// Read-side views over the stored container time series.
#[derive(Clone)]
pub struct MetricsQueryService {
    store: Arc<dyn MetricsStore>,
}

impl MetricsQueryService {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    pub async fn server_history(
        &self,
        server_id: i32,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContainerMetricSample>, Error> {
        self.store.query_range(Some(server_id), None, since).await
    }

    pub async fn container_history(
        &self,
        server_id: i32,
        container_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContainerMetricSample>, Error> {
        self.store
            .query_range(Some(server_id), Some(container_id), since)
            .await
    }

    /// Samples of the newest tick for `server_id` within `lookback`.
    pub async fn latest_for_server(
        &self,
        server_id: i32,
        lookback: Duration,
    ) -> Result<Vec<ContainerMetricSample>, Error> {
        let samples = self
            .store
            .query_range(Some(server_id), None, lookback_start(lookback))
            .await?;
        let Some(newest) = samples.iter().map(|s| s.timestamp).max() else {
            return Ok(Vec::new());
        };
        Ok(samples.into_iter().filter(|s| s.timestamp == newest).collect())
    }

    pub async fn fleet_summary(&self, lookback: Duration) -> Result<Vec<ServerMetricsSummary>, Error> {
        let samples = self.store.query_range(None, None, lookback_start(lookback)).await?;
        Ok(summarize_latest(&samples))
    }
}

fn lookback_start(lookback: Duration) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(lookback)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// One summary per server, built from that server's newest timestamp only.
pub fn summarize_latest(samples: &[ContainerMetricSample]) -> Vec<ServerMetricsSummary> {
    let mut newest: BTreeMap<i32, DateTime<Utc>> = BTreeMap::new();
    for sample in samples {
        newest
            .entry(sample.server_id)
            .and_modify(|ts| *ts = (*ts).max(sample.timestamp))
            .or_insert(sample.timestamp);
    }

    newest
        .into_iter()
        .map(|(server_id, timestamp)| {
            let mut summary = ServerMetricsSummary {
                server_id,
                timestamp,
                container_count: 0,
                total_cpu_percentage: 0.0,
                total_memory_usage_bytes: 0,
                total_network_rx_bytes: 0,
                total_network_tx_bytes: 0,
            };
            for s in samples
                .iter()
                .filter(|s| s.server_id == server_id && s.timestamp == timestamp)
            {
                summary.container_count += 1;
                summary.total_cpu_percentage += s.cpu_percentage;
                summary.total_memory_usage_bytes = summary.total_memory_usage_bytes.saturating_add(s.memory_usage_bytes);
                summary.total_network_rx_bytes = summary.total_network_rx_bytes.saturating_add(s.network_rx_bytes);
                summary.total_network_tx_bytes = summary.total_network_tx_bytes.saturating_add(s.network_tx_bytes);
            }
            summary
        })
        .collect()
}
