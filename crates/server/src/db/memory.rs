//! Process-local implementations of the storage traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetdock_common::{ContainerMetricSample, ManagedServer, ServerStatus};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::duckdb_service::Error;
use super::stores::{MetricsStore, ServerRegistry};

#[derive(Default)]
pub struct InMemoryServerRegistry {
    servers: RwLock<BTreeMap<i32, ManagedServer>>,
}

impl InMemoryServerRegistry {
    pub fn new(servers: impl IntoIterator<Item = ManagedServer>) -> Self {
        Self {
            servers: RwLock::new(servers.into_iter().map(|s| (s.id, s)).collect()),
        }
    }
}

#[async_trait]
impl ServerRegistry for InMemoryServerRegistry {
    async fn list_servers(&self, filter: Option<ServerStatus>) -> Result<Vec<ManagedServer>, Error> {
        let servers = self.servers.read().await;
        Ok(servers
            .values()
            .filter(|s| filter.map_or(true, |status| s.status == status))
            .cloned()
            .collect())
    }

    async fn get_server(&self, server_id: i32) -> Result<Option<ManagedServer>, Error> {
        Ok(self.servers.read().await.get(&server_id).cloned())
    }

    async fn update_status(
        &self,
        server_id: i32,
        status: ServerStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut servers = self.servers.write().await;
        let server = servers
            .get_mut(&server_id)
            .ok_or_else(|| Error::NotFound(format!("managed server {server_id}")))?;
        server.status = status;
        server.last_checked_at = Some(checked_at);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMetricsStore {
    samples: RwLock<Vec<ContainerMetricSample>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.samples.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.samples.read().await.is_empty()
    }
}

/// Samples are unique per server, container and millisecond, matching the
/// epoch-millisecond key of the DuckDB table.
fn same_key(a: &ContainerMetricSample, b: &ContainerMetricSample) -> bool {
    a.server_id == b.server_id
        && a.container_id == b.container_id
        && a.timestamp.timestamp_millis() == b.timestamp.timestamp_millis()
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn append_samples(&self, samples: &[ContainerMetricSample]) -> Result<usize, Error> {
        let mut stored = self.samples.write().await;
        let mut inserted = 0;
        for sample in samples {
            if !stored.iter().any(|existing| same_key(existing, sample)) {
                stored.push(sample.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, Error> {
        let mut stored = self.samples.write().await;
        let before = stored.len();
        stored.retain(|s| s.timestamp >= cutoff);
        Ok(before - stored.len())
    }

    async fn query_range(
        &self,
        server_id: Option<i32>,
        container_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContainerMetricSample>, Error> {
        let stored = self.samples.read().await;
        let mut matching: Vec<ContainerMetricSample> = stored
            .iter()
            .filter(|s| s.timestamp >= since)
            .filter(|s| server_id.map_or(true, |id| s.server_id == id))
            .filter(|s| container_id.map_or(true, |id| s.container_id == id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.server_id.cmp(&b.server_id))
                .then_with(|| a.container_id.cmp(&b.container_id))
        });
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{managed_server, sample};
    use chrono::Duration;

    #[tokio::test]
    async fn cleanup_pass_keeps_only_fresh_samples() {
        let store = InMemoryMetricsStore::new();
        let now = Utc::now();
        let mut batch: Vec<_> = (0..40)
            .map(|i| sample(1, &format!("old-{i}"), now - Duration::hours(30)))
            .collect();
        batch.extend((0..60).map(|i| sample(2, &format!("new-{i}"), now - Duration::minutes(i))));
        store.append_samples(&batch).await.unwrap();

        assert_eq!(store.delete_older_than(now - Duration::hours(24)).await.unwrap(), 40);
        assert_eq!(store.len().await, 60);
        assert_eq!(store.delete_older_than(now - Duration::hours(24)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicates_collapse_to_the_millisecond() {
        let store = InMemoryMetricsStore::new();
        let base = DateTime::from_timestamp_millis(1_767_225_600_123).unwrap();
        let same_milli = base + Duration::microseconds(400);
        let next_milli = base + Duration::milliseconds(1);

        assert_eq!(store.append_samples(&[sample(1, "web", base)]).await.unwrap(), 1);
        assert_eq!(store.append_samples(&[sample(1, "web", same_milli)]).await.unwrap(), 0);
        assert_eq!(store.append_samples(&[sample(1, "web", next_milli)]).await.unwrap(), 1);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn registry_filters_on_status() {
        let registry = InMemoryServerRegistry::new([
            managed_server(1, "10.0.0.1", ServerStatus::Online),
            managed_server(2, "10.0.0.2", ServerStatus::Offline),
        ]);
        let online = registry.list_servers(Some(ServerStatus::Online)).await.unwrap();
        assert_eq!(online.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1]);

        registry
            .update_status(2, ServerStatus::Online, Utc::now())
            .await
            .unwrap();
        assert_eq!(registry.list_servers(Some(ServerStatus::Online)).await.unwrap().len(), 2);
        assert!(registry
            .update_status(9, ServerStatus::Online, Utc::now())
            .await
            .is_err());
    }
}
