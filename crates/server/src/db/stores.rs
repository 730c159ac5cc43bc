//! Storage seams consumed by the collector and the remote operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetdock_common::{ContainerMetricSample, ManagedServer, ServerStatus};

use super::duckdb_service::Error;

/// Supplies collection targets and SSH credentials.
#[async_trait]
pub trait ServerRegistry: Send + Sync {
    /// Lists servers, optionally only those with the given status, ordered by id.
    async fn list_servers(&self, filter: Option<ServerStatus>) -> Result<Vec<ManagedServer>, Error>;

    async fn get_server(&self, server_id: i32) -> Result<Option<ManagedServer>, Error>;

    /// Records the outcome of a reachability check. Unknown ids are `NotFound`.
    async fn update_status(
        &self,
        server_id: i32,
        status: ServerStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), Error>;
}

/// Append-only time series of container samples.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Writes the batch in one transaction and returns the number of new rows.
    /// Samples already present (same server, container and timestamp) are skipped.
    async fn append_samples(&self, samples: &[ContainerMetricSample]) -> Result<usize, Error>;

    /// Deletes every sample strictly older than `cutoff`, returning the count.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, Error>;

    /// Samples at or after `since`, oldest first.
    async fn query_range(
        &self,
        server_id: Option<i32>,
        container_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContainerMetricSample>, Error>;
}
