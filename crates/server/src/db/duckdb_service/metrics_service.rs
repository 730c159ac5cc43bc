use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{params, Row, ToSql};
use fleetdock_common::ContainerMetricSample;
use std::collections::HashSet;
use tracing::{debug, info};

use super::{bytes_from_db, bytes_to_db, millis_to_datetime, DuckDbPool, Error};
use crate::db::stores::MetricsStore;

const SAMPLE_COLUMNS: &str = "server_id, container_id, container_name, time_ms, cpu_percentage, \
    memory_usage_bytes, memory_limit_bytes, memory_percentage, network_rx_bytes, network_tx_bytes, \
    block_read_bytes, block_write_bytes";

fn row_to_sample(row: &Row<'_>) -> Result<ContainerMetricSample, duckdb::Error> {
    Ok(ContainerMetricSample {
        server_id: row.get(0)?,
        container_id: row.get(1)?,
        container_name: row.get(2)?,
        timestamp: millis_to_datetime(row.get(3)?),
        cpu_percentage: row.get(4)?,
        memory_usage_bytes: bytes_from_db(row.get(5)?),
        memory_limit_bytes: bytes_from_db(row.get(6)?),
        memory_percentage: row.get(7)?,
        network_rx_bytes: bytes_from_db(row.get(8)?),
        network_tx_bytes: bytes_from_db(row.get(9)?),
        block_read_bytes: bytes_from_db(row.get(10)?),
        block_write_bytes: bytes_from_db(row.get(11)?),
    })
}

/// Metrics time series backed by the `container_metrics` table.
#[derive(Clone)]
pub struct DuckDbMetricsStore {
    pool: DuckDbPool,
}

impl DuckDbMetricsStore {
    pub fn new(pool: DuckDbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsStore for DuckDbMetricsStore {
    async fn append_samples(&self, samples: &[ContainerMetricSample]) -> Result<usize, Error> {
        if samples.is_empty() {
            return Ok(0);
        }
        let pool = self.pool.clone();
        let mut seen = HashSet::new();
        let samples: Vec<ContainerMetricSample> = samples
            .iter()
            .filter(|s| {
                seen.insert((s.server_id, s.container_id.clone(), s.timestamp.timestamp_millis()))
            })
            .cloned()
            .collect();
        tokio::task::spawn_blocking(move || -> Result<usize, Error> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO container_metrics ({SAMPLE_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT DO NOTHING"
                ))?;
                for sample in &samples {
                    inserted += stmt.execute(params![
                        sample.server_id,
                        sample.container_id,
                        sample.container_name,
                        sample.timestamp.timestamp_millis(),
                        sample.cpu_percentage,
                        bytes_to_db(sample.memory_usage_bytes),
                        bytes_to_db(sample.memory_limit_bytes),
                        sample.memory_percentage,
                        bytes_to_db(sample.network_rx_bytes),
                        bytes_to_db(sample.network_tx_bytes),
                        bytes_to_db(sample.block_read_bytes),
                        bytes_to_db(sample.block_write_bytes),
                    ])?;
                }
            }
            tx.commit()?;
            debug!(count = inserted, "Container samples written to DuckDB.");
            Ok(inserted)
        })
        .await?
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, Error> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<usize, Error> {
            let conn = pool.get()?;
            let deleted = conn.execute(
                "DELETE FROM container_metrics WHERE time_ms < ?",
                params![cutoff.timestamp_millis()],
            )?;
            if deleted > 0 {
                info!(count = deleted, cutoff = %cutoff, "Expired container samples deleted.");
            }
            Ok(deleted)
        })
        .await?
    }

    async fn query_range(
        &self,
        server_id: Option<i32>,
        container_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContainerMetricSample>, Error> {
        let pool = self.pool.clone();
        let container_id = container_id.map(str::to_string);
        tokio::task::spawn_blocking(move || -> Result<Vec<ContainerMetricSample>, Error> {
            let conn = pool.get()?;
            let since_ms = since.timestamp_millis();

            let mut sql = format!("SELECT {SAMPLE_COLUMNS} FROM container_metrics WHERE time_ms >= ?");
            let mut params_vec: Vec<&dyn ToSql> = vec![&since_ms];
            if let Some(id) = &server_id {
                sql.push_str(" AND server_id = ?");
                params_vec.push(id);
            }
            if let Some(id) = &container_id {
                sql.push_str(" AND container_id = ?");
                params_vec.push(id);
            }
            sql.push_str(" ORDER BY time_ms ASC, server_id ASC, container_id ASC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(&params_vec[..], row_to_sample)?;
            let samples = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(samples)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::duckdb_service::open_memory_pool;
    use crate::test_support::sample;
    use chrono::Duration;

    #[tokio::test]
    async fn retention_removes_exactly_the_expired_samples() {
        let store = DuckDbMetricsStore::new(open_memory_pool().unwrap());
        let now = Utc::now();
        let old = now - Duration::hours(25);
        let fresh = now - Duration::hours(1);

        let mut batch = Vec::new();
        for i in 0..40 {
            batch.push(sample(1, &format!("old-{i}"), old));
        }
        for i in 0..60 {
            batch.push(sample(1, &format!("new-{i}"), fresh));
        }
        assert_eq!(store.append_samples(&batch).await.unwrap(), 100);

        let deleted = store.delete_older_than(now - Duration::hours(24)).await.unwrap();
        assert_eq!(deleted, 40);

        let remaining = store
            .query_range(None, None, now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 60);
        assert!(remaining.iter().all(|s| s.container_id.starts_with("new-")));
    }

    #[tokio::test]
    async fn duplicate_samples_are_ignored() {
        let store = DuckDbMetricsStore::new(open_memory_pool().unwrap());
        let ts = Utc::now();
        let batch = vec![sample(1, "a1", ts), sample(1, "a1", ts)];
        assert_eq!(store.append_samples(&batch).await.unwrap(), 1);
        assert_eq!(store.append_samples(&batch[..1]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn query_range_filters_and_orders() {
        let store = DuckDbMetricsStore::new(open_memory_pool().unwrap());
        let now = Utc::now();
        let earlier = now - Duration::minutes(5);
        let mut late = sample(2, "b1", now);
        late.memory_usage_bytes = 8_589_934_592;
        store
            .append_samples(&[late.clone(), sample(1, "a1", now), sample(2, "b1", earlier)])
            .await
            .unwrap();

        let server_two = store
            .query_range(Some(2), None, now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(server_two.len(), 2);
        assert_eq!(server_two[0].timestamp.timestamp_millis(), earlier.timestamp_millis());
        assert_eq!(server_two[1].memory_usage_bytes, 8_589_934_592);

        let container = store
            .query_range(Some(2), Some("b1"), now - Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(container.len(), 1);
        assert_eq!(container[0].container_name, late.container_name);
    }
}
