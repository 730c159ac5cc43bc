//! Docker CLI output parsers.
//!
//! Pure text to struct transforms with no I/O. Docker's `--format` output is
//! not stable across versions, so every parser here is permissive: a bad
//! field degrades to zero and a short row is skipped, but one malformed value
//! never rejects the rest of the output.

use chrono::{DateTime, Utc};

use crate::models::{ContainerMetricSample, ContainerStats, RemoteContainer};

/// Delimiter used in every `--format` template issued to remote hosts.
pub const FIELD_DELIMITER: char = '|';

/// `docker ps` rows need id, name, status and image.
const CONTAINER_LIST_FIELDS: usize = 4;
/// `CPU%|MemUsage/Limit|Mem%|NetIO|BlockIO`
const STATS_LINE_FIELDS: usize = 5;
/// `ID|Name|CPU%|MemUsage/Limit|Mem%|NetIO|BlockIO`
const FLEET_STATS_FIELDS: usize = 7;

/// Per-container metrics parsed from one fleet-stats row, not yet stamped
/// with a server id and collection time.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerMetricRow {
    pub container_id: String,
    pub container_name: String,
    pub cpu_percentage: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub memory_percentage: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
}

impl ContainerMetricRow {
    pub fn into_sample(self, server_id: i32, timestamp: DateTime<Utc>) -> ContainerMetricSample {
        ContainerMetricSample {
            server_id,
            container_id: self.container_id,
            container_name: self.container_name,
            timestamp,
            cpu_percentage: self.cpu_percentage,
            memory_usage_bytes: self.memory_usage_bytes,
            memory_limit_bytes: self.memory_limit_bytes,
            memory_percentage: self.memory_percentage,
            network_rx_bytes: self.network_rx_bytes,
            network_tx_bytes: self.network_tx_bytes,
            block_read_bytes: self.block_read_bytes,
            block_write_bytes: self.block_write_bytes,
        }
    }
}

fn split_fields(line: &str) -> Vec<&str> {
    line.split(FIELD_DELIMITER).map(str::trim).collect()
}

fn non_empty_lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Parses `docker ps --format "{{.ID}}|{{.Names}}|{{.Status}}|{{.Image}}"`.
/// Rows with fewer than four fields are dropped.
pub fn parse_container_list(output: &str, server_id: i32) -> Vec<RemoteContainer> {
    non_empty_lines(output)
        .filter_map(|line| {
            let fields = split_fields(line);
            if fields.len() < CONTAINER_LIST_FIELDS {
                return None;
            }
            Some(RemoteContainer {
                id: fields[0].to_string(),
                name: fields[1].to_string(),
                status: fields[2].to_string(),
                image: fields[3].to_string(),
                server_id,
            })
        })
        .collect()
}

/// `"45.2%"` -> 45.2. Anything unparsable is 0.0.
pub fn parse_percentage(value: &str) -> f64 {
    let trimmed = value.trim();
    let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
    match number.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Converts a Docker human-readable size (`"1.5GiB"`, `"500MiB"`, `"12kB"`)
/// into bytes using base-1024 multipliers. Unknown units or unparsable
/// numbers yield 0.
pub fn parse_size(value: &str) -> u64 {
    let trimmed = value.trim();
    let split_at = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);
    if number.is_empty() {
        return 0;
    }
    let Ok(number) = number.parse::<f64>() else {
        return 0;
    };

    let power = match unit.trim().to_ascii_uppercase().as_str() {
        "B" => 0,
        "KB" | "KIB" => 1,
        "MB" | "MIB" => 2,
        "GB" | "GIB" => 3,
        "TB" | "TIB" => 4,
        _ => return 0,
    };

    (number * 1024f64.powi(power)) as u64
}

/// Splits a composite field such as `"1.5GiB / 8GiB"` into two byte counts.
/// Fewer than two parts yields `(0, 0)`.
pub fn parse_size_pair(value: &str) -> (u64, u64) {
    let parts: Vec<&str> = value.split('/').collect();
    if parts.len() < 2 {
        return (0, 0);
    }
    (parse_size(parts[0]), parse_size(parts[1]))
}

/// Parses the single-line output of
/// `docker stats <id> --no-stream --format "{{.CPUPerc}}|{{.MemUsage}}|{{.MemPerc}}|{{.NetIO}}|{{.BlockIO}}"`.
///
/// Returns `None` when no line carries the five expected fields.
pub fn parse_stats_line(
    output: &str,
    container_id: &str,
    timestamp: DateTime<Utc>,
) -> Option<ContainerStats> {
    non_empty_lines(output).find_map(|line| {
        let fields = split_fields(line);
        if fields.len() < STATS_LINE_FIELDS {
            return None;
        }
        Some(ContainerStats {
            container_id: container_id.to_string(),
            cpu_percentage: parse_percentage(fields[0]),
            memory_usage: fields[1].to_string(),
            memory_percentage: parse_percentage(fields[2]),
            network_io: fields[3].to_string(),
            block_io: fields[4].to_string(),
            timestamp,
        })
    })
}

/// Parses the multi-line output of the fleet-wide
/// `docker stats --no-stream --format "{{.ID}}|{{.Name}}|{{.CPUPerc}}|..."`.
///
/// Rows missing fields or an id are dropped; malformed values inside an
/// otherwise complete row become zero.
pub fn parse_fleet_stats(output: &str) -> Vec<ContainerMetricRow> {
    non_empty_lines(output)
        .filter_map(|line| {
            let fields = split_fields(line);
            if fields.len() < FLEET_STATS_FIELDS || fields[0].is_empty() {
                return None;
            }
            let (memory_usage_bytes, memory_limit_bytes) = parse_size_pair(fields[3]);
            let (network_rx_bytes, network_tx_bytes) = parse_size_pair(fields[5]);
            let (block_read_bytes, block_write_bytes) = parse_size_pair(fields[6]);
            Some(ContainerMetricRow {
                container_id: fields[0].to_string(),
                container_name: fields[1].to_string(),
                cpu_percentage: parse_percentage(fields[2]),
                memory_usage_bytes,
                memory_limit_bytes,
                memory_percentage: parse_percentage(fields[4]),
                network_rx_bytes,
                network_tx_bytes,
                block_read_bytes,
                block_write_bytes,
            })
        })
        .collect()
}
