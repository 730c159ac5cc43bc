pub mod duckdb_service;
pub mod memory;
pub mod stores;

pub use duckdb_service::{DuckDbPool, Error};
pub use stores::{MetricsStore, ServerRegistry};
