pub mod encryption_service;
pub mod metrics_query_service;

pub use encryption_service::{EncryptionError, EncryptionService};
pub use metrics_query_service::MetricsQueryService;
