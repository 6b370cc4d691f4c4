pub mod config;
pub mod http;
pub mod ingestor;
pub mod metrics_constants;
