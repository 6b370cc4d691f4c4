pub mod aggregator;
pub mod config;
pub mod http;
pub mod metrics_constants;
pub mod scheduler;
