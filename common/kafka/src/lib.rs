pub mod config;
pub mod kafka_consumer;

pub const CLICKSTREAM_TOPIC: &str = "clickstream";
pub const CLICKSTREAM_CONSUMER_GROUP: &str = "clickstream-group";
