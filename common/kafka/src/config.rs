use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,
}

#[derive(Envconfig, Clone)]
pub struct ConsumerConfig {
    #[envconfig(default = "clickstream-group")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "clickstream")]
    pub kafka_consumer_topic: String,

    // A new consumer group starts from the beginning of the topic
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Offsets are only ever *stored* explicitly, once a message has been staged. This controls
    // whether librdkafka periodically commits the stored offsets for us.
    #[envconfig(default = "true")]
    pub kafka_consumer_auto_commit: bool,

    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: i32,
}
