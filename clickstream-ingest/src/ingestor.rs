use std::sync::Arc;
use std::time::Instant;

use clickstream_common::event::{staged_key, Event, EventError};
use common_kafka::kafka_consumer::{RecvErr, SingleTopicConsumer};
use common_s3::{S3Client, S3Error};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::metrics_constants::*;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to decode event: {0}")]
    Decode(#[from] EventError),
    #[error("failed to stage event: {0}")]
    Staging(#[from] S3Error),
}

/// Writes every consumed event to the staging bucket as its own record.
pub struct Ingestor {
    store: Arc<dyn S3Client>,
    bucket: String,
    prefix: String,
}

impl Ingestor {
    pub fn new(store: Arc<dyn S3Client>, bucket: String, prefix: String) -> Self {
        Self {
            store,
            bucket,
            prefix,
        }
    }

    /// Decode one message payload and stage it, returning the key it was staged under.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<String, IngestError> {
        let started = Instant::now();

        let event = match Event::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                metrics::counter!(FAILED_EVENTS, "stage" => "consumer").increment(1);
                return Err(e.into());
            }
        };
        metrics::counter!(EVENTS_PROCESSED, "event_type" => event.event_type.clone())
            .increment(1);

        let key = format!("{}{}", self.prefix, staged_key(&event));
        let staged = self.stage(&key, &event).await;

        metrics::histogram!(EVENT_PROCESSING_DURATION).record(started.elapsed().as_secs_f64());

        if let Err(e) = staged {
            metrics::counter!(FAILED_EVENTS, "stage" => "staging").increment(1);
            return Err(e);
        }

        Ok(key)
    }

    async fn stage(&self, key: &str, event: &Event) -> Result<(), IngestError> {
        let body = event.to_vec()?;
        self.store.put(&self.bucket, key, body).await?;
        Ok(())
    }
}

/// Consume the topic forever. Every message is attempted once: its offset is stored
/// after the staging attempt, whatever the outcome.
pub async fn run_ingest(consumer: SingleTopicConsumer, ingestor: Ingestor) {
    loop {
        let (payload, offset) = match consumer.raw_recv().await {
            Ok(received) => received,
            Err(RecvErr::Empty) => {
                warn!("Skipping empty message on {}", consumer.topic());
                continue;
            }
            Err(e) => {
                error!("Error receiving message: {}", e);
                metrics::counter!(RECV_ERRORS).increment(1);
                continue;
            }
        };

        match ingestor.handle_payload(&payload).await {
            Ok(key) => debug!("staged event as {}", key),
            Err(e) => warn!(
                "Dropping message at {}:{}: {}",
                offset.partition(),
                offset.offset(),
                e
            ),
        }

        if let Err(e) = offset.store() {
            error!("Failed to store offset: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_s3::MockS3Client;

    const BUCKET: &str = "clickstream-storage";

    fn ingestor(store: &MockS3Client, prefix: &str) -> Ingestor {
        Ingestor::new(
            Arc::new(store.clone()),
            BUCKET.to_string(),
            prefix.to_string(),
        )
    }

    #[tokio::test]
    async fn stages_one_record_per_event() {
        let store = MockS3Client::new();
        let ingestor = ingestor(&store, "");
        let payload =
            br#"{"user_id": 7, "event_type": "click", "url": "/pricing", "timestamp": 1700000000000}"#;

        let key = ingestor.handle_payload(payload).await.unwrap();

        assert!(key.starts_with("event_click_"));
        assert!(key.ends_with(".json"));
        assert_eq!(store.keys(BUCKET), vec![key.clone()]);

        let staged = Event::from_slice(&store.object(BUCKET, &key).unwrap()).unwrap();
        assert_eq!(staged, Event::new(7, "click", "/pricing", 1_700_000_000_000));
    }

    #[tokio::test]
    async fn repeated_events_get_distinct_keys() {
        let store = MockS3Client::new();
        let ingestor = ingestor(&store, "events/");
        let payload = Event::new(1, "scroll", "/a", 1).to_vec().unwrap();

        let first = ingestor.handle_payload(&payload).await.unwrap();
        let second = ingestor.handle_payload(&payload).await.unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with("events/event_scroll_"));
        assert_eq!(store.keys(BUCKET).len(), 2);
    }

    #[tokio::test]
    async fn undecodable_payload_is_not_staged() {
        let store = MockS3Client::new();

        let result = ingestor(&store, "").handle_payload(b"{\"url\": ").await;

        assert!(matches!(result, Err(IngestError::Decode(_))));
        assert!(store.keys(BUCKET).is_empty());
    }

    #[tokio::test]
    async fn staging_failure_is_reported() {
        let store = MockS3Client::new();
        store.fail_puts(true);
        let payload = Event::new(1, "click", "/a", 1).to_vec().unwrap();

        let result = ingestor(&store, "").handle_payload(&payload).await;

        assert!(matches!(result, Err(IngestError::Staging(_))));
        assert!(store.keys(BUCKET).is_empty());
    }
}
