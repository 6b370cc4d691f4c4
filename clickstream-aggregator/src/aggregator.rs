use std::sync::Arc;

use clickstream_common::batch::PassBatch;
use clickstream_common::event::{Event, EventError};
use clickstream_common::sink::{Sink, SinkError};
use common_s3::{S3Client, S3Error};
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics_constants::*;

/// Counts for one pass. `failed` covers every record left staged: records that could
/// not be fetched or decoded, and records that were committed but could not be deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassResult {
    pub observed: usize,
    pub aggregates_merged: usize,
    pub events_inserted: usize,
    pub retired: usize,
    pub failed: usize,
}

/// Errors that abort a whole pass. Per-record errors never end up here.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("failed to list staged records: {0}")]
    Listing(#[source] S3Error),
    #[error("failed to commit pass to the sink: {0}")]
    Commit(#[source] SinkError),
}

#[derive(Error, Debug)]
enum RecordError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] S3Error),
    #[error("decode failed: {0}")]
    Decode(#[from] EventError),
}

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub id: String,
    pub bucket: String,
    pub prefix: String,
    /// Upper bound on concurrent fetches, and on concurrent deletes. Clamped to at least 1.
    pub max_concurrent_fetches: usize,
}

/// Drains the staging bucket into the sink.
///
/// Staged records are only deleted once their contribution is committed, so whatever
/// is still staged after a pass, or after a crash mid-pass, is unprocessed and gets
/// picked up again by the next pass.
pub struct Aggregator {
    store: Arc<dyn S3Client>,
    sink: Arc<dyn Sink>,
    settings: AggregatorSettings,
    metrics_labels: Vec<(String, String)>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn S3Client>, sink: Arc<dyn Sink>, settings: AggregatorSettings) -> Self {
        let metrics_labels = vec![("aggregator_id".to_string(), settings.id.clone())];

        Self {
            store,
            sink,
            settings,
            metrics_labels,
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    fn concurrency(&self) -> usize {
        self.settings.max_concurrent_fetches.max(1)
    }

    /// Run one list, classify, commit, retire cycle.
    pub async fn run_pass(&self) -> Result<PassResult, PassError> {
        info!("Running aggregation pass");
        let _pass_time = common_metrics::timing_guard(PASS_TIME, &self.metrics_labels);
        common_metrics::inc(PASS_STARTS, &self.metrics_labels, 1);

        let keys = {
            let _time = common_metrics::timing_guard(LIST_TIME, &self.metrics_labels);
            self.store
                .list(&self.settings.bucket, &self.settings.prefix)
                .await
                .map_err(PassError::Listing)?
        };
        common_metrics::gauge(STAGED_OBJECTS, &self.metrics_labels, keys.len() as f64);

        let mut result = PassResult {
            observed: keys.len(),
            ..Default::default()
        };

        // Barrier: nothing is committed until every staged record has been classified
        let (batch, classified, failed) = {
            let _time = common_metrics::timing_guard(CLASSIFY_TIME, &self.metrics_labels);
            self.classify(keys).await
        };
        result.failed += failed;

        if !batch.is_empty() {
            let _time = common_metrics::timing_guard(COMMIT_TIME, &self.metrics_labels);
            let summary = self.sink.commit(&batch).await.map_err(PassError::Commit)?;
            result.aggregates_merged = summary.aggregates_merged;
            result.events_inserted = summary.events_inserted;
            debug!(
                "committed {} aggregates and {} events in {} chunks",
                summary.aggregates_merged, summary.events_inserted, summary.chunks
            );
        }
        drop(batch);

        let to_retire = classified.len();
        result.retired = {
            let _time = common_metrics::timing_guard(RETIRE_TIME, &self.metrics_labels);
            self.retire(classified).await
        };
        result.failed += to_retire - result.retired;

        common_metrics::inc(
            AGGREGATES_MERGED,
            &self.metrics_labels,
            result.aggregates_merged as u64,
        );
        common_metrics::inc(
            EVENTS_INSERTED,
            &self.metrics_labels,
            result.events_inserted as u64,
        );
        common_metrics::inc(RECORDS_RETIRED, &self.metrics_labels, result.retired as u64);
        common_metrics::inc(PASS_ENDS, &self.metrics_labels, 1);

        if result.failed > 0 {
            warn!("{} staged records left for the next pass", result.failed);
        }
        info!(
            "Aggregation pass complete: observed {}, merged {} aggregates, inserted {} events, retired {}",
            result.observed, result.aggregates_merged, result.events_inserted, result.retired
        );

        Ok(result)
    }

    /// Fetch and decode every key concurrently, folding events into a batch as they
    /// arrive. Returns the batch, the keys that made it in, and how many keys failed.
    async fn classify(&self, keys: Vec<String>) -> (PassBatch, Vec<String>, usize) {
        let mut batch = PassBatch::new();
        let mut classified = Vec::with_capacity(keys.len());
        let mut failed = 0;

        let mut records = stream::iter(keys)
            .map(|key| async move {
                let event = self.fetch_event(&key).await;
                (key, event)
            })
            .buffer_unordered(self.concurrency());

        while let Some((key, event)) = records.next().await {
            match event {
                Ok(event) => {
                    metrics::counter!(
                        PROCESSED_EVENTS_BY_TYPE,
                        "event_type" => event.event_type.clone()
                    )
                    .increment(1);
                    batch.add(event);
                    classified.push(key);
                }
                Err(error) => {
                    warn!("Skipping staged record {}: {}", key, error);
                    metrics::counter!(FAILED_EVENTS, "stage" => "batch_processor").increment(1);
                    failed += 1;
                }
            }
        }

        (batch, classified, failed)
    }

    async fn fetch_event(&self, key: &str) -> Result<Event, RecordError> {
        let payload = self.store.get(&self.settings.bucket, key).await?;
        Ok(Event::from_slice(&payload)?)
    }

    /// Delete committed records, returning how many are gone. A record that fails to
    /// delete is processed again by the next pass.
    async fn retire(&self, keys: Vec<String>) -> usize {
        let bucket = self.settings.bucket.as_str();

        stream::iter(keys)
            .map(|key| async move {
                let deleted = self.store.delete(bucket, &key).await;
                (key, deleted)
            })
            .buffer_unordered(self.concurrency())
            .fold(0, |retired, (key, deleted)| async move {
                match deleted {
                    Ok(()) => retired + 1,
                    Err(error) => {
                        warn!("Failed to retire committed record {}: {}", key, error);
                        metrics::counter!(FAILED_EVENTS, "stage" => "retire").increment(1);
                        retired
                    }
                }
            })
            .await
    }
}
