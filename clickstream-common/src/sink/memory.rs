use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{CommitSummary, Sink, SinkError, DEFAULT_CHUNK_SIZE};
use crate::batch::{chunk_events, PassBatch};
use crate::event::Event;

/// A `scroll_events` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAggregate {
    pub scroll_count: i64,
    pub user_id: Option<i32>,
    pub timestamp: Option<i64>,
}

#[derive(Default)]
struct MemoryState {
    events: Vec<Event>,
    aggregates: BTreeMap<String, StoredAggregate>,
    failing: bool,
    commits: usize,
}

/// In-memory sink with the same additive semantics as `PgSink`, for tests and local
/// runs. Clones share the same tables.
#[derive(Clone)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    chunk_size: usize,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl MemorySink {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            state: Default::default(),
            chunk_size,
        }
    }

    /// While set, every commit fails and leaves the tables untouched.
    pub fn fail_commits(&self, failing: bool) {
        self.state().failing = failing;
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn aggregates(&self) -> BTreeMap<String, StoredAggregate> {
        self.state().aggregates.clone()
    }

    pub fn aggregate(&self, url: &str) -> Option<StoredAggregate> {
        self.state().aggregates.get(url).cloned()
    }

    /// Number of successful commits so far.
    pub fn commits(&self) -> usize {
        self.state().commits
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn commit(&self, batch: &PassBatch) -> Result<CommitSummary, SinkError> {
        let mut state = self.state();
        if state.failing {
            return Err(SinkError::Unavailable(
                "memory sink is set to fail".to_owned(),
            ));
        }

        let mut summary = CommitSummary::default();

        for aggregate in batch.aggregates() {
            state
                .aggregates
                .entry(aggregate.url.clone())
                .and_modify(|stored| {
                    stored.scroll_count += aggregate.count;
                    stored.user_id = aggregate.user_id;
                    stored.timestamp = aggregate.timestamp;
                })
                .or_insert_with(|| StoredAggregate {
                    scroll_count: aggregate.count,
                    user_id: aggregate.user_id,
                    timestamp: aggregate.timestamp,
                });
            summary.aggregates_merged += 1;
        }

        for chunk in chunk_events(batch.events(), self.chunk_size) {
            state.events.extend_from_slice(chunk);
            summary.events_inserted += chunk.len();
            summary.chunks += 1;
        }

        state.commits += 1;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(events: &[Event]) -> PassBatch {
        let mut batch = PassBatch::new();
        for event in events {
            batch.add(event.clone());
        }
        batch
    }

    #[tokio::test]
    async fn upsert_is_additive_across_commits() {
        let sink = MemorySink::default();

        sink.commit(&batch(&[
            Event::new(1, "scroll", "/a", 10),
            Event::new(2, "scroll", "/a", 20),
        ]))
        .await
        .unwrap();
        let summary = sink
            .commit(&batch(&[Event::new(3, "scroll", "/a", 30)]))
            .await
            .unwrap();

        assert_eq!(summary.aggregates_merged, 1);
        assert_eq!(
            sink.aggregate("/a"),
            Some(StoredAggregate {
                scroll_count: 3,
                user_id: Some(3),
                timestamp: Some(30),
            })
        );
        assert_eq!(sink.commits(), 2);
    }

    #[tokio::test]
    async fn pass_through_events_are_chunked() {
        let sink = MemorySink::new(2);
        let events: Vec<Event> = (0..5).map(|i| Event::new(i, "click", "/a", 0)).collect();

        let summary = sink.commit(&batch(&events)).await.unwrap();

        assert_eq!(summary.events_inserted, 5);
        assert_eq!(summary.chunks, 3);
        assert_eq!(sink.events(), events);
    }

    #[tokio::test]
    async fn failing_commit_changes_nothing() {
        let sink = MemorySink::default();
        sink.fail_commits(true);

        let result = sink
            .commit(&batch(&[
                Event::new(1, "scroll", "/a", 10),
                Event::new(1, "click", "/a", 10),
            ]))
            .await;

        assert!(matches!(result, Err(SinkError::Unavailable(_))));
        assert!(sink.events().is_empty());
        assert!(sink.aggregates().is_empty());
        assert_eq!(sink.commits(), 0);
    }
}
