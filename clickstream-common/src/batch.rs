use std::collections::HashMap;

use crate::event::{Event, EventKind};

/// Scroll events seen for one url during a single pass.
///
/// `count` only covers this pass: the sink adds it to the stored running total.
/// `user_id` and `timestamp` come from the last event folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollAggregate {
    pub url: String,
    pub count: i64,
    pub user_id: Option<i32>,
    pub timestamp: Option<i64>,
}

impl ScrollAggregate {
    fn new(event: Event) -> Self {
        Self {
            url: event.url,
            count: 1,
            user_id: event.user_id,
            timestamp: event.timestamp,
        }
    }

    fn fold(&mut self, event: Event) {
        self.count += 1;
        self.user_id = event.user_id;
        self.timestamp = event.timestamp;
    }
}

/// Everything one aggregation pass hands to the sink: scroll aggregates keyed by url,
/// and the pass-through events to archive.
#[derive(Debug, Default)]
pub struct PassBatch {
    aggregates: HashMap<String, ScrollAggregate>,
    events: Vec<Event>,
}

impl PassBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route an event to its side of the batch. Merging is commutative, so the order
    /// events are added in only matters for the carried user/timestamp columns.
    pub fn add(&mut self, event: Event) -> EventKind {
        let kind = event.kind();
        match kind {
            EventKind::Scroll => match self.aggregates.get_mut(&event.url) {
                Some(aggregate) => aggregate.fold(event),
                None => {
                    self.aggregates
                        .insert(event.url.clone(), ScrollAggregate::new(event));
                }
            },
            EventKind::PassThrough => self.events.push(event),
        }
        kind
    }

    pub fn aggregates(&self) -> impl Iterator<Item = &ScrollAggregate> {
        self.aggregates.values()
    }

    pub fn aggregate(&self, url: &str) -> Option<&ScrollAggregate> {
        self.aggregates.get(url)
    }

    pub fn aggregate_count(&self) -> usize {
        self.aggregates.len()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty() && self.events.is_empty()
    }
}

/// Split pass-through events into insert statements of at most `chunk_size` rows.
/// Events carry no grouping, so any boundary is safe. A size of 0 is treated as 1.
pub fn chunk_events(events: &[Event], chunk_size: usize) -> std::slice::Chunks<'_, Event> {
    events.chunks(chunk_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scroll_events_merge_per_url() {
        let mut batch = PassBatch::new();

        for (user, ts) in [(1, 10), (2, 20), (3, 30)] {
            assert_eq!(batch.add(Event::new(user, "scroll", "/a", ts)), EventKind::Scroll);
        }
        batch.add(Event::new(4, "scroll", "/b", 40));

        assert_eq!(batch.aggregate_count(), 2);
        assert_eq!(
            batch.aggregate("/a"),
            Some(&ScrollAggregate {
                url: "/a".to_string(),
                count: 3,
                user_id: Some(3),
                timestamp: Some(30),
            })
        );
        assert_eq!(batch.aggregate("/b").map(|a| a.count), Some(1));
        assert!(batch.events().is_empty());
    }

    #[test]
    fn other_events_pass_through_untouched() {
        let mut batch = PassBatch::new();
        let click = Event::new(7, "click", "/a", 1);
        let view = Event::new(7, "pageview", "/a", 2);

        assert_eq!(batch.add(click.clone()), EventKind::PassThrough);
        batch.add(view.clone());
        // No dedup on the pass-through side
        batch.add(click.clone());

        assert_eq!(batch.events(), &[click.clone(), view, click]);
        assert_eq!(batch.aggregate_count(), 0);
        assert!(!batch.is_empty());
    }

    #[test]
    fn chunking_covers_every_event_once() {
        let events: Vec<Event> = (0..250)
            .map(|i| Event::new(i, "click", "/a", i64::from(i)))
            .collect();

        let chunks: Vec<&[Event]> = chunk_events(&events, 100).collect();
        assert_eq!(
            chunks.iter().map(|c| c.len()).collect::<Vec<_>>(),
            vec![100, 100, 50]
        );
        assert_eq!(chunks.concat(), events);

        assert_eq!(chunk_events(&events, 0).count(), 250);
        assert_eq!(chunk_events(&[], 100).count(), 0);
    }
}
