use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only event type that is aggregated rather than archived as-is.
pub const SCROLL_EVENT_TYPE: &str = "scroll";

const STAGED_KEY_SUFFIX_LEN: usize = 9;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("invalid event payload: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// A user interaction, as produced onto the clickstream topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub user_id: Option<i32>,
    pub event_type: String,
    pub url: String,
    /// Epoch milliseconds, set by the producer.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Folded into the per-url scroll counters.
    Scroll,
    /// Inserted into the events table untouched.
    PassThrough,
}

impl Event {
    pub fn new(user_id: i32, event_type: &str, url: &str, timestamp: i64) -> Self {
        Self {
            user_id: Some(user_id),
            event_type: event_type.to_owned(),
            url: url.to_owned(),
            timestamp: Some(timestamp),
        }
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, EventError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, EventError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn kind(&self) -> EventKind {
        if self.is_scroll() {
            EventKind::Scroll
        } else {
            EventKind::PassThrough
        }
    }

    pub fn is_scroll(&self) -> bool {
        self.event_type == SCROLL_EVENT_TYPE
    }
}

/// Object key an event is staged under: `event_{type}_{epoch ms}_{random}.json`.
///
/// Staged objects are never overwritten, so the random suffix has to keep two events of
/// the same type staged within the same millisecond apart.
pub fn staged_key(event: &Event) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STAGED_KEY_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();

    format!(
        "event_{}_{}_{}.json",
        sanitize_key_part(&event.event_type),
        Utc::now().timestamp_millis(),
        suffix
    )
}

// Event types come straight from producers, keep them from introducing path separators
fn sanitize_key_part(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
