use async_trait::async_trait;
use thiserror::Error;

use crate::batch::PassBatch;

mod memory;
mod postgres;

pub use memory::{MemorySink, StoredAggregate};
pub use postgres::{insert_chunk_size, PgSink, MAX_INSERT_CHUNK_SIZE};

pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Enumeration of errors for writes to the sink.
/// Errors originating from sqlx are wrapped to keep the statement that failed.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("running migrations failed with: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub aggregates_merged: usize,
    pub events_inserted: usize,
    pub chunks: usize,
}

/// Final store for a pass: additive upserts for scroll aggregates and bulk inserts for
/// everything else.
///
/// A commit is all or nothing. When it returns an error, none of the batch may be
/// visible in the sink, otherwise retrying the staged records would double count.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn commit(&self, batch: &PassBatch) -> Result<CommitSummary, SinkError>;
}
