use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, warn};

use super::{CommitSummary, Sink, SinkError, DEFAULT_CHUNK_SIZE};
use crate::batch::{chunk_events, PassBatch};

const UPSERT_SCROLL_AGGREGATE: &str = r#"
INSERT INTO scroll_events (url, scroll_count, user_id, timestamp)
VALUES ($1, $2, $3, $4)
ON CONFLICT (url) DO UPDATE SET
    scroll_count = scroll_events.scroll_count + EXCLUDED.scroll_count,
    user_id = EXCLUDED.user_id,
    timestamp = EXCLUDED.timestamp
"#;

// Postgres caps a statement at u16::MAX bind parameters, each events row binds 4
const EVENT_ROW_BINDS: usize = 4;
pub const MAX_INSERT_CHUNK_SIZE: usize = u16::MAX as usize / EVENT_ROW_BINDS;

/// Rows per insert statement, kept within what Postgres accepts.
pub fn insert_chunk_size(requested: usize) -> usize {
    requested.clamp(1, MAX_INSERT_CHUNK_SIZE)
}

/// A sink backed by the `events` and `scroll_events` PostgreSQL tables.
pub struct PgSink {
    pool: PgPool,
    chunk_size: usize,
}

impl PgSink {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        chunk_size: usize,
    ) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|error| SinkError::ConnectionError { error })?;

        Ok(Self::from_pool(pool, chunk_size))
    }

    pub fn from_pool(pool: PgPool, chunk_size: usize) -> Self {
        if chunk_size > MAX_INSERT_CHUNK_SIZE {
            warn!(
                "insert chunk size {} exceeds the postgres bind limit, using {}",
                chunk_size, MAX_INSERT_CHUNK_SIZE
            );
        }
        Self {
            pool,
            chunk_size: insert_chunk_size(chunk_size),
        }
    }

    pub fn with_default_chunk_size(pool: PgPool) -> Self {
        Self::from_pool(pool, DEFAULT_CHUNK_SIZE)
    }

    /// Create the tables if needed.
    pub async fn migrate(&self) -> Result<(), SinkError> {
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn query_error(command: &str) -> impl FnOnce(sqlx::Error) -> SinkError + '_ {
    move |error| SinkError::QueryError {
        command: command.to_owned(),
        error,
    }
}

#[async_trait]
impl Sink for PgSink {
    /// Write the whole batch in one transaction. Dropping the transaction on an early
    /// return rolls it back.
    async fn commit(&self, batch: &PassBatch) -> Result<CommitSummary, SinkError> {
        let mut summary = CommitSummary::default();
        let mut tx = self.pool.begin().await.map_err(query_error("BEGIN"))?;

        for aggregate in batch.aggregates() {
            sqlx::query(UPSERT_SCROLL_AGGREGATE)
                .bind(&aggregate.url)
                .bind(aggregate.count)
                .bind(aggregate.user_id)
                .bind(aggregate.timestamp)
                .execute(&mut *tx)
                .await
                .map_err(query_error("UPSERT scroll_events"))?;
            summary.aggregates_merged += 1;
        }

        for chunk in chunk_events(batch.events(), self.chunk_size) {
            let mut query = QueryBuilder::<Postgres>::new(
                "INSERT INTO events (user_id, event_type, url, timestamp) ",
            );
            query.push_values(chunk, |mut row, event| {
                row.push_bind(event.user_id)
                    .push_bind(event.event_type.as_str())
                    .push_bind(event.url.as_str())
                    .push_bind(event.timestamp);
            });

            query
                .build()
                .execute(&mut *tx)
                .await
                .map_err(query_error("INSERT events"))?;

            debug!("inserted chunk of {} events", chunk.len());
            summary.events_inserted += chunk.len();
            summary.chunks += 1;
        }

        tx.commit().await.map_err(query_error("COMMIT"))?;

        Ok(summary)
    }
}
