use clickstream_common::batch::PassBatch;
use clickstream_common::event::Event;
use clickstream_common::sink::{PgSink, Sink};
use sqlx::PgPool;

fn batch(events: Vec<Event>) -> PassBatch {
    let mut batch = PassBatch::new();
    for event in events {
        batch.add(event);
    }
    batch
}

async fn scroll_count(db: &PgPool, url: &str) -> Option<i64> {
    sqlx::query_scalar("SELECT scroll_count FROM scroll_events WHERE url = $1")
        .bind(url)
        .fetch_optional(db)
        .await
        .expect("failed to read scroll_events")
}

async fn event_count(db: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(db)
        .await
        .expect("failed to count events")
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "requires postgres via DATABASE_URL"]
async fn test_scroll_upsert_adds_to_running_total(db: PgPool) {
    let sink = PgSink::with_default_chunk_size(db.clone());

    sink.commit(&batch(vec![
        Event::new(1, "scroll", "/a", 10),
        Event::new(2, "scroll", "/a", 20),
    ]))
    .await
    .unwrap();
    sink.commit(&batch(vec![Event::new(3, "scroll", "/a", 30)]))
        .await
        .unwrap();

    assert_eq!(scroll_count(&db, "/a").await, Some(3));

    let (user_id, timestamp): (Option<i32>, Option<i64>) =
        sqlx::query_as("SELECT user_id, timestamp FROM scroll_events WHERE url = $1")
            .bind("/a")
            .fetch_one(&db)
            .await
            .unwrap();
    assert_eq!(user_id, Some(3));
    assert_eq!(timestamp, Some(30));
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "requires postgres via DATABASE_URL"]
async fn test_events_inserted_in_chunks(db: PgPool) {
    let sink = PgSink::from_pool(db.clone(), 7);
    let events: Vec<Event> = (0..25)
        .map(|i| Event::new(i, "click", "/pricing", i64::from(i)))
        .collect();

    let summary = sink.commit(&batch(events)).await.unwrap();

    assert_eq!(summary.events_inserted, 25);
    assert_eq!(summary.chunks, 4);
    assert_eq!(event_count(&db).await, 25);
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "requires postgres via DATABASE_URL"]
async fn test_failed_commit_rolls_back_everything(db: PgPool) {
    let sink = PgSink::with_default_chunk_size(db.clone());

    // Break the events table so the second half of the commit fails
    sqlx::query("ALTER TABLE events RENAME TO events_gone")
        .execute(&db)
        .await
        .unwrap();

    let result = sink
        .commit(&batch(vec![
            Event::new(1, "scroll", "/a", 10),
            Event::new(1, "click", "/a", 10),
        ]))
        .await;

    assert!(result.is_err());
    assert_eq!(scroll_count(&db, "/a").await, None);
}
