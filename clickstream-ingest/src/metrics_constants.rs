pub const EVENTS_PROCESSED: &str = "events_processed_total";
pub const FAILED_EVENTS: &str = "failed_events_total";
pub const EVENT_PROCESSING_DURATION: &str = "event_processing_duration_seconds";
pub const RECV_ERRORS: &str = "clickstream_ingest_recv_errors";
