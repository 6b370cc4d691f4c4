pub const PASS_STARTS: &str = "clickstream_aggregator_pass_starts";
pub const PASS_ENDS: &str = "clickstream_aggregator_pass_ends";
pub const PASS_FAILURES: &str = "clickstream_aggregator_pass_failures";
pub const PASS_TIME: &str = "clickstream_aggregator_pass_ms";

pub const LIST_TIME: &str = "clickstream_aggregator_list_ms";
pub const CLASSIFY_TIME: &str = "clickstream_aggregator_classify_ms";
pub const COMMIT_TIME: &str = "clickstream_aggregator_commit_ms";
pub const RETIRE_TIME: &str = "clickstream_aggregator_retire_ms";

pub const AGGREGATES_MERGED: &str = "clickstream_aggregator_aggregates_merged";
pub const EVENTS_INSERTED: &str = "clickstream_aggregator_events_inserted";
pub const RECORDS_RETIRED: &str = "clickstream_aggregator_records_retired";

// Gauge of the staged objects seen by the last pass
pub const STAGED_OBJECTS: &str = "minio_objects_count";

pub const PROCESSED_EVENTS_BY_TYPE: &str = "processed_events_by_type_total";
pub const FAILED_EVENTS: &str = "failed_events_total";
