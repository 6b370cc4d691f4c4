use std::time::Duration;

use health::HealthHandle;
use tracing::{error, info};

use crate::aggregator::Aggregator;
use crate::metrics_constants::PASS_FAILURES;

/// Run aggregation passes forever, waiting `interval` between the end of a pass and the
/// start of the next one. Passes never overlap, however long one takes: two passes in
/// flight would fold the same staged records twice.
///
/// A failed pass is only logged, the next pass retries whatever is still staged.
pub async fn run_scheduler(aggregator: Aggregator, liveness: HealthHandle, interval: Duration) {
    info!(
        "Scheduling aggregation passes {}s apart",
        interval.as_secs_f64()
    );

    loop {
        tokio::time::sleep(interval).await;

        match aggregator.run_pass().await {
            Ok(result) => {
                if result.observed > 0 {
                    info!("Aggregation pass result: {:?}", result);
                }
            }
            Err(e) => {
                error!("Aggregation pass failed with: {}", e);
                metrics::counter!(PASS_FAILURES, "aggregator_id" => aggregator.settings().id.clone())
                    .increment(1);
            }
        }

        liveness.report_healthy().await;
    }
}
