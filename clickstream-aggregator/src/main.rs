use std::sync::Arc;

use clickstream_aggregator::aggregator::Aggregator;
use clickstream_aggregator::config::Config;
use clickstream_aggregator::http::app;
use clickstream_aggregator::scheduler::run_scheduler;
use clickstream_common::sink::PgSink;
use common_metrics::{serve, setup_metrics_routes};
use common_s3::S3Impl;
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use health::HealthRegistry;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;

    let liveness = HealthRegistry::new("liveness");

    let sink = PgSink::new(
        &config.database_url,
        config.pg_max_connections,
        config.insert_chunk_size,
    )
    .await
    .wrap_err("failed to connect to the sink")?;
    sink.migrate()
        .await
        .wrap_err("failed to migrate the sink")?;

    let store = S3Impl::from_config(&config.s3).await;

    let settings = config.aggregator_settings();
    info!(
        "Starting aggregator {} against {}/{}",
        settings.id, settings.bucket, settings.prefix
    );
    let aggregator = Aggregator::new(Arc::new(store), Arc::new(sink), settings);

    let aggregator_liveness = liveness
        .register("aggregator", config.liveness_deadline())
        .await;

    let scheduler = tokio::spawn(run_scheduler(
        aggregator,
        aggregator_liveness,
        config.pass_interval(),
    ));

    let router = setup_metrics_routes(app(liveness))?;
    let bind = config.bind();
    let http_server = tokio::spawn(async move { serve(router, &bind).await });

    tokio::select! {
        res = scheduler => {
            error!("aggregation scheduler exited");
            if let Err(e) = res {
                error!("scheduler failed with: {}", e)
            }
        }
        res = http_server => {
            error!("http server exited");
            match res {
                Ok(Err(e)) => error!("server failed with: {}", e),
                Err(e) => error!("server task failed with: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    info!("exiting");

    Ok(())
}
