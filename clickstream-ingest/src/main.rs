use std::sync::Arc;
use std::time::Duration;

use clickstream_ingest::config::Config;
use clickstream_ingest::http::app;
use clickstream_ingest::ingestor::{run_ingest, Ingestor};
use common_kafka::kafka_consumer::SingleTopicConsumer;
use common_metrics::{serve, setup_metrics_routes};
use common_s3::{S3Client, S3Impl};
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

    let store = S3Impl::from_config(&config.s3).await;
    store
        .ensure_bucket(&config.staging_bucket)
        .await
        .wrap_err("failed to create the staging bucket")?;

    // Statistics are emitted every 10s, only while librdkafka is polling
    let kafka_liveness = liveness
        .register("rdkafka", Duration::from_secs(30))
        .await;
    let consumer = SingleTopicConsumer::new(
        config.kafka.clone(),
        config.consumer.clone(),
        kafka_liveness,
    )
    .wrap_err("failed to create the kafka consumer")?;

    info!(
        "Staging events from {} into {}",
        consumer.topic(),
        config.staging_bucket
    );
    let ingestor = Ingestor::new(
        Arc::new(store),
        config.staging_bucket.clone(),
        config.staging_prefix.clone(),
    );

    let ingest_loop = tokio::spawn(run_ingest(consumer, ingestor));

    let router = setup_metrics_routes(app(liveness))?;
    let bind = config.bind();
    let http_server = tokio::spawn(async move { serve(router, &bind).await });

    tokio::select! {
        res = ingest_loop => {
            error!("ingest loop exited");
            if let Err(e) = res {
                error!("ingest loop failed with: {}", e)
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
