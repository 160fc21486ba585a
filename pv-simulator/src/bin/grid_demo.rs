//! Producer and consumer in one process over the in-memory queue. Writes one
//! simulated day of reports to the configured results directory.

use std::time::Duration;

use anyhow::Result;
use pv_simulator::{
    broker::{MemoryBroker, RetryPolicy},
    config::AppConfig,
    observability, shutdown,
    sinks::CsvReportSink,
    sources::{ConsumptionGenerator, MeterProducer},
    transform::{PvAggregation, SolarModel},
    PvSimulator,
};
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing("grid_demo");

    let cfg = AppConfig::load()?;
    let offset = cfg.site_offset()?;
    let date = cfg
        .timelapse_date()?
        .unwrap_or_else(|| OffsetDateTime::now_utc().to_offset(offset).date());

    let broker = MemoryBroker::new(&cfg.broker.queue);
    let retry = RetryPolicy::from_config(&cfg.broker);
    let token = shutdown::install();

    let consumer = PvSimulator::new(
        broker.clone(),
        retry.clone(),
        CsvReportSink::new(&cfg.pv.results_dir),
        PvAggregation::new(SolarModel::from_config(&cfg.pv, offset)),
    )
    .with_max_consecutive_store_failures(cfg.pv.max_consecutive_store_failures);
    let consumer_token = token.child_token();
    let consumer = tokio::spawn(consumer.run(consumer_token.clone()));

    let mut meter = MeterProducer::new(
        broker.clone(),
        retry,
        ConsumptionGenerator::from_config(&cfg.meter),
        offset,
        cfg.publish_interval(),
    );
    let published = meter.run_timelapse(date, &token).await?;

    while !broker.is_idle() && !token.is_cancelled() && !consumer.is_finished() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    consumer_token.cancel();
    let stored = consumer.await??;

    tracing::info!(%date, published, stored, results_dir = %cfg.pv.results_dir, "demo day written");
    Ok(())
}
