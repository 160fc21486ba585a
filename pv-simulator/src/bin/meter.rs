use anyhow::Result;
use pv_simulator::{
    broker::{AmqpBroker, RetryPolicy},
    config::{AppConfig, MeterMode},
    metrics_server, observability, shutdown,
    sources::{ConsumptionGenerator, MeterProducer},
};
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing("meter");

    let cfg = AppConfig::load()?;
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr).await?;
    }

    let offset = cfg.site_offset()?;
    let mut meter = MeterProducer::new(
        AmqpBroker::from_config(&cfg.broker),
        RetryPolicy::from_config(&cfg.broker),
        ConsumptionGenerator::from_config(&cfg.meter),
        offset,
        cfg.publish_interval(),
    );
    let token = shutdown::install();

    let published = match cfg.meter.mode {
        MeterMode::Live => meter.run_live(&token).await?,
        MeterMode::Timelapse => {
            let date = cfg
                .timelapse_date()?
                .unwrap_or_else(|| OffsetDateTime::now_utc().to_offset(offset).date());
            meter.run_timelapse(date, &token).await?
        }
    };

    tracing::info!(published, "clean exit");
    Ok(())
}
