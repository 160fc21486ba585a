use anyhow::Result;
use pv_simulator::{
    broker::{AmqpBroker, RetryPolicy},
    config::AppConfig,
    metrics_server, observability, shutdown,
    sinks::CsvReportSink,
    transform::{PvAggregation, SolarModel},
    PvSimulator,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing("pv_simulator");

    let cfg = AppConfig::load()?;
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr).await?;
    }

    let offset = cfg.site_offset()?;
    let solar = SolarModel::from_config(&cfg.pv, offset);
    tracing::info!(
        latitude = solar.latitude,
        longitude = solar.longitude,
        max_output_kw = solar.max_output_kw,
        results_dir = %cfg.pv.results_dir,
        "starting pv simulator"
    );

    let simulator = PvSimulator::new(
        AmqpBroker::from_config(&cfg.broker),
        RetryPolicy::from_config(&cfg.broker),
        CsvReportSink::new(&cfg.pv.results_dir),
        PvAggregation::new(solar),
    )
    .with_max_consecutive_store_failures(cfg.pv.max_consecutive_store_failures);

    let stored = simulator.run(shutdown::install()).await?;
    tracing::info!(stored, "clean exit");
    Ok(())
}
