use std::path::Path;

use anyhow::{Context, Result};
use grid_client::reports::{load_day, summarize_day};
use pv_simulator::{config::AppConfig, observability};
use time::{macros::format_description, Date, OffsetDateTime};

/// Usage: `daily-report [YYYY-MM-DD]`, defaulting to today in site time.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing("daily_report");

    let cfg = AppConfig::load()?;
    let date = match std::env::args().nth(1) {
        Some(arg) => Date::parse(&arg, &format_description!("[year]-[month]-[day]"))
            .with_context(|| format!("invalid date '{arg}', expected YYYY-MM-DD"))?,
        None => OffsetDateTime::now_utc().to_offset(cfg.site_offset()?).date(),
    };

    let dir = Path::new(&cfg.pv.results_dir);
    let records = load_day(dir, date)?;
    let summary = summarize_day(date, &records);

    if summary.records == 0 {
        tracing::info!(%date, results_dir = %dir.display(), "no records for this date");
        return Ok(());
    }

    tracing::info!(
        %date,
        records = summary.records,
        distinct_timestamps = summary.distinct_timestamps,
        duplicates = summary.records - summary.distinct_timestamps,
        peak_meter_kw = summary.peak_meter_kw,
        peak_pv_kw = summary.peak_pv_kw,
        mean_total_kw = summary.mean_total_kw,
        "daily summary"
    );
    Ok(())
}
