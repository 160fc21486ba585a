use grid_client::domain::{Reading, ReportRecord};
use time::{Date, OffsetDateTime, UtcOffset};

use crate::broker::Delivery;
use crate::pipeline::{Envelope, PipelineError};

pub mod solar;

pub use solar::{SolarModel, SolarWindow};

// 9999-01-01T00:00:00Z; later instants cannot be shifted into every site offset.
const LATEST_UNIX_TS: i64 = 253_370_764_800;

/// Decode a delivery into a reading in site time.
///
/// The body must be a decimal integer. The event time is the carried unix
/// timestamp, or `received_at` when it is absent or unusable.
pub fn parse_reading(
    delivery: &Delivery,
    received_at: OffsetDateTime,
    offset: UtcOffset,
) -> Result<Envelope<Reading>, PipelineError> {
    let body = std::str::from_utf8(&delivery.message.body)
        .map_err(|_| PipelineError::Malformed("body is not valid UTF-8".to_string()))?;
    let value_kw: i64 = body
        .trim()
        .parse()
        .map_err(|_| PipelineError::Malformed(format!("body '{body}' is not an integer")))?;

    let ts = match delivery.message.timestamp {
        Some(ts) if (0..LATEST_UNIX_TS).contains(&ts) => {
            OffsetDateTime::from_unix_timestamp(ts).unwrap_or(received_at)
        }
        Some(ts) => {
            tracing::warn!(timestamp = ts, "unusable message timestamp, using receive time");
            received_at
        }
        None => {
            tracing::debug!("message carries no timestamp, using receive time");
            received_at
        }
    };

    Ok(Envelope {
        payload: Reading::new(value_kw, ts.to_offset(offset)),
        received_at,
        redelivered: delivery.redelivered,
    })
}

/// Joins a meter reading with the simulated PV output at the same instant.
///
/// The solar window of the most recent site date is cached; readings arrive
/// roughly in order, so it is recomputed about once per day.
#[derive(Debug, Clone)]
pub struct PvAggregation {
    solar: SolarModel,
    cached: Option<(Date, Option<SolarWindow>)>,
}

impl PvAggregation {
    pub fn new(solar: SolarModel) -> Self {
        Self { solar, cached: None }
    }

    pub fn offset(&self) -> UtcOffset {
        self.solar.offset
    }

    fn window(&mut self, date: Date) -> Option<SolarWindow> {
        match self.cached {
            Some((d, w)) if d == date => w,
            _ => {
                let w = self.solar.window(date);
                match &w {
                    Some(w) => tracing::debug!(%date, sunrise = %w.sunrise, sunset = %w.sunset, "solar window"),
                    None => tracing::debug!(%date, "sun stays below the horizon"),
                }
                self.cached = Some((date, w));
                w
            }
        }
    }

    pub fn apply(&mut self, env: &Envelope<Reading>) -> ReportRecord {
        let ts = env.payload.ts.to_offset(self.solar.offset);
        let pv_kw = self
            .window(ts.date())
            .map_or(0, |w| w.output_kw(ts, self.solar.max_output_kw));
        ReportRecord::new(ts, env.payload.value_kw, pv_kw)
    }
}
