use csv::StringRecord;
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime};

/// Column order of a persisted report row. Files carry no header.
pub const REPORT_COLUMNS: [&str; 4] = [
    "timestamp",
    "pv_meter",
    "pv_photovoltaic",
    "pv_total_meter_photovoltaic",
];

#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    #[error("expected {expected} columns, found {found}")]
    ColumnCount { expected: usize, found: usize },
    #[error("invalid timestamp '{0}'")]
    Timestamp(String),
    #[error("invalid {column} value '{value}'")]
    Number { column: &'static str, value: String },
    #[error("total {total} does not match meter {meter_kw} + pv {pv_kw}")]
    TotalMismatch { meter_kw: i64, pv_kw: i64, total: i64 },
    #[error("failed to format timestamp: {0}")]
    Format(#[from] time::error::Format),
}

/// Meter reading merged with the simulated PV output for the same instant.
///
/// The total is always recomputed from its inputs; it is written to disk but
/// never held as a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportRecord {
    pub ts: OffsetDateTime,
    pub meter_kw: i64,
    pub pv_kw: i64,
}

impl ReportRecord {
    pub fn new(ts: OffsetDateTime, meter_kw: i64, pv_kw: i64) -> Self {
        Self { ts, meter_kw, pv_kw }
    }

    pub fn total_kw(&self) -> i64 {
        self.meter_kw + self.pv_kw
    }

    /// Calendar date used to pick the destination file, in the offset the
    /// timestamp carries.
    pub fn date(&self) -> Date {
        self.ts.date()
    }

    pub fn to_csv_row(&self) -> Result<[String; 4], RecordError> {
        Ok([
            self.ts.format(&Rfc3339)?,
            self.meter_kw.to_string(),
            self.pv_kw.to_string(),
            self.total_kw().to_string(),
        ])
    }

    pub fn from_csv_row(row: &StringRecord) -> Result<Self, RecordError> {
        if row.len() != REPORT_COLUMNS.len() {
            return Err(RecordError::ColumnCount {
                expected: REPORT_COLUMNS.len(),
                found: row.len(),
            });
        }

        let ts_str = row[0].trim();
        let ts = OffsetDateTime::parse(ts_str, &Rfc3339)
            .map_err(|_| RecordError::Timestamp(ts_str.to_string()))?;

        let meter_kw = parse_kw(&row[1], "pv_meter")?;
        let pv_kw = parse_kw(&row[2], "pv_photovoltaic")?;
        let total = parse_kw(&row[3], "pv_total_meter_photovoltaic")?;

        let record = Self { ts, meter_kw, pv_kw };
        if record.total_kw() != total {
            return Err(RecordError::TotalMismatch { meter_kw, pv_kw, total });
        }

        Ok(record)
    }
}

fn parse_kw(s: &str, column: &'static str) -> Result<i64, RecordError> {
    s.trim().parse().map_err(|_| RecordError::Number {
        column,
        value: s.to_string(),
    })
}
