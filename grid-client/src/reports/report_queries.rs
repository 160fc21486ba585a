use std::{
    collections::BTreeMap,
    fs::File,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use time::{macros::format_description, Date};

use crate::domain::ReportRecord;

/// File name of the day partition, `YYYY-MM-DD.csv`.
pub fn report_file_name(date: Date) -> String {
    let fmt = format_description!("[year]-[month]-[day]");
    // Four-digit years always format; fall back to the Display impl otherwise.
    let day = date.format(&fmt).unwrap_or_else(|_| date.to_string());
    format!("{day}.csv")
}

pub fn report_path(results_dir: &Path, date: Date) -> PathBuf {
    results_dir.join(report_file_name(date))
}

/// Load every persisted record for one calendar date, in file order.
///
/// A missing partition means nothing was recorded that day and yields an
/// empty vector. Duplicates from redelivery are returned as they are.
pub fn load_day(results_dir: &Path, date: Date) -> Result<Vec<ReportRecord>> {
    let path = report_path(results_dir, date);
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to open {}", path.display())),
    };

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(file);

    let mut records = Vec::new();
    for (line, row) in rdr.records().enumerate() {
        let row = row.with_context(|| format!("{}: unreadable row {}", path.display(), line + 1))?;
        let record = ReportRecord::from_csv_row(&row)
            .with_context(|| format!("{}: corrupt row {}", path.display(), line + 1))?;
        records.push(record);
    }

    Ok(records)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaySummary {
    pub date: Date,
    pub records: usize,
    pub distinct_timestamps: usize,
    pub peak_meter_kw: i64,
    pub peak_pv_kw: i64,
    pub mean_total_kw: f64,
}

/// Summarize a day of records, counting each timestamp once.
///
/// Redelivered readings share their timestamp with the original, so the first
/// record seen for a timestamp wins.
pub fn summarize_day(date: Date, records: &[ReportRecord]) -> DaySummary {
    let mut by_ts = BTreeMap::new();
    for r in records {
        by_ts.entry(r.ts).or_insert(*r);
    }

    let peak_meter_kw = by_ts.values().map(|r| r.meter_kw).max().unwrap_or(0);
    let peak_pv_kw = by_ts.values().map(|r| r.pv_kw).max().unwrap_or(0);
    let mean_total_kw = if by_ts.is_empty() {
        0.0
    } else {
        by_ts.values().map(|r| r.total_kw() as f64).sum::<f64>() / by_ts.len() as f64
    };

    DaySummary {
        date,
        records: records.len(),
        distinct_timestamps: by_ts.len(),
        peak_meter_kw,
        peak_pv_kw,
        mean_total_kw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use time::macros::{date, datetime};

    #[test]
    fn file_name_is_iso_date() {
        assert_eq!(report_file_name(date!(2024-01-05)), "2024-01-05.csv");
    }

    #[test]
    fn missing_partition_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = load_day(dir.path(), date!(2024-06-21)).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn load_day_reads_headerless_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = File::create(report_path(dir.path(), date!(2024-06-21))).unwrap();
        writeln!(f, "2024-06-21T10:30:00+01:00,812,2400,3212").unwrap();
        writeln!(f, "2024-06-21T10:35:00+01:00,900,2450,3350").unwrap();
        drop(f);

        let records = load_day(dir.path(), date!(2024-06-21)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ts, datetime!(2024-06-21 10:30:00 +01:00));
        assert!(records.iter().all(|r| r.total_kw() == r.meter_kw + r.pv_kw));
    }

    #[test]
    fn load_day_rejects_corrupt_total() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = File::create(report_path(dir.path(), date!(2024-06-21))).unwrap();
        writeln!(f, "2024-06-21T10:30:00+01:00,812,2400,1").unwrap();
        drop(f);

        assert!(load_day(dir.path(), date!(2024-06-21)).is_err());
    }

    #[test]
    fn summary_counts_redelivered_timestamps_once() {
        let a = ReportRecord::new(datetime!(2024-06-21 12:00:00 +01:00), 1000, 3000);
        let b = ReportRecord::new(datetime!(2024-06-21 12:05:00 +01:00), 2000, 3100);
        let records = vec![a, b, b];

        let s = summarize_day(date!(2024-06-21), &records);
        assert_eq!(s.records, 3);
        assert_eq!(s.distinct_timestamps, 2);
        assert_eq!(s.peak_meter_kw, 2000);
        assert_eq!(s.peak_pv_kw, 3100);
        assert!((s.mean_total_kw - 4550.0).abs() < 1e-9);
    }

    #[test]
    fn empty_summary_is_zeroed() {
        let s = summarize_day(date!(2024-06-21), &[]);
        assert_eq!(s.distinct_timestamps, 0);
        assert_eq!(s.mean_total_kw, 0.0);
    }
}
