use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};

use grid_client::{domain::ReportRecord, reports::report_path};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};

use crate::pipeline::{PipelineError, Sink};

/// Append-only CSV store, one header-less file per site date.
///
/// Rows are never rewritten or deduplicated; a redelivered reading produces a
/// second identical row.
pub struct CsvReportSink {
    results_dir: PathBuf,
    // Serializes appends so rows from concurrent callers never interleave.
    write_lock: Mutex<()>,
}

impl CsvReportSink {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn encode(record: &ReportRecord) -> Result<Vec<u8>, PipelineError> {
        let row = record
            .to_csv_row()
            .map_err(|e| PipelineError::StoreWrite(e.to_string()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::with_capacity(64));
        writer
            .write_record(&row)
            .map_err(|e| PipelineError::StoreWrite(e.to_string()))?;
        writer
            .into_inner()
            .map_err(|e| PipelineError::StoreWrite(e.to_string()))
    }

    async fn write_row(&self, path: &Path, line: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.results_dir).await?;
        let mut file = fs::OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .await?;

        let start = repair_tail(&mut file, path).await?;
        let written = async {
            file.write_all(line).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            // A partial row would glue itself onto the next append.
            if let Err(trunc) = file.set_len(start).await {
                tracing::error!(path = %path.display(), error = %trunc, "failed to roll back partial row");
            }
            return Err(e);
        }
        file.sync_data().await
    }
}

/// Drop an unterminated last row left by an interrupted write so the next
/// append starts on a fresh line. Returns the resulting file length.
async fn repair_tail(file: &mut fs::File, path: &Path) -> std::io::Result<u64> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1)).await?;
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut contents = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    file.seek(SeekFrom::Start(0)).await?;
    file.read_to_end(&mut contents).await?;
    let keep = contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i as u64 + 1);

    file.set_len(keep).await?;
    metrics::counter!("pv_store_repairs_total").increment(1);
    tracing::warn!(
        path = %path.display(),
        dropped_bytes = len - keep,
        "truncated unterminated row at end of report file"
    );
    Ok(keep)
}

#[async_trait::async_trait]
impl Sink<ReportRecord> for CsvReportSink {
    async fn append(&self, record: &ReportRecord) -> Result<(), PipelineError> {
        let line = Self::encode(record)?;
        let path = report_path(&self.results_dir, record.date());

        let _guard = self.write_lock.lock().await;
        match self.write_row(&path, &line).await {
            Ok(()) => {
                metrics::counter!("pv_records_appended_total").increment(1);
                tracing::debug!(path = %path.display(), total_kw = record.total_kw(), "record appended");
                Ok(())
            }
            Err(e) => {
                metrics::counter!("pv_store_errors_total").increment(1);
                Err(PipelineError::StoreWrite(format!("{}: {e}", path.display())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_client::reports::load_day;
    use std::sync::Arc;
    use time::macros::{date, datetime};

    #[tokio::test]
    async fn rows_land_in_the_file_for_their_date() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvReportSink::new(dir.path().join("results"));

        sink.append(&ReportRecord::new(datetime!(2024-06-21 13:00:00 +1), 1_000, 3_200))
            .await
            .unwrap();
        sink.append(&ReportRecord::new(datetime!(2024-06-22 00:05:00 +1), 750, 0))
            .await
            .unwrap();

        let contents = std::fs::read_to_string(dir.path().join("results/2024-06-21.csv")).unwrap();
        assert_eq!(contents, "2024-06-21T13:00:00+01:00,1000,3200,4200\n");

        let next = load_day(&dir.path().join("results"), date!(2024-06-22)).unwrap();
        assert_eq!(next, vec![ReportRecord::new(datetime!(2024-06-22 00:05:00 +1), 750, 0)]);
    }

    #[tokio::test]
    async fn duplicates_are_appended_not_merged() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvReportSink::new(dir.path());
        let rec = ReportRecord::new(datetime!(2024-06-21 10:30:00 +1), 400, 2_400);

        sink.append(&rec).await.unwrap();
        sink.append(&rec).await.unwrap();

        let rows = load_day(dir.path(), date!(2024-06-21)).unwrap();
        assert_eq!(rows, vec![rec, rec]);
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CsvReportSink::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..32i64 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                let ts = datetime!(2024-06-21 00:00:00 +1) + time::Duration::minutes(5 * i);
                sink.append(&ReportRecord::new(ts, i * 100, 0)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let rows = load_day(dir.path(), date!(2024-06-21)).unwrap();
        assert_eq!(rows.len(), 32);
        assert!(rows.iter().all(|r| r.total_kw() == r.meter_kw + r.pv_kw));
    }

    #[tokio::test]
    async fn unterminated_row_is_dropped_before_appending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024-06-21.csv");
        std::fs::write(
            &path,
            "2024-06-21T10:25:00+01:00,400,2380,2780\n2024-06-21T10:30:00+01:00,81",
        )
        .unwrap();

        let sink = CsvReportSink::new(dir.path());
        let rec = ReportRecord::new(datetime!(2024-06-21 10:35:00 +1), 500, 2_410);
        sink.append(&rec).await.unwrap();

        let rows = load_day(dir.path(), date!(2024-06-21)).unwrap();
        assert_eq!(
            rows,
            vec![
                ReportRecord::new(datetime!(2024-06-21 10:25:00 +1), 400, 2_380),
                rec,
            ]
        );
    }

    #[tokio::test]
    async fn unterminated_only_row_leaves_just_the_new_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2024-06-21.csv"), "2024-06-21T10:30:00+01:00,81").unwrap();

        let sink = CsvReportSink::new(dir.path());
        let rec = ReportRecord::new(datetime!(2024-06-21 10:35:00 +1), 500, 2_410);
        sink.append(&rec).await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("2024-06-21.csv")).unwrap();
        assert_eq!(contents, "2024-06-21T10:35:00+01:00,500,2410,2910\n");
    }

    #[tokio::test]
    async fn unwritable_results_dir_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let sink = CsvReportSink::new(&blocker);
        let res = sink
            .append(&ReportRecord::new(datetime!(2024-06-21 12:00:00 +1), 1, 1))
            .await;
        assert!(matches!(res, Err(PipelineError::StoreWrite(_))));
    }
}
