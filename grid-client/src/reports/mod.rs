mod report_queries;

pub use report_queries::{load_day, report_file_name, report_path, summarize_day, DaySummary};
