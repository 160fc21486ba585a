mod reading;
mod report_record;

pub use reading::Reading;
pub use report_record::{RecordError, ReportRecord, REPORT_COLUMNS};
