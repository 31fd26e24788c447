pub mod app;
pub mod recording_sink;
pub mod test_metrics;

use chrono::{DateTime, Local, TimeZone};

/// A fixed local timestamp, `second` seconds after 2024-03-01 10:00:00.
pub fn at(second: u32) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(2024, 3, 1, 10, 0, 0)
        .unwrap()
        .checked_add_signed(chrono::Duration::seconds(second as i64))
        .unwrap()
}
