use chrono::{DateTime, Utc};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts an epoch-millisecond column back to a timestamp, clamping
/// out-of-range values to the epoch rather than failing the row.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
