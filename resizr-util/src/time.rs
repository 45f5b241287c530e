//! Timestamp helpers. `ImageRecord.created_at`/`updated_at` are
//! millisecond-precision UTC instants, matching the teacher's
//! `garage_util::time::now_msec` convention but expressed with `chrono` so
//! JSON responses render RFC 3339 rather than a raw integer.

use chrono::{DateTime, Utc};

/// Current time, truncated to millisecond precision.
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
