//! Timestamp utilities

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Epoch time of the supplied instant, in whole seconds
pub fn epoch_time(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

/// Convert an epoch timestamp (in seconds) to a filename-safe string.
///
/// E.g., 1653506843 becomes `2022-05-25T1927Z`. Minutes precision, colons
/// stripped. Lexical order of the result matches chronological order, which
/// is what keeps response stream names sortable by time.
pub fn epoch_time_to_iso_str(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%dT%H%MZ").to_string(),
        // out-of-range timestamps keep their raw value
        _ => ts.to_string(),
    }
}
