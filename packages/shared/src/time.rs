use chrono::{DateTime, Utc};

/// Get the current time in UTC.
///
/// The marketplace backend speaks UTC ISO-8601 timestamps, so every
/// client-side timestamp (optimistic messages, typing events) uses UTC too.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Get the current Unix timestamp in milliseconds (UTC).
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
