//! Time utilities for PhantomID.
//!
//! All timestamps are Unix epoch seconds (i64), matching the snapshot
//! record layout.

/// Lifetime granted to a freshly created account.
pub const ACCOUNT_LIFETIME_SECS: i64 = 90 * 24 * 60 * 60;

/// Return the current time as seconds since Unix epoch.
///
/// A clock set before the epoch reads as 0.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Convert epoch seconds to an RFC 3339 string.
pub fn secs_to_rfc3339(secs: i64) -> String {
    let dt = chrono::DateTime::from_timestamp(secs, 0).unwrap_or(chrono::DateTime::UNIX_EPOCH);
    dt.to_rfc3339()
}

/// Format epoch seconds as `YYYY-MM-DD HH:MM:SS UTC` for human output.
pub fn secs_to_datetime(secs: i64) -> String {
    let dt = chrono::DateTime::from_timestamp(secs, 0).unwrap_or(chrono::DateTime::UNIX_EPOCH);
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
