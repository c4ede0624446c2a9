//! Record fixtures.
//!
//! Timestamps are given in seconds since the Unix epoch so tests can state
//! their ordering plainly.

use chrono::{DateTime, TimeZone, Utc};
use progress_sync_protocol::{ProgressRecord, UserId};

/// Returns the UTC time `secs` seconds after the epoch.
///
/// # Panics
///
/// Panics if `secs` is out of chrono's range.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .expect("Timestamp out of range")
}

/// Creates an unsynced record.
///
/// # Panics
///
/// Panics if `percentage` exceeds 100.
pub fn progress(user: &str, subject: &str, percentage: u8, secs: i64) -> ProgressRecord {
    ProgressRecord::new(user.into(), subject.into(), percentage, ts(secs))
        .expect("Invalid percentage")
}

/// Creates `count` records for distinct subjects `{prefix}-0..{prefix}-{count}`.
pub fn subjects(user: &str, prefix: &str, count: usize, secs: i64) -> Vec<ProgressRecord> {
    (0..count)
        .map(|i| progress(user, &format!("{prefix}-{i}"), (i % 101) as u8, secs))
        .collect()
}

/// Creates a timestamp `secs_ago` seconds before now.
///
/// `recent(0)` taken after a cycle falls inside the next incremental window.
pub fn recent(secs_ago: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::seconds(secs_ago)
}

/// Returns the user ID used by default in fixtures.
pub fn default_user() -> UserId {
    UserId::from("learner-1")
}
