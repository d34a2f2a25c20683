//! Shared timestamp/id helpers for audit records and entity rows.

use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    format!("{}Z", now_unix_secs())
}

/// Raw epoch seconds, used where temporal comparisons must be exact
/// (project deadlines, decision stamps).
pub fn now_unix_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Entity id with a table prefix, e.g. `PRJ_01J...`.
pub fn new_prefixed_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}
