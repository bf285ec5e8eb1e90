//! ID generation. All randomness is a v4 UUID in hex-with-dashes form
//! (spec.md §6.2); prefixes identify the record kind.

use uuid::Uuid;

fn prefixed(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4())
}

pub fn inbox_id() -> String {
    prefixed("evt")
}

pub fn outbox_id() -> String {
    prefixed("out")
}

pub fn turn_id() -> String {
    prefixed("turn")
}

pub fn lease_token() -> String {
    prefixed("lease")
}

/// Current time in milliseconds since epoch (spec.md §3: "Time is
/// milliseconds since epoch unless noted").
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
