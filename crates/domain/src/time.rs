//! Time and timestamp helpers.

use chrono::{DateTime, Utc};

/// UTC timestamp used for schedule computations.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Time left from `from` until `until`, clamped at zero when `until` is in the past.
#[must_use]
pub fn until(from: Timestamp, until: Timestamp) -> std::time::Duration {
    (until - from).to_std().unwrap_or_default()
}
