//! Time utilities and constants for the exchanger.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Import timing constants.
pub mod constants {
    use super::Duration;

    /// Refresh frequencies a provider may be configured with, in imports per day.
    pub const REFRESH_TIMES_PER_DAY: [u32; 8] = [1, 2, 3, 4, 6, 8, 12, 24];

    /// Length of the day the refresh frequency divides.
    pub fn refresh_day() -> Duration {
        Duration::hours(24)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Current calendar date in UTC, used for historical snapshots.
pub fn today() -> NaiveDate {
    now().date_naive()
}

/// Interval between two imports for a provider refreshing `times_per_day` times.
///
/// Zero is treated as once a day.
pub fn refresh_period(times_per_day: u32) -> Duration {
    let times = i32::try_from(times_per_day.max(1)).unwrap_or(i32::MAX);
    constants::refresh_day() / times
}

/// Whether a refresh is due at `now` given the last completed refresh.
pub fn refresh_due(last_refreshed_at: Option<Timestamp>, now: Timestamp, times_per_day: u32) -> bool {
    match last_refreshed_at {
        None => true,
        Some(last) => now - last >= refresh_period(times_per_day),
    }
}
