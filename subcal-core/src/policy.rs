//! Cache staleness policy.
//!
//! Every cache entry carries two deadlines: a soft `refresh_after`, past which
//! the data is stale and eligible for refresh but still servable, and a hard
//! expiry enforced by the store itself. The soft interval is graduated by how
//! far in the future the cached month lies - near months churn, far months
//! rarely change.

use std::time::Duration;

use chrono::{DateTime, Datelike, Months, Utc};
use rand::Rng;

/// Bumping this invalidates every existing cache entry without deletion:
/// all keys embed it as a `:vN` suffix.
pub const CACHE_VERSION: u32 = 4;

/// Hard expiry applied to month/feed/discovery entries. Data older than this
/// is evicted by the store; anything younger remains servable as a stale
/// fallback when a refresh fails.
pub const HARD_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Soft refresh interval for a month's events, by the month's offset from the
/// current month (0 = current). Past months use the current-month interval.
pub fn month_refresh_interval(months_from_now: i32) -> Duration {
    let secs = match months_from_now {
        i32::MIN..=0 => 3_600,  // current and past months: 1 hour
        1 => 7_200,             // 2 hours
        2 => 14_400,            // 4 hours
        3 => 28_800,            // 8 hours
        4..=6 => 43_200,        // 12 hours
        _ => 86_400,            // 24 hours
    };
    Duration::from_secs(secs)
}

/// Apply ±10% uniform jitter so that many keys cached together do not all
/// come due in the same instant.
pub fn with_jitter(interval: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    Duration::from_secs_f64(interval.as_secs_f64() * factor)
}

/// Detail-entry TTL keyed off the event's own start date: churn risk scales
/// with proximity.
pub fn detail_refresh_interval(event_start: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let days_out = (event_start - now).num_days();
    let secs = if days_out <= 7 {
        3_600 // current week: 1 hour
    } else if days_out <= 30 {
        86_400 // current month: 1 day
    } else if days_out <= 90 {
        259_200 // next 3 months: 3 days
    } else {
        604_800 // beyond: 1 week
    };
    Duration::from_secs(secs)
}

/// `YYYY-MM` key for the month containing `at`.
pub fn month_key(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

/// Month keys for the current month through `ahead` months forward, in order.
pub fn month_window(now: DateTime<Utc>, ahead: u32) -> Vec<String> {
    (0..=ahead)
        .filter_map(|i| now.checked_add_months(Months::new(i)))
        .map(month_key)
        .collect()
}

/// Signed offset in months of a `YYYY-MM` key from the month containing `now`.
pub fn month_offset(month: &str, now: DateTime<Utc>) -> i32 {
    let Some((year, month_num)) = parse_month_key(month) else {
        return 0;
    };
    (year - now.year()) * 12 + (month_num - now.month() as i32)
}

fn parse_month_key(month: &str) -> Option<(i32, i32)> {
    let (y, m) = month.split_once('-')?;
    Some((y.parse().ok()?, m.parse().ok()?))
}
