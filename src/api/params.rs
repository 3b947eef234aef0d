//! Query string parameters shared by the windowed routes.
use chrono::{DateTime, TimeDelta, Utc};

/// Window length used when `hours` is missing or not an integer.
pub const DEFAULT_HOURS: i64 = 24;
/// Default `limit` of `/api/sensors`.
pub const DEFAULT_SENSOR_LIMIT: i64 = 100;
/// Default `limit` of `/api/alerts`.
pub const DEFAULT_ALERT_LIMIT: i64 = 50;

#[derive(Debug, Default, Clone)]
/// `hours` and `limit` as sent by the client.
///
/// Values that are not integers fall back to the route defaults instead of failing the request.
pub struct WindowParams {
    pub hours: Option<String>,
    pub limit: Option<String>,
}

fn parse_or(value: Option<&str>, default: i64) -> i64 {
    value
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

impl WindowParams {
    /// Picks `hours` and `limit` out of the decoded query pairs. The first occurrence wins.
    pub fn from_pairs(pairs: &[(String, String)]) -> WindowParams {
        let first = |key: &str| {
            pairs
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        };
        WindowParams {
            hours: first("hours"),
            limit: first("limit"),
        }
    }

    pub fn hours(&self) -> i64 {
        parse_or(self.hours.as_deref(), DEFAULT_HOURS)
    }

    /// Maximum number of records, never negative.
    pub fn limit(&self, default: i64) -> usize {
        let limit = parse_or(self.limit.as_deref(), default).max(0);
        usize::try_from(limit).unwrap_or(usize::MAX)
    }

    /// Lower bound of the window ending at `now`.
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        window_start(now, self.hours())
    }
}

/// `now - hours`, never earlier than the unix epoch and saturating at the far future.
pub fn window_start(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    let start = TimeDelta::try_hours(hours)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(if hours > 0 {
            DateTime::<Utc>::UNIX_EPOCH
        } else {
            DateTime::<Utc>::MAX_UTC
        });
    if hours > 0 {
        start.max(DateTime::<Utc>::UNIX_EPOCH)
    } else {
        start
    }
}
