//! Dashboard statistics derived from a window summary.
use serde::Serialize;

use crate::store::WindowSummary;

#[derive(Serialize, Debug, Clone, PartialEq)]
/// Aggregate statistics over one time window, as served by `/api/stats`.
pub struct Statistics {
    pub total_readings: u64,
    pub total_alerts: u64,
    pub burglar_alerts: u64,
    pub fire_alerts: u64,
    /// Mean temperature, one decimal. `0` without readings.
    pub avg_temp: f64,
    /// Highest temperature, one decimal. `0` without readings.
    pub max_temp: f64,
    /// Mean humidity, one decimal. `0` without readings.
    pub avg_humidity: f64,
}

/// Rounds to one decimal place, ties to even on the exact binary value.
pub fn round_one_decimal(value: f64) -> f64 {
    format!("{:.1}", value).parse().unwrap_or(value)
}

fn rounded_or_zero(value: Option<f64>) -> f64 {
    value.map(round_one_decimal).unwrap_or(0.0)
}

impl Statistics {
    pub fn from_summary(summary: &WindowSummary) -> Statistics {
        Statistics {
            total_readings: summary.total_readings,
            total_alerts: summary.total_alerts,
            burglar_alerts: summary.burglar_alerts,
            fire_alerts: summary.fire_alerts,
            avg_temp: rounded_or_zero(summary.avg_temp),
            max_temp: rounded_or_zero(summary.max_temp),
            avg_humidity: rounded_or_zero(summary.avg_humidity),
        }
    }
}
