//! Weekly exposure accounting.
//!
//! Weeks are keyed by their ISO start (Monday 00:00 UTC). Whether a week is
//! open is a pure function of the clock, computed on read.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ExposureBudget, RunSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStatus {
    Open,
    Closed,
}

impl WeekStatus {
    pub fn at(week_start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if now < week_start + Duration::weeks(1) {
            WeekStatus::Open
        } else {
            WeekStatus::Closed
        }
    }
}

/// Monday 00:00 UTC of the ISO week containing `instant`.
pub fn iso_week_start(instant: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = instant.weekday().num_days_from_monday() as i64;
    let monday = instant.date_naive() - Duration::days(days_from_monday);
    Utc.from_utc_datetime(&monday.and_time(NaiveTime::MIN))
}

/// Exposure units for a run: AQI-hours.
pub fn exposure_units(duration_min: f64, avg_aqi: f64) -> f64 {
    if !duration_min.is_finite() || !avg_aqi.is_finite() {
        return 0.0;
    }
    duration_min.max(0.0) * avg_aqi.max(0.0) / 60.0
}

pub fn session_units(session: &RunSession) -> f64 {
    exposure_units(session.duration_min, session.avg_aqi_experienced)
}

/// The week a session counts against.
pub fn session_week(session: &RunSession) -> DateTime<Utc> {
    iso_week_start(session.completed_at())
}

/// Sum of per-session units in ascending order, so the total does not depend
/// on the order sessions arrived in.
pub fn canonical_total(units: &[f64]) -> f64 {
    let mut sorted = units.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.iter().sum()
}

/// Units of each of the user's sessions that count against `week_start`.
pub fn week_units(user_id: &str, week_start: DateTime<Utc>, sessions: &[RunSession]) -> Vec<f64> {
    sessions
        .iter()
        .filter(|s| s.user_id == user_id && session_week(s) == week_start)
        .map(session_units)
        .collect()
}

/// Rebuild a week's budget from its sessions. Sessions from other weeks are
/// skipped.
pub fn replay_week(
    user_id: &str,
    week_start: DateTime<Utc>,
    limit_units: f64,
    sessions: &[RunSession],
) -> ExposureBudget {
    let mut budget = ExposureBudget::new(user_id, week_start, limit_units);
    budget.consume(canonical_total(&week_units(user_id, week_start, sessions)));
    budget
}
