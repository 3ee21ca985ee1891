//! Forecast window planning, bucketing and ranking.

use chrono::{DateTime, Datelike, Duration, DurationRound, NaiveDate, Utc, Weekday};
use serde::Serialize;

use crate::models::{TimeWindow, WindowQuality};

pub const MAX_HORIZON_HOURS: u32 = 120;
/// Days a weekly schedule can cover with forecast data.
pub const SCHEDULE_DAYS: u32 = MAX_HORIZON_HOURS / 24;

pub fn quality_for_aqi(avg_aqi: f64) -> WindowQuality {
    if avg_aqi <= 50.0 {
        WindowQuality::Excellent
    } else if avg_aqi <= 100.0 {
        WindowQuality::Good
    } else if avg_aqi <= 150.0 {
        WindowQuality::Fair
    } else {
        WindowQuality::Poor
    }
}

/// Confidence in a forecast window: data completeness, discounted linearly
/// down to half as the window moves toward the end of the horizon.
pub fn window_confidence(completeness: f64, hours_ahead: f64, horizon_hours: f64) -> f64 {
    let completeness = completeness.clamp(0.0, 1.0);
    if horizon_hours <= 0.0 {
        return completeness;
    }
    let distance = (hours_ahead / horizon_hours).clamp(0.0, 1.0);
    completeness * (1.0 - 0.5 * distance)
}

/// Consecutive `[start, end)` windows covering the horizon, starting at the
/// next whole hour after `now`.
pub fn plan_windows(
    now: DateTime<Utc>,
    horizon_hours: u32,
    window_hours: u32,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    if window_hours == 0 || horizon_hours == 0 {
        return Vec::new();
    }
    let horizon_hours = horizon_hours.min(MAX_HORIZON_HOURS);
    let first = match now.duration_trunc(Duration::hours(1)) {
        Ok(hour) if hour == now => hour,
        Ok(hour) => hour + Duration::hours(1),
        Err(_) => now,
    };
    let count = horizon_hours / window_hours;
    (0..count)
        .map(|i| {
            let start = first + Duration::hours((i * window_hours) as i64);
            (start, start + Duration::hours(window_hours as i64))
        })
        .collect()
}

/// Ascending by average AQI, ties broken by earliest start, truncated to `top_k`.
pub fn rank_windows(mut windows: Vec<TimeWindow>, top_k: usize) -> Vec<TimeWindow> {
    windows.sort_by(|a, b| {
        a.avg_aqi
            .total_cmp(&b.avg_aqi)
            .then(a.start_time.cmp(&b.start_time))
    });
    windows.truncate(top_k);
    windows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestReason {
    /// Another day was cleaner or too close to a chosen run
    Recovery,
    /// No window on this day could be scored
    NoForecast,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleDay {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_window: Option<TimeWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest_reason: Option<RestReason>,
}

/// Spread up to `runs_per_week` runs over `days`, cleanest day first, never
/// on two consecutive days. Each day's candidate is the cleanest window
/// starting on that UTC date.
pub fn plan_schedule(
    days: &[NaiveDate],
    windows: &[TimeWindow],
    runs_per_week: usize,
) -> Vec<ScheduleDay> {
    let best: Vec<Option<&TimeWindow>> = days
        .iter()
        .map(|day| {
            windows
                .iter()
                .filter(|w| w.start_time.date_naive() == *day)
                .min_by(|a, b| {
                    a.avg_aqi
                        .total_cmp(&b.avg_aqi)
                        .then(a.start_time.cmp(&b.start_time))
                })
        })
        .collect();

    let mut by_quality: Vec<usize> = (0..days.len()).filter(|i| best[*i].is_some()).collect();
    by_quality.sort_by(|a, b| {
        let (wa, wb) = (best[*a], best[*b]);
        let aqi = |w: Option<&TimeWindow>| w.map(|w| w.avg_aqi).unwrap_or(f64::INFINITY);
        aqi(wa).total_cmp(&aqi(wb)).then(a.cmp(b))
    });

    let mut chosen: Vec<NaiveDate> = Vec::new();
    for idx in by_quality {
        if chosen.len() >= runs_per_week {
            break;
        }
        let day = days[idx];
        if chosen.iter().all(|c| (*c - day).num_days().abs() > 1) {
            chosen.push(day);
        }
    }

    days.iter()
        .zip(best)
        .map(|(day, window)| {
            let run = chosen.contains(day);
            ScheduleDay {
                date: *day,
                weekday: day.weekday(),
                run,
                best_window: window.filter(|_| run).cloned(),
                rest_reason: match (run, window) {
                    (true, _) => None,
                    (false, Some(_)) => Some(RestReason::Recovery),
                    (false, None) => Some(RestReason::NoForecast),
                },
            }
        })
        .collect()
}
