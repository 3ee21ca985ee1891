//! Forecast run-window recommendations for a fixed route.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use runcoach_core::time_windows::{plan_windows, MAX_HORIZON_HOURS, SCHEDULE_DAYS};
use runcoach_core::{
    plan_schedule, quality_for_aqi, rank_windows, window_confidence, CoreError, Route,
    ScheduleDay, TimeWindow,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::optimizer::OptimizerSettings;
use crate::scoring::{RouteScorer, RunContext};

#[derive(Debug, Clone, Copy)]
pub struct WindowQuery {
    pub horizon_hours: u32,
    pub window_hours: u32,
    pub top_k: usize,
}

impl Default for WindowQuery {
    fn default() -> Self {
        Self {
            horizon_hours: 48,
            window_hours: 2,
            top_k: 5,
        }
    }
}

impl WindowQuery {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.horizon_hours == 0 || self.horizon_hours > MAX_HORIZON_HOURS {
            return Err(ApiError::Validation(format!(
                "horizon_hours must be between 1 and {}",
                MAX_HORIZON_HOURS
            )));
        }
        if self.window_hours == 0 || self.window_hours > self.horizon_hours {
            return Err(ApiError::Validation(
                "window_hours must be between 1 and horizon_hours".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(ApiError::Validation("top_k must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Score the route at the start of every window in the horizon and return
/// the `top_k` cleanest. Windows that cannot be scored are skipped; if none
/// can, the request fails with insufficient data.
pub async fn recommend_windows(
    scorer: Arc<RouteScorer>,
    route: &Route,
    run: &RunContext,
    query: WindowQuery,
    settings: &OptimizerSettings,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Vec<TimeWindow>, ApiError> {
    query.validate()?;
    let planned = plan_windows(now, query.horizon_hours, query.window_hours);
    let horizon = query.horizon_hours as f64;
    let deadline = settings.deadline;

    let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_scorings.max(1)));
    let mut tasks = JoinSet::new();
    for (start, end) in planned.iter().copied() {
        let scorer = Arc::clone(&scorer);
        let semaphore = Arc::clone(&semaphore);
        let route = route.clone();
        let run = run.starting_at(start);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire().await;
            let score = scorer.score_route(&route, &run, &cancel).await;
            (start, end, score)
        });
    }

    let collect = async {
        let mut windows = Vec::with_capacity(planned.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((start, end, Ok(score))) => {
                    let hours_ahead = (start - now).num_minutes() as f64 / 60.0;
                    windows.push(TimeWindow {
                        route_id: route.id.clone(),
                        start_time: start,
                        end_time: end,
                        avg_aqi: score.avg_aqi,
                        exposure_score: score.exposure_score,
                        quality: quality_for_aqi(score.avg_aqi),
                        confidence: window_confidence(score.data_completeness, hours_ahead, horizon),
                    });
                }
                Ok((start, _, Err(err))) => {
                    debug!(route_id = %route.id, start = %start, error = %err, "Window skipped");
                }
                Err(err) => warn!(error = %err, "Window scoring task failed"),
            }
        }
        windows
    };

    let windows = match tokio::time::timeout(deadline, collect).await {
        Ok(windows) => windows,
        Err(_) => {
            cancel.cancel();
            return Err(ApiError::DeadlineExceeded(format!(
                "time windows for route {} did not finish within {}s",
                route.id,
                deadline.as_secs()
            )));
        }
    };

    if windows.is_empty() {
        return Err(CoreError::InsufficientData {
            route_id: route.id.clone(),
            samples_total: 0,
        }
        .into());
    }
    debug!(
        route_id = %route.id,
        planned = planned.len(),
        scored = windows.len(),
        "Ranked forecast windows"
    );
    Ok(rank_windows(windows, query.top_k))
}

/// Up to `runs_per_week` run days over the forecast horizon, each with the
/// cleanest window that starts on it. Built on the full ranked window list.
pub async fn weekly_schedule(
    scorer: Arc<RouteScorer>,
    route: &Route,
    run: &RunContext,
    runs_per_week: usize,
    window_hours: u32,
    settings: &OptimizerSettings,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Vec<ScheduleDay>, ApiError> {
    if runs_per_week == 0 || runs_per_week > 7 {
        return Err(ApiError::Validation(
            "runs_per_week must be between 1 and 7".to_string(),
        ));
    }
    let query = WindowQuery {
        horizon_hours: MAX_HORIZON_HOURS,
        window_hours,
        top_k: usize::MAX,
    };
    let windows = recommend_windows(scorer, route, run, query, settings, now, cancel).await?;

    let today = now.date_naive();
    let days: Vec<NaiveDate> = (0..SCHEDULE_DAYS as i64)
        .map(|offset| today + Duration::days(offset))
        .collect();
    Ok(plan_schedule(&days, &windows, runs_per_week))
}
