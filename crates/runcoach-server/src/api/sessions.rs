//! Run sessions, history and the weekly budget.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use runcoach_core::advice::ActivityAdvice;
use runcoach_core::{
    personal_threshold, recommended_pace, running_advice, HealthProfile, Pace, RunSession,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::api::auth::AuthUser;
use crate::budget::{status_of, BudgetStatus};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub route_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_min: f64,
    pub avg_aqi_experienced: f64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BudgetQuery {
    /// AQI the runner is facing now; adds run advice to the report
    #[serde(default)]
    pub current_aqi: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub limit_units: f64,
    pub consumed_units: f64,
    pub remaining_units: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunAdvice {
    pub aqi: f64,
    pub running: ActivityAdvice,
    pub pace: Pace,
}

impl RunAdvice {
    pub fn for_aqi(aqi: f64, profile: &HealthProfile) -> Self {
        Self {
            aqi,
            running: running_advice(aqi, personal_threshold(profile)),
            pace: recommended_pace(aqi, profile),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetReport {
    #[serde(flatten)]
    pub week: BudgetStatus,
    pub today: DailyUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<RunAdvice>,
}

pub fn validate_aqi(aqi: Option<f64>) -> Result<Option<f64>, ApiError> {
    match aqi {
        Some(v) if !v.is_finite() || v < 0.0 => Err(ApiError::Validation(format!(
            "current_aqi must be a non-negative number, got {}",
            v
        ))),
        other => Ok(other),
    }
}

/// Current week plus today's share of it for `profile`.
pub async fn budget_report(
    state: &AppState,
    user_id: &str,
    profile: &HealthProfile,
    current_aqi: Option<f64>,
    now: DateTime<Utc>,
) -> BudgetReport {
    let week = state.budget_status(user_id, now).await;
    let consumed = state.units_on_day(user_id, now);
    let today = DailyUsage {
        date: now.date_naive(),
        limit_units: week.daily_limit_units,
        consumed_units: consumed,
        remaining_units: (week.daily_limit_units - consumed).max(0.0),
    };
    BudgetReport {
        week,
        today,
        recommendation: current_aqi.map(|aqi| RunAdvice::for_aqi(aqi, profile)),
    }
}

/// POST /sessions
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let route = state.route_for(&user_id, &request.route_id)?;
    let session = RunSession {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.clone(),
        route_id: route.id,
        started_at: request.started_at,
        duration_min: request.duration_min,
        avg_aqi_experienced: request.avg_aqi_experienced,
    };

    let now = Utc::now();
    let budget = state.record_session(session.clone(), now).await?;
    let status = status_of(budget, &state.profile(&user_id), now);
    tracing::info!(
        user_id = %user_id,
        session_id = %session.id,
        usage_pct = status.budget.usage_percentage,
        "Run session recorded"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "session": session,
            "budget": status,
        })),
    ))
}

/// GET /history
pub async fn history(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let mut sessions = state.history(&user_id);
    if let Some(limit) = query.limit {
        sessions.truncate(limit);
    }
    let weeks = state.budget_history(&user_id, Utc::now()).await;
    Ok(Json(json!({
        "sessions": sessions,
        "weekly_budgets": weeks,
    })))
}

/// GET /budget
pub async fn current_budget(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    query: Result<Query<BudgetQuery>, QueryRejection>,
) -> ApiResult<Json<BudgetReport>> {
    let Query(query) = query?;
    let current_aqi = validate_aqi(query.current_aqi)?;
    let profile = state.profile(&user_id);
    Ok(Json(
        budget_report(&state, &user_id, &profile, current_aqi, Utc::now()).await,
    ))
}
