//! Health profile and personal risk assessment.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    Extension, Json,
};
use chrono::Utc;
use runcoach_core::{
    activity_recommendations, personal_threshold, risk_level, sensitivity_multiplier,
    ActivityLevel, ActivityRecommendations, HealthProfile, RiskLevel,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::auth::AuthUser;
use crate::api::sessions::{budget_report, validate_aqi, BudgetReport, RunAdvice};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RiskQuery {
    #[serde(default)]
    pub current_aqi: Option<f64>,
    /// Overrides the profile's activity level for this assessment
    #[serde(default)]
    pub activity_level: Option<ActivityLevel>,
}

#[derive(Debug, Serialize)]
pub struct RiskAssessment {
    pub current_aqi: f64,
    pub activity_level: ActivityLevel,
    pub personal_threshold_aqi: f64,
    pub current_risk_level: RiskLevel,
    pub exposure_budget: BudgetReport,
    pub recommendations: ActivityRecommendations,
    pub run: RunAdvice,
}

#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub profile: HealthProfile,
    pub personal_threshold_aqi: f64,
    pub sensitivity_multiplier: f64,
}

impl From<HealthProfile> for ProfileView {
    fn from(profile: HealthProfile) -> Self {
        Self {
            personal_threshold_aqi: personal_threshold(&profile),
            sensitivity_multiplier: sensitivity_multiplier(&profile),
            profile,
        }
    }
}

/// GET /profile
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Json<ProfileView> {
    Json(state.profile(&user_id).into())
}

/// PUT /profile
///
/// Replaces the stored profile. Weeks already started keep their limit.
pub async fn put_profile(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    payload: Result<Json<HealthProfile>, JsonRejection>,
) -> ApiResult<Json<ProfileView>> {
    let Json(profile) = payload?;
    profile.validate()?;
    state.set_profile(&user_id, profile.clone()).await?;
    tracing::info!(user_id = %user_id, "Health profile updated");
    Ok(Json(profile.into()))
}

/// GET /health-risk
///
/// Risk of running at `current_aqi` for the caller's profile, with the
/// current budget and per-activity advice.
pub async fn assess_health_risk(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    query: Result<Query<RiskQuery>, QueryRejection>,
) -> ApiResult<Json<RiskAssessment>> {
    let Query(query) = query?;
    let current_aqi = validate_aqi(query.current_aqi)?
        .ok_or_else(|| ApiError::Validation("current_aqi is required".to_string()))?;

    let mut profile = state.profile(&user_id);
    if let Some(level) = query.activity_level {
        profile.activity_level = level;
    }
    let threshold = personal_threshold(&profile);
    let exposure_budget = budget_report(&state, &user_id, &profile, None, Utc::now()).await;

    Ok(Json(RiskAssessment {
        current_aqi,
        activity_level: profile.activity_level,
        personal_threshold_aqi: threshold,
        current_risk_level: risk_level(current_aqi / threshold),
        exposure_budget,
        recommendations: activity_recommendations(current_aqi, threshold),
        run: RunAdvice::for_aqi(current_aqi, &profile),
    }))
}
