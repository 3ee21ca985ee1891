//! Route creation, generation, exposure, optimization and time windows.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use rand::Rng;
use runcoach_core::models::RouteDraft;
use runcoach_core::{
    generate_routes, OptimizationResult, OptimizationType, Route, RouteExposureScore, RouteType,
    Selection, Waypoint,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::optimizer::{score_all, OptimizationRequest};
use crate::scoring::RunContext;
use crate::state::AppState;
use crate::windows::{recommend_windows, weekly_schedule, WindowQuery};

const MAX_GENERATED_ROUTES: usize = 8;
const DEFAULT_GENERATED_ROUTES: usize = 4;

#[derive(Debug, Deserialize)]
pub struct WaypointInput {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub elevation_m: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRouteRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub waypoints: Vec<WaypointInput>,
    /// Inferred from loop closure when absent
    #[serde(default)]
    pub route_type: Option<RouteType>,
    #[serde(default)]
    pub elevation_gain_m: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRoutesRequest {
    pub lat: f64,
    pub lon: f64,
    pub distance_km: f64,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub pace_min_per_km: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OptimizeRouteRequest {
    #[serde(default)]
    pub optimization_type: Option<OptimizationType>,
    /// Perturbation seed; random when absent
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub pace_min_per_km: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaceQuery {
    #[serde(default)]
    pub pace_min_per_km: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleQuery {
    #[serde(default)]
    pub runs_per_week: Option<usize>,
    #[serde(default)]
    pub window_hours: Option<u32>,
    #[serde(default)]
    pub pace_min_per_km: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct OptimalTimesQuery {
    pub horizon_hours: Option<u32>,
    pub window_hours: Option<u32>,
    pub top_k: Option<usize>,
    pub pace_min_per_km: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ScoredRoute {
    pub route: Route,
    /// Absent when no environmental data could be fetched for the route
    pub exposure: Option<RouteExposureScore>,
}

#[derive(Debug, Serialize)]
pub struct OptimizationEntry {
    #[serde(flatten)]
    pub result: OptimizationResult,
    pub latest: bool,
}

fn validate_pace(pace: Option<f64>) -> ApiResult<Option<f64>> {
    match pace {
        Some(p) if !p.is_finite() || !(2.0..=20.0).contains(&p) => Err(ApiError::Validation(
            format!("pace_min_per_km must be between 2 and 20, got {}", p),
        )),
        other => Ok(other),
    }
}

/// Cancelled when the handler finishes or is dropped with the connection.
fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

/// POST /routes
pub async fn create_route(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    payload: Result<Json<CreateRouteRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let waypoints: Vec<Waypoint> = request
        .waypoints
        .iter()
        .enumerate()
        .map(|(idx, wp)| Waypoint {
            lat: wp.lat,
            lon: wp.lon,
            sequence_index: idx,
            elevation_m: wp.elevation_m,
        })
        .collect();

    let closed = waypoints.len() >= 2
        && waypoints[0].distance_to(&waypoints[waypoints.len() - 1])
            <= runcoach_core::models::LOOP_CLOSURE_M;
    let route_type = request.route_type.unwrap_or(if closed {
        RouteType::Loop
    } else {
        RouteType::PointToPoint
    });
    if route_type == RouteType::Loop && !closed {
        return Err(ApiError::Validation(
            "loop routes must start and end at the same point".to_string(),
        ));
    }

    let route = Route::build(RouteDraft {
        id: uuid::Uuid::new_v4().to_string(),
        owner_id: user_id,
        name: request
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Untitled route".to_string()),
        waypoints,
        route_type,
        elevation_gain_m: request.elevation_gain_m,
        parent_route_id: None,
        created_at: Utc::now(),
    })?;

    state.insert_route(&route).await?;
    tracing::info!(route_id = %route.id, distance_km = route.distance_km, "Route created");
    Ok((StatusCode::CREATED, Json(route)))
}

/// POST /routes/generate
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    payload: Result<Json<GenerateRoutesRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let pace = validate_pace(request.pace_min_per_km)?;
    let count = request
        .count
        .unwrap_or(DEFAULT_GENERATED_ROUTES)
        .clamp(1, MAX_GENERATED_ROUTES);
    let now = Utc::now();

    let start = Waypoint::new(request.lat, request.lon, 0);
    let mut routes = generate_routes(&user_id, &start, request.distance_km, count, now)?;
    for route in &mut routes {
        route.id = uuid::Uuid::new_v4().to_string();
    }

    let run = RunContext {
        pace_min_per_km: pace,
        ..RunContext::now(state.profile(&user_id))
    };
    let settings = state.optimizer().settings();
    let (cancel, _guard) = request_token();
    let scoring = score_all(
        Arc::clone(state.scorer()),
        &routes,
        &run,
        settings.max_concurrent_scorings,
        &cancel,
    );
    let scores = match tokio::time::timeout(settings.deadline, scoring).await {
        Ok(scores) => scores,
        Err(_) => {
            cancel.cancel();
            return Err(ApiError::DeadlineExceeded(
                "route generation did not finish in time".to_string(),
            ));
        }
    };

    let mut scored: Vec<ScoredRoute> = routes
        .into_iter()
        .zip(scores)
        .map(|(route, score)| ScoredRoute {
            route,
            exposure: score.ok(),
        })
        .collect();
    // Scored routes first, lowest exposure first; unscored keep catalogue order.
    scored.sort_by(|a, b| match (&a.exposure, &b.exposure) {
        (Some(x), Some(y)) => x.weighted_exposure.total_cmp(&y.weighted_exposure),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    let to_store: Vec<Route> = scored.iter().map(|s| s.route.clone()).collect();
    state.insert_routes(&to_store).await?;
    tracing::info!(
        user_id = %user_id,
        routes = scored.len(),
        scored = scored.iter().filter(|s| s.exposure.is_some()).count(),
        "Generated routes"
    );
    Ok((StatusCode::CREATED, Json(json!({ "routes": scored }))))
}

/// GET /routes/:routeId
pub async fn get_route(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(route_id): Path<String>,
) -> ApiResult<Json<Route>> {
    Ok(Json(state.route_for(&user_id, &route_id)?))
}

/// GET /routes/:routeId/exposure
pub async fn get_exposure(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(route_id): Path<String>,
    query: Result<Query<PaceQuery>, QueryRejection>,
) -> ApiResult<Json<RouteExposureScore>> {
    let Query(query) = query?;
    let route = state.route_for(&user_id, &route_id)?;
    let run = RunContext {
        pace_min_per_km: validate_pace(query.pace_min_per_km)?,
        ..RunContext::now(state.profile(&user_id))
    };

    let deadline = state.optimizer().settings().deadline;
    let (cancel, _guard) = request_token();
    let score = tokio::time::timeout(deadline, state.scorer().score_route(&route, &run, &cancel))
        .await
        .map_err(|_| {
            cancel.cancel();
            ApiError::DeadlineExceeded(format!("exposure for route {} timed out", route_id))
        })??;
    Ok(Json(score))
}

/// POST /routes/:routeId/optimize
pub async fn optimize(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(route_id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: OptimizeRouteRequest = optional_json(&body)?;
    let base = state.route_for(&user_id, &route_id)?;
    let optimization_type = request.optimization_type.unwrap_or_default();
    let run = RunContext {
        pace_min_per_km: validate_pace(request.pace_min_per_km)?,
        ..RunContext::now(state.profile(&user_id))
    };
    let seed = request.seed.unwrap_or_else(|| rand::rng().random());

    let (cancel, _guard) = request_token();
    let outcome = state
        .optimizer()
        .optimize(
            &base,
            &OptimizationRequest {
                optimization_type,
                run,
                seed,
            },
            &cancel,
        )
        .await?;

    let Some((candidate, winner_score)) = outcome.winner.clone() else {
        let best_improvement = match outcome.selection {
            Selection::NoImprovement {
                best_improvement_pct,
            } => best_improvement_pct,
            Selection::Improved { .. } => None,
        };
        return Ok(Json(json!({
            "status": "no_improvement",
            "route_id": base.id,
            "optimized_route_id": null,
            "optimization_result": null,
            "candidates_evaluated": outcome.candidates_evaluated,
            "candidates_scored": outcome.candidates_scored,
            "base_score": outcome.base_score,
            "best_candidate_improvement_pct": best_improvement,
            "low_confidence": outcome.base_score.low_confidence,
        })));
    };

    let now = Utc::now();
    let optimized = Route {
        id: uuid::Uuid::new_v4().to_string(),
        owner_id: user_id.clone(),
        name: format!("{} (optimized)", base.name),
        parent_route_id: Some(base.id.clone()),
        created_at: now,
        ..candidate
    };
    let result = OptimizationResult {
        id: uuid::Uuid::new_v4().to_string(),
        owner_id: user_id,
        base_route_id: base.id.clone(),
        optimized_route_id: optimized.id.clone(),
        candidates_evaluated: outcome.candidates_evaluated,
        actual_improvement_pct: outcome.improvement_pct(),
        optimization_type,
        base_exposure_score: outcome.base_score.exposure_score,
        optimized_exposure_score: winner_score.exposure_score,
        created_at: now,
    };
    state.record_optimization(&optimized, &result).await?;

    let optimized_score = RouteExposureScore {
        route_id: optimized.id.clone(),
        ..winner_score
    };
    Ok(Json(json!({
        "status": "improved",
        "route_id": base.id,
        "optimized_route_id": optimized.id,
        "optimization_result": {
            "id": result.id,
            "base_route_id": result.base_route_id,
            "optimized_route_id": result.optimized_route_id,
            "candidates_evaluated": result.candidates_evaluated,
            "actual_improvement": result.actual_improvement_pct,
            "optimization_type": result.optimization_type,
            "created_at": result.created_at,
        },
        "candidates_scored": outcome.candidates_scored,
        "base_score": outcome.base_score,
        "optimized_score": optimized_score,
        "optimized_route": optimized,
        "low_confidence": outcome.base_score.low_confidence || optimized_score.low_confidence,
    })))
}

/// A blank body means every field takes its default; anything else must be
/// valid JSON for `T`.
fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    let Json(value) = Json::<T>::from_bytes(body)?;
    Ok(value)
}

/// GET /routes/:routeId/optimizations
pub async fn list_optimizations(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(route_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let route = state.route_for(&user_id, &route_id)?;
    let results: Vec<OptimizationEntry> = state
        .optimizations_for(&route.id)
        .into_iter()
        .enumerate()
        .map(|(idx, result)| OptimizationEntry {
            result,
            latest: idx == 0,
        })
        .collect();
    Ok(Json(json!({
        "route_id": route.id,
        "optimizations": results,
    })))
}

/// GET /routes/:routeId/optimal-times
pub async fn optimal_times(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(route_id): Path<String>,
    query: Result<Query<OptimalTimesQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let route = state.route_for(&user_id, &route_id)?;
    let defaults = WindowQuery::default();
    let window_query = WindowQuery {
        horizon_hours: query.horizon_hours.unwrap_or(defaults.horizon_hours),
        window_hours: query.window_hours.unwrap_or(defaults.window_hours),
        top_k: query.top_k.unwrap_or(defaults.top_k),
    };
    let run = RunContext {
        pace_min_per_km: validate_pace(query.pace_min_per_km)?,
        ..RunContext::now(state.profile(&user_id))
    };

    let (cancel, _guard) = request_token();
    let windows = recommend_windows(
        Arc::clone(state.scorer()),
        &route,
        &run,
        window_query,
        state.optimizer().settings(),
        Utc::now(),
        &cancel,
    )
    .await?;

    Ok(Json(json!({
        "route_id": route.id,
        "horizon_hours": window_query.horizon_hours,
        "window_hours": window_query.window_hours,
        "windows": windows,
    })))
}

/// GET /routes/:routeId/weekly-schedule
pub async fn schedule(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(route_id): Path<String>,
    query: Result<Query<ScheduleQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let route = state.route_for(&user_id, &route_id)?;
    let runs_per_week = query.runs_per_week.unwrap_or(3);
    let window_hours = query
        .window_hours
        .unwrap_or(WindowQuery::default().window_hours);
    let run = RunContext {
        pace_min_per_km: validate_pace(query.pace_min_per_km)?,
        ..RunContext::now(state.profile(&user_id))
    };

    let (cancel, _guard) = request_token();
    let days = weekly_schedule(
        Arc::clone(state.scorer()),
        &route,
        &run,
        runs_per_week,
        window_hours,
        state.optimizer().settings(),
        Utc::now(),
        &cancel,
    )
    .await?;

    Ok(Json(json!({
        "route_id": route.id,
        "runs_per_week": runs_per_week,
        "window_hours": window_hours,
        "days": days,
    })))
}
