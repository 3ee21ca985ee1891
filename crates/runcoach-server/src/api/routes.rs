//! REST API router.

use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::auth::{self, JwtKeys};
use crate::api::{profile, request_id, running_routes, sessions};
use crate::config::Config;
use crate::state::AppState;

pub fn create_router(config: &Config) -> Router<Arc<AppState>> {
    let keys = JwtKeys::new(&config.jwt_secret);

    let public_routes = Router::new().route("/health", get(health));

    let user_routes = Router::new()
        .route("/routes", post(running_routes::create_route))
        .route("/routes/generate", post(running_routes::generate))
        .route("/routes/:route_id", get(running_routes::get_route))
        .route("/routes/:route_id/exposure", get(running_routes::get_exposure))
        .route("/routes/:route_id/optimize", post(running_routes::optimize))
        .route(
            "/routes/:route_id/optimizations",
            get(running_routes::list_optimizations),
        )
        .route(
            "/routes/:route_id/optimal-times",
            get(running_routes::optimal_times),
        )
        .route(
            "/routes/:route_id/weekly-schedule",
            get(running_routes::schedule),
        )
        .route("/sessions", post(sessions::create_session))
        .route("/history", get(sessions::history))
        .route("/budget", get(sessions::current_budget))
        .route("/profile", get(profile::get_profile).put(profile::put_profile))
        .route("/health-risk", get(profile::assess_health_risk))
        .layer(middleware::from_fn_with_state(keys, auth::require_user));

    public_routes
        .merge(user_routes)
        .layer(middleware::from_fn(request_id::ensure_request_id))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "routing_enabled": state.config().routing_enabled(),
        "sample_cache_entries": state.scorer().fetcher().cache_len(),
    }))
}
