use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{DateTime, Duration, Timelike, Utc};
use runcoach_core::{replay_week, Waypoint, ZoneMap};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::api::auth::issue_token;
use crate::providers::{
    AirQualityReading, EnvironmentalProvider, PollenReading, ProviderError, RoutingProvider,
    WeatherReading,
};
use crate::state::{AppState, Providers};
use crate::{api, config::Config, persistence};

/// AQI 120 west of the cutoff longitude, 80 east of it.
struct Corridor {
    cutoff_lon: f64,
}

/// Same AQI everywhere, rising through the day.
struct Diurnal;

struct Offline;

#[async_trait]
impl EnvironmentalProvider for Corridor {
    async fn air_quality(
        &self,
        _lat: f64,
        lon: f64,
        _at: DateTime<Utc>,
    ) -> Result<AirQualityReading, ProviderError> {
        let aqi = if lon < self.cutoff_lon { 120.0 } else { 80.0 };
        Ok(AirQualityReading { aqi, pm25: aqi / 4.0 })
    }

    async fn pollen(&self, _: f64, _: f64, _: DateTime<Utc>) -> Result<PollenReading, ProviderError> {
        Err(ProviderError::MissingValue)
    }

    async fn weather(&self, _: f64, _: f64, _: DateTime<Utc>) -> Result<WeatherReading, ProviderError> {
        Ok(WeatherReading {
            temperature_c: 15.0,
            wind_speed_mps: 3.0,
        })
    }
}

#[async_trait]
impl EnvironmentalProvider for Diurnal {
    async fn air_quality(
        &self,
        _lat: f64,
        _lon: f64,
        at: DateTime<Utc>,
    ) -> Result<AirQualityReading, ProviderError> {
        let aqi = 30.0 + at.hour() as f64 * 5.0;
        Ok(AirQualityReading { aqi, pm25: 10.0 })
    }

    async fn pollen(&self, _: f64, _: f64, _: DateTime<Utc>) -> Result<PollenReading, ProviderError> {
        Ok(PollenReading { index: 2.0 })
    }

    async fn weather(&self, _: f64, _: f64, _: DateTime<Utc>) -> Result<WeatherReading, ProviderError> {
        Err(ProviderError::Http(500))
    }
}

#[async_trait]
impl EnvironmentalProvider for Offline {
    async fn air_quality(
        &self,
        _: f64,
        _: f64,
        _: DateTime<Utc>,
    ) -> Result<AirQualityReading, ProviderError> {
        Err(ProviderError::Http(503))
    }

    async fn pollen(&self, _: f64, _: f64, _: DateTime<Utc>) -> Result<PollenReading, ProviderError> {
        Err(ProviderError::Http(503))
    }

    async fn weather(&self, _: f64, _: f64, _: DateTime<Utc>) -> Result<WeatherReading, ProviderError> {
        Err(ProviderError::Http(503))
    }
}

/// One eastward detour between any two anchors.
struct Detour;

#[async_trait]
impl RoutingProvider for Detour {
    async fn alternates(
        &self,
        from: &Waypoint,
        to: &Waypoint,
    ) -> Result<Vec<Vec<Waypoint>>, ProviderError> {
        Ok(vec![vec![
            from.clone(),
            Waypoint::new(from.lat + 0.001, from.lon + 0.002, 1),
            Waypoint::new(to.lat - 0.001, to.lon + 0.002, 2),
            to.clone(),
        ]])
    }
}

struct NoAlternates;

#[async_trait]
impl RoutingProvider for NoAlternates {
    async fn alternates(&self, _: &Waypoint, _: &Waypoint) -> Result<Vec<Vec<Waypoint>>, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

fn test_config() -> Config {
    let mut config = Config::from_env();
    config.database_path = std::env::temp_dir()
        .join(format!("runcoach-test-{}.db", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();
    config.jwt_secret = "test-secret".to_string();
    config.provider_max_retries = 0;
    config.provider_timeout_ms = 1000;
    config.request_deadline_s = 20;
    config.min_improvement_pct = 5.0;
    config.weekly_base_units = 1000.0;
    config.sample_interval_m = 250.0;
    config.default_pace_min_per_km = 6.0;
    config.max_candidates = 6;
    config.zones_path = None;
    config
}

async fn setup_app(
    environment: Arc<dyn EnvironmentalProvider>,
    routing: Arc<dyn RoutingProvider>,
) -> (axum::Router, Arc<AppState>, Config) {
    let config = test_config();
    let app_state = build_state(&config, environment, routing).await;
    let app = api::routes(&config).with_state(app_state.clone());
    (app, app_state, config)
}

async fn build_state(
    config: &Config,
    environment: Arc<dyn EnvironmentalProvider>,
    routing: Arc<dyn RoutingProvider>,
) -> Arc<AppState> {
    let db = persistence::init_database(&config.database_path, config.database_max_connections)
        .await
        .expect("init db");
    let state = Arc::new(AppState::with_database(
        db,
        config.clone(),
        Providers {
            environment,
            routing,
            zones: Arc::new(ZoneMap::default()),
        },
    ));
    state.load_from_database().await.expect("load db");
    state
}

fn token(config: &Config, user: &str) -> String {
    issue_token(&config.jwt_secret, user, 3600).expect("token")
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("parse json")
}

/// A 2.2 km northbound route along lon -122.0.
fn straight_route() -> Value {
    json!({
        "name": "Riverside",
        "waypoints": [
            { "lat": 37.0, "lon": -122.0 },
            { "lat": 37.01, "lon": -122.0 },
            { "lat": 37.02, "lon": -122.0 }
        ]
    })
}

async fn create_route(app: &axum::Router, token: &str) -> String {
    let res = app
        .clone()
        .oneshot(request("POST", "/routes", Some(token), Some(straight_route())))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body = read_json(res).await;
    body["id"].as_str().expect("route id").to_string()
}

#[tokio::test]
async fn health_is_public() {
    let (app, _state, _config) =
        setup_app(Arc::new(Corridor { cutoff_lon: 0.0 }), Arc::new(NoAlternates)).await;
    let res = app
        .clone()
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    let body = read_json(res).await;
    assert_eq!(body["status"], "ok");
    assert!(body["sample_cache_entries"].is_u64());

    let mut req = request("GET", "/health", None, None);
    req.headers_mut()
        .insert("x-request-id", "run-42".parse().unwrap());
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.headers()["x-request-id"], "run-42");
}

#[tokio::test]
async fn anonymous_requests_are_rejected() {
    let (app, _state, _config) =
        setup_app(Arc::new(Corridor { cutoff_lon: 0.0 }), Arc::new(NoAlternates)).await;
    let res = app
        .clone()
        .oneshot(request("GET", "/budget", None, None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(res).await["error"], "unauthorized");

    let res = app
        .oneshot(request("GET", "/budget", Some("not-a-jwt"), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_routes_are_validation_errors() {
    let (app, _state, config) =
        setup_app(Arc::new(Corridor { cutoff_lon: 0.0 }), Arc::new(NoAlternates)).await;
    let token = token(&config, "runner-1");

    let res = app
        .clone()
        .oneshot(request(
            "POST",
            "/routes",
            Some(&token),
            Some(json!({ "waypoints": [{ "lat": 37.0, "lon": -122.0 }] })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(res).await["error"], "validation_error");

    let res = app
        .clone()
        .oneshot(request(
            "POST",
            "/routes",
            Some(&token),
            Some(json!({ "waypoints": [{ "lat": 137.0, "lon": -122.0 }, { "lat": 37.0, "lon": -122.0 }] })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .oneshot(request("GET", "/routes/missing", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(res).await["error"], "not_found");
}

#[tokio::test]
async fn routes_are_private_to_their_owner() {
    let (app, _state, config) =
        setup_app(Arc::new(Corridor { cutoff_lon: 0.0 }), Arc::new(NoAlternates)).await;
    let owner = token(&config, "runner-1");
    let other = token(&config, "runner-2");
    let route_id = create_route(&app, &owner).await;

    let res = app
        .clone()
        .oneshot(request("GET", &format!("/routes/{}", route_id), Some(&owner), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    assert_eq!(body["route_type"], "point_to_point");
    assert!((body["distance_km"].as_f64().unwrap() - 2.224).abs() < 0.01);

    let res = app
        .oneshot(request("GET", &format!("/routes/{}", route_id), Some(&other), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn exposure_is_scored_on_demand() {
    let (app, _state, config) = setup_app(
        Arc::new(Corridor { cutoff_lon: -121.999 }),
        Arc::new(NoAlternates),
    )
    .await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;

    let res = app
        .oneshot(request(
            "GET",
            &format!("/routes/{}/exposure", route_id),
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    assert_eq!(body["avg_aqi"].as_f64().unwrap(), 120.0);
    assert!((body["exposure_score"].as_f64().unwrap() - 0.4).abs() < 1e-9);
    assert_eq!(body["low_confidence"], false);
}

#[tokio::test]
async fn total_data_loss_is_insufficient_data() {
    let (app, _state, config) = setup_app(Arc::new(Offline), Arc::new(NoAlternates)).await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;

    let res = app
        .oneshot(request(
            "GET",
            &format!("/routes/{}/exposure", route_id),
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = read_json(res).await;
    assert_eq!(body["error"], "insufficient_data");
    assert!(body["message"].as_str().unwrap().contains("try again later"));
}

#[tokio::test]
async fn optimize_persists_a_cleaner_alternate() {
    let (app, state, config) = setup_app(
        Arc::new(Corridor { cutoff_lon: -121.999 }),
        Arc::new(Detour),
    )
    .await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;

    let res = app
        .clone()
        .oneshot(request(
            "POST",
            &format!("/routes/{}/optimize", route_id),
            Some(&token),
            Some(json!({ "optimization_type": "provider_alternates" })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    assert_eq!(body["status"], "improved");
    let improvement = body["optimization_result"]["actual_improvement"]
        .as_f64()
        .unwrap();
    assert!(improvement >= 5.0);
    assert!(body["optimized_score"]["exposure_score"].as_f64().unwrap()
        < body["base_score"]["exposure_score"].as_f64().unwrap());

    let optimized_id = body["optimized_route_id"].as_str().unwrap().to_string();
    let optimized = state.route(&optimized_id).expect("optimized route stored");
    assert_eq!(optimized.parent_route_id.as_deref(), Some(route_id.as_str()));
    assert!(state.route(&route_id).is_some());

    let res = app
        .oneshot(request(
            "GET",
            &format!("/routes/{}/optimizations", route_id),
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    let body = read_json(res).await;
    let results = body["optimizations"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["latest"], true);
    assert_eq!(results[0]["optimized_route_id"], optimized_id.as_str());
}

#[tokio::test]
async fn uniform_air_reports_no_improvement() {
    let (app, state, config) = setup_app(
        Arc::new(Corridor { cutoff_lon: 180.0 }),
        Arc::new(NoAlternates),
    )
    .await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;

    let res = app
        .oneshot(request(
            "POST",
            &format!("/routes/{}/optimize", route_id),
            Some(&token),
            Some(json!({ "optimization_type": "perturbation", "seed": 7 })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    assert_eq!(body["status"], "no_improvement");
    assert!(body["optimized_route_id"].is_null());
    assert!(state.optimizations_for(&route_id).is_empty());
}

#[tokio::test]
async fn explicit_alternates_need_a_routing_provider() {
    let (app, _state, config) = setup_app(
        Arc::new(Corridor { cutoff_lon: 0.0 }),
        Arc::new(NoAlternates),
    )
    .await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;

    let res = app
        .oneshot(request(
            "POST",
            &format!("/routes/{}/optimize", route_id),
            Some(&token),
            Some(json!({ "optimization_type": "provider_alternates" })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(read_json(res).await["error"], "provider_unavailable");
}

#[tokio::test]
async fn optimal_times_are_ranked_cleanest_first() {
    let (app, _state, config) = setup_app(Arc::new(Diurnal), Arc::new(NoAlternates)).await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;

    let res = app
        .oneshot(request(
            "GET",
            &format!(
                "/routes/{}/optimal-times?horizon_hours=24&window_hours=2&top_k=3",
                route_id
            ),
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    let windows = body["windows"].as_array().unwrap();
    assert_eq!(windows.len(), 3);
    let aqis: Vec<f64> = windows
        .iter()
        .map(|w| w["avg_aqi"].as_f64().unwrap())
        .collect();
    assert!(aqis.windows(2).all(|pair| pair[0] <= pair[1]));
    for window in windows {
        let confidence = window["confidence"].as_f64().unwrap();
        assert!((0.5..=1.0).contains(&confidence));
    }
}

#[tokio::test]
async fn optimal_times_rejects_bad_horizon() {
    let (app, _state, config) = setup_app(Arc::new(Diurnal), Arc::new(NoAlternates)).await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;

    let res = app
        .oneshot(request(
            "GET",
            &format!("/routes/{}/optimal-times?horizon_hours=500", route_id),
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn generated_routes_are_stored_and_sorted() {
    let (app, state, config) = setup_app(
        Arc::new(Corridor { cutoff_lon: -122.0 }),
        Arc::new(NoAlternates),
    )
    .await;
    let token = token(&config, "runner-1");

    let res = app
        .oneshot(request(
            "POST",
            "/routes/generate",
            Some(&token),
            Some(json!({ "lat": 37.0, "lon": -122.0, "distance_km": 5.0, "count": 4 })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body = read_json(res).await;
    let routes = body["routes"].as_array().unwrap();
    assert_eq!(routes.len(), 4);

    let scores: Vec<f64> = routes
        .iter()
        .map(|r| r["exposure"]["exposure_score"].as_f64().unwrap())
        .collect();
    assert!(scores.windows(2).all(|pair| pair[0] <= pair[1]));
    for entry in routes {
        let id = entry["route"]["id"].as_str().unwrap();
        let stored = state.route(id).expect("generated route stored");
        assert_eq!(stored.owner_id, "runner-1");
        assert!((stored.distance_km - 5.0).abs() < 0.5);
    }
}

#[tokio::test]
async fn sessions_charge_the_weekly_budget() {
    let (app, _state, config) =
        setup_app(Arc::new(Corridor { cutoff_lon: 0.0 }), Arc::new(NoAlternates)).await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;
    let started_at = Utc::now() - Duration::minutes(30);

    for _ in 0..2 {
        let res = app
            .clone()
            .oneshot(request(
                "POST",
                "/sessions",
                Some(&token),
                Some(json!({
                    "route_id": route_id,
                    "started_at": started_at.to_rfc3339(),
                    "duration_min": 30.0,
                    "avg_aqi_experienced": 120.0
                })),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let res = app
        .clone()
        .oneshot(request("GET", "/budget", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let budget = read_json(res).await;
    // two 30-minute runs at AQI 120 = 2 x 60 AQI-hours
    assert!((budget["consumed_exposure_units"].as_f64().unwrap() - 120.0).abs() < 1e-9);
    assert_eq!(budget["status"], "open");
    // default profile: moderate activity, unknown age => threshold 67.5
    let limit = budget["budget_limit_units"].as_f64().unwrap();
    assert!((limit - 900.0).abs() < 1e-9);

    let res = app
        .oneshot(request("GET", "/history", Some(&token), None))
        .await
        .unwrap();
    let history = read_json(res).await;
    assert_eq!(history["sessions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn sessions_in_closed_weeks_are_rejected() {
    let (app, _state, config) =
        setup_app(Arc::new(Corridor { cutoff_lon: 0.0 }), Arc::new(NoAlternates)).await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;

    let res = app
        .oneshot(request(
            "POST",
            "/sessions",
            Some(&token),
            Some(json!({
                "route_id": route_id,
                "started_at": (Utc::now() - Duration::days(8)).to_rfc3339(),
                "duration_min": 30.0,
                "avg_aqi_experienced": 50.0
            })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(res).await["error"], "validation_error");
}

#[tokio::test]
async fn sensitive_profiles_get_smaller_budgets() {
    let (app, _state, config) =
        setup_app(Arc::new(Corridor { cutoff_lon: 0.0 }), Arc::new(NoAlternates)).await;
    let token = token(&config, "runner-1");

    let res = app
        .clone()
        .oneshot(request(
            "PUT",
            "/profile",
            Some(&token),
            Some(json!({
                "activity_level": "moderate",
                "age_group": "25-34",
                "conditions": ["asthma"]
            })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    assert!((body["personal_threshold_aqi"].as_f64().unwrap() - 45.0).abs() < 1e-9);
    assert_eq!(body["sensitivity_multiplier"].as_f64().unwrap(), 2.0);

    let res = app
        .oneshot(request("GET", "/budget", Some(&token), None))
        .await
        .unwrap();
    let budget = read_json(res).await;
    assert!((budget["budget_limit_units"].as_f64().unwrap() - 600.0).abs() < 1e-9);
}

#[tokio::test]
async fn state_survives_restart() {
    let environment: Arc<dyn EnvironmentalProvider> = Arc::new(Corridor { cutoff_lon: 0.0 });
    let routing: Arc<dyn RoutingProvider> = Arc::new(NoAlternates);
    let (app, state, config) = setup_app(environment.clone(), routing.clone()).await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;

    let res = app
        .oneshot(request(
            "POST",
            "/sessions",
            Some(&token),
            Some(json!({
                "route_id": route_id,
                "started_at": (Utc::now() - Duration::minutes(45)).to_rfc3339(),
                "duration_min": 45.0,
                "avg_aqi_experienced": 80.0
            })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let before = state.budget_status("runner-1", Utc::now()).await;

    let restarted = build_state(&config, environment, routing).await;
    assert!(restarted.route(&route_id).is_some());
    assert_eq!(restarted.history("runner-1").len(), 1);
    let after = restarted.budget_status("runner-1", Utc::now()).await;
    assert!(
        (before.budget.consumed_exposure_units - after.budget.consumed_exposure_units).abs() < 1e-9
    );
    assert_eq!(before.budget.budget_limit_units, after.budget.budget_limit_units);
}

#[tokio::test]
async fn malformed_optimize_bodies_are_rejected() {
    let (app, state, config) = setup_app(
        Arc::new(Corridor { cutoff_lon: 180.0 }),
        Arc::new(NoAlternates),
    )
    .await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;
    let uri = format!("/routes/{}/optimize", route_id);

    let res = app
        .clone()
        .oneshot(request(
            "POST",
            &uri,
            Some(&token),
            Some(json!({ "optimization_type": "bogus", "pace_min_per_km": "fast" })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(res).await["error"], "validation_error");
    assert!(state.optimizations_for(&route_id).is_empty());

    // no body at all runs with defaults
    let res = app
        .oneshot(request("POST", &uri, Some(&token), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await["status"], "no_improvement");
}

#[tokio::test]
async fn concurrent_sessions_match_the_replayed_week() {
    let (app, state, config) =
        setup_app(Arc::new(Corridor { cutoff_lon: 0.0 }), Arc::new(NoAlternates)).await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;
    let now = Utc::now();

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..12 {
        let duration_min = 5.0 + i as f64 * 1.7;
        let started_at = now - Duration::seconds((duration_min * 60.0) as i64);
        let body = json!({
            "route_id": route_id,
            "started_at": started_at.to_rfc3339(),
            "duration_min": duration_min,
            "avg_aqi_experienced": 40.0 + i as f64 * 13.3
        });
        let app = app.clone();
        let token = token.clone();
        tasks.spawn(async move {
            app.oneshot(request("POST", "/sessions", Some(&token), Some(body)))
                .await
                .unwrap()
                .status()
        });
    }
    while let Some(status) = tasks.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::CREATED);
    }

    let sessions = state.history("runner-1");
    assert_eq!(sessions.len(), 12);
    let live = state.budget_status("runner-1", Utc::now()).await.budget;
    let replayed = replay_week(
        "runner-1",
        live.week_start,
        live.budget_limit_units,
        &sessions,
    );
    assert_eq!(
        live.consumed_exposure_units.to_bits(),
        replayed.consumed_exposure_units.to_bits()
    );
}

#[tokio::test]
async fn budget_reports_today_and_run_advice() {
    let (app, _state, config) =
        setup_app(Arc::new(Corridor { cutoff_lon: 0.0 }), Arc::new(NoAlternates)).await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;

    let res = app
        .clone()
        .oneshot(request(
            "POST",
            "/sessions",
            Some(&token),
            Some(json!({
                "route_id": route_id,
                "started_at": (Utc::now() - Duration::minutes(30)).to_rfc3339(),
                "duration_min": 30.0,
                "avg_aqi_experienced": 120.0
            })),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = app
        .clone()
        .oneshot(request("GET", "/budget?current_aqi=20", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    // weekly limit 900, a fifth of it per day
    assert!((body["daily_limit_units"].as_f64().unwrap() - 180.0).abs() < 1e-9);
    assert!((body["today"]["consumed_units"].as_f64().unwrap() - 60.0).abs() < 1e-9);
    assert!((body["today"]["remaining_units"].as_f64().unwrap() - 120.0).abs() < 1e-9);
    assert_eq!(body["recommendation"]["running"]["suitability"], "recommended");
    assert_eq!(body["recommendation"]["running"]["intensity"], "normal");
    assert_eq!(body["recommendation"]["pace"], "moderate");

    let res = app
        .clone()
        .oneshot(request("GET", "/budget", Some(&token), None))
        .await
        .unwrap();
    assert!(read_json(res).await.get("recommendation").is_none());

    let res = app
        .oneshot(request("GET", "/budget?current_aqi=-5", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_risk_is_relative_to_the_personal_threshold() {
    let (app, _state, config) =
        setup_app(Arc::new(Corridor { cutoff_lon: 0.0 }), Arc::new(NoAlternates)).await;
    let token = token(&config, "runner-1");

    let res = app
        .clone()
        .oneshot(request("GET", "/health-risk?current_aqi=60", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    // default profile: threshold 67.5
    assert!((body["personal_threshold_aqi"].as_f64().unwrap() - 67.5).abs() < 1e-9);
    assert_eq!(body["current_risk_level"], "moderate");
    assert_eq!(body["recommendations"]["current"]["status"], "moderate");
    assert_eq!(body["recommendations"]["running"]["intensity"], "easy");
    assert_eq!(body["run"]["pace"], "moderate");
    assert!((body["exposure_budget"]["budget_limit_units"].as_f64().unwrap() - 900.0).abs() < 1e-9);

    let res = app
        .clone()
        .oneshot(request(
            "GET",
            "/health-risk?current_aqi=60&activity_level=vigorous",
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    let body = read_json(res).await;
    // vigorous base 50 with the unknown-age multiplier
    assert!((body["personal_threshold_aqi"].as_f64().unwrap() - 45.0).abs() < 1e-9);
    assert_eq!(body["current_risk_level"], "high");
    assert_eq!(body["recommendations"]["running"]["suitability"], "not_recommended");

    let res = app
        .oneshot(request("GET", "/health-risk", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn weekly_schedule_spaces_out_runs() {
    let (app, _state, config) = setup_app(Arc::new(Diurnal), Arc::new(NoAlternates)).await;
    let token = token(&config, "runner-1");
    let route_id = create_route(&app, &token).await;

    let res = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/routes/{}/weekly-schedule?runs_per_week=3", route_id),
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    let days = body["days"].as_array().unwrap();
    assert_eq!(days.len(), 5);

    let run_days: Vec<usize> = days
        .iter()
        .enumerate()
        .filter(|(_, d)| d["run"] == true)
        .map(|(i, _)| i)
        .collect();
    assert!((1..=3).contains(&run_days.len()));
    assert!(run_days.windows(2).all(|pair| pair[1] - pair[0] > 1));
    for day in days {
        if day["run"] == true {
            let start = day["best_window"]["start_time"].as_str().unwrap();
            assert!(start.starts_with(day["date"].as_str().unwrap()));
        } else {
            assert!(day["rest_reason"].is_string());
        }
    }

    let res = app
        .oneshot(request(
            "GET",
            &format!("/routes/{}/weekly-schedule?runs_per_week=9", route_id),
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
