use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runcoach_core::models::RouteDraft;
use runcoach_core::{
    CandidateConfig, HealthCondition, HealthProfile, OptimizationType, Route, RouteType,
    SamplerConfig, Selection, Waypoint, ZoneMap,
};
use runcoach_server::error::ApiError;
use runcoach_server::fetcher::{FetcherConfig, SampleFetcher};
use runcoach_server::optimizer::{OptimizationRequest, OptimizerSettings, RouteOptimizer};
use runcoach_server::providers::{
    AirQualityReading, EnvironmentalProvider, PollenReading, ProviderError, RoutingProvider,
    WeatherReading,
};
use runcoach_server::scoring::{RouteScorer, RunContext};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Dirty air west of `cutoff_lon`, clean air east of it.
struct EastIsCleaner {
    cutoff_lon: f64,
    delay: Duration,
}

/// AQI 280 west of `cutoff_lon` and 160 east of it: unhealthy either way.
struct Smog {
    cutoff_lon: f64,
}

#[async_trait]
impl EnvironmentalProvider for Smog {
    async fn air_quality(
        &self,
        _lat: f64,
        lon: f64,
        _at: DateTime<Utc>,
    ) -> Result<AirQualityReading, ProviderError> {
        let aqi = if lon < self.cutoff_lon { 280.0 } else { 160.0 };
        Ok(AirQualityReading { aqi, pm25: aqi / 3.0 })
    }

    async fn pollen(&self, _: f64, _: f64, _: DateTime<Utc>) -> Result<PollenReading, ProviderError> {
        Err(ProviderError::MissingValue)
    }

    async fn weather(&self, _: f64, _: f64, _: DateTime<Utc>) -> Result<WeatherReading, ProviderError> {
        Err(ProviderError::MissingValue)
    }
}

#[async_trait]
impl EnvironmentalProvider for EastIsCleaner {
    async fn air_quality(
        &self,
        _lat: f64,
        lon: f64,
        _at: DateTime<Utc>,
    ) -> Result<AirQualityReading, ProviderError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let aqi = if lon < self.cutoff_lon { 150.0 } else { 60.0 };
        Ok(AirQualityReading { aqi, pm25: aqi / 4.0 })
    }

    async fn pollen(&self, _: f64, _: f64, _: DateTime<Utc>) -> Result<PollenReading, ProviderError> {
        Ok(PollenReading { index: 1.0 })
    }

    async fn weather(&self, _: f64, _: f64, _: DateTime<Utc>) -> Result<WeatherReading, ProviderError> {
        Ok(WeatherReading {
            temperature_c: 18.0,
            wind_speed_mps: 2.0,
        })
    }
}

struct Detour;

#[async_trait]
impl RoutingProvider for Detour {
    async fn alternates(
        &self,
        from: &Waypoint,
        to: &Waypoint,
    ) -> Result<Vec<Vec<Waypoint>>, ProviderError> {
        Ok(vec![
            vec![
                from.clone(),
                Waypoint::new(from.lat + 0.001, from.lon + 0.002, 1),
                Waypoint::new(to.lat - 0.001, to.lon + 0.002, 2),
                to.clone(),
            ],
            // far too long to be accepted
            vec![
                from.clone(),
                Waypoint::new(from.lat, from.lon + 0.05, 1),
                to.clone(),
            ],
        ])
    }
}

struct Unrouted;

#[async_trait]
impl RoutingProvider for Unrouted {
    async fn alternates(&self, _: &Waypoint, _: &Waypoint) -> Result<Vec<Vec<Waypoint>>, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

fn base_route() -> Route {
    Route::build(RouteDraft {
        id: "base".to_string(),
        owner_id: "runner-1".to_string(),
        name: "Harbour line".to_string(),
        waypoints: vec![
            Waypoint::new(37.0, -122.0, 0),
            Waypoint::new(37.01, -122.0, 1),
            Waypoint::new(37.02, -122.0, 2),
        ],
        route_type: RouteType::PointToPoint,
        elevation_gain_m: None,
        parent_route_id: None,
        created_at: Utc::now(),
    })
    .expect("valid base route")
}

fn optimizer(
    environment: Arc<dyn EnvironmentalProvider>,
    routing: Arc<dyn RoutingProvider>,
    deadline: Duration,
) -> RouteOptimizer {
    let fetcher = Arc::new(SampleFetcher::new(
        environment,
        FetcherConfig {
            call_timeout: Duration::from_secs(5),
            max_retries: 0,
            max_inflight: 8,
            cache_ttl: Duration::from_secs(600),
            cache_max_entries: 1000,
            retry_base: Duration::from_millis(10),
        },
    ));
    let scorer = Arc::new(RouteScorer::new(
        fetcher,
        Arc::new(ZoneMap::default()),
        SamplerConfig::default(),
    ));
    RouteOptimizer::new(
        scorer,
        routing,
        OptimizerSettings {
            candidates: CandidateConfig::default(),
            max_concurrent_scorings: 3,
            min_improvement_pct: 5.0,
            deadline,
        },
    )
}

fn request(optimization_type: OptimizationType, seed: u64) -> OptimizationRequest {
    OptimizationRequest {
        optimization_type,
        run: RunContext::now(HealthProfile::default()),
        seed,
    }
}

#[tokio::test]
async fn provider_alternate_wins_when_cleaner() {
    let optimizer = optimizer(
        Arc::new(EastIsCleaner {
            cutoff_lon: -121.999,
            delay: Duration::ZERO,
        }),
        Arc::new(Detour),
        Duration::from_secs(10),
    );
    let base = base_route();

    let outcome = optimizer
        .optimize(
            &base,
            &request(OptimizationType::ProviderAlternates, 1),
            &CancellationToken::new(),
        )
        .await
        .expect("optimization runs");

    assert_eq!(outcome.candidates_evaluated, 1);
    assert!(matches!(outcome.selection, Selection::Improved { .. }));
    let (winner, score) = outcome.winner.clone().expect("winner");
    assert_eq!(winner.parent_route_id.as_deref(), Some("base"));
    assert!(score.exposure_score < outcome.base_score.exposure_score);
    assert!((winner.distance_km - base.distance_km).abs() / base.distance_km <= 0.15);
    assert!(outcome.improvement_pct() >= 5.0);
}

#[tokio::test]
async fn uniform_air_keeps_the_base_route() {
    let optimizer = optimizer(
        Arc::new(EastIsCleaner {
            cutoff_lon: 180.0,
            delay: Duration::ZERO,
        }),
        Arc::new(Unrouted),
        Duration::from_secs(10),
    );
    let base = base_route();

    let outcome = optimizer
        .optimize(
            &base,
            &request(OptimizationType::Combined, 42),
            &CancellationToken::new(),
        )
        .await
        .expect("optimization runs");

    assert!(matches!(outcome.selection, Selection::NoImprovement { .. }));
    assert!(outcome.winner.is_none());
    assert_eq!(outcome.improvement_pct(), 0.0);
}

#[tokio::test]
async fn winner_never_scores_worse_than_base() {
    let base = base_route();
    for seed in [3_u64, 17, 99, 2024] {
        let optimizer = optimizer(
            Arc::new(EastIsCleaner {
                cutoff_lon: -122.001,
                delay: Duration::ZERO,
            }),
            Arc::new(Unrouted),
            Duration::from_secs(10),
        );
        let outcome = optimizer
            .optimize(
                &base,
                &request(OptimizationType::Perturbation, seed),
                &CancellationToken::new(),
            )
            .await
            .expect("optimization runs");

        if let Some((route, score)) = &outcome.winner {
            assert!(score.exposure_score < outcome.base_score.exposure_score);
            assert_eq!(
                (route.start().lat, route.start().lon),
                (base.start().lat, base.start().lon)
            );
            assert_eq!(
                (route.end().lat, route.end().lon),
                (base.end().lat, base.end().lon)
            );
        }
        assert!(outcome.candidates_scored <= outcome.candidates_evaluated);
    }
}

#[tokio::test]
async fn slow_providers_hit_the_deadline() {
    let optimizer = optimizer(
        Arc::new(EastIsCleaner {
            cutoff_lon: 0.0,
            delay: Duration::from_secs(3),
        }),
        Arc::new(Unrouted),
        Duration::from_millis(200),
    );
    let cancel = CancellationToken::new();

    let result = optimizer
        .optimize(
            &base_route(),
            &request(OptimizationType::Perturbation, 5),
            &cancel,
        )
        .await;

    assert!(matches!(result, Err(ApiError::DeadlineExceeded(_))));
    assert!(cancel.is_cancelled());
}

#[tokio::test]
async fn sensitive_runner_still_gets_the_cleaner_route_in_smog() {
    let optimizer = optimizer(
        Arc::new(Smog {
            cutoff_lon: -121.999,
        }),
        Arc::new(Detour),
        Duration::from_secs(10),
    );
    let base = base_route();
    let request = OptimizationRequest {
        optimization_type: OptimizationType::ProviderAlternates,
        run: RunContext::now(HealthProfile {
            conditions: vec![HealthCondition::Asthma],
            ..Default::default()
        }),
        seed: 5,
    };

    let outcome = optimizer
        .optimize(&base, &request, &CancellationToken::new())
        .await
        .expect("optimization runs");

    // both routes saturate the normalized score
    assert_eq!(outcome.base_score.exposure_score, 1.0);
    assert!((outcome.base_score.weighted_exposure - 560.0).abs() < 1e-9);
    let (_, score) = outcome.winner.clone().expect("winner");
    assert_eq!(score.exposure_score, 1.0);
    assert!(score.weighted_exposure < outcome.base_score.weighted_exposure);
    assert!(outcome.improvement_pct() >= 5.0);
}
