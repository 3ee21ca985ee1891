//! Route exposure scoring: sample, fetch, score.

use chrono::{DateTime, Utc};
use runcoach_core::{
    sample_route, score_samples, CoreError, HealthProfile, Route, RouteExposureScore,
    SamplerConfig, ZoneMap,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::fetcher::{SampleFetcher, SampleRequest};

/// Who is running and when the run starts.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub profile: HealthProfile,
    pub start: DateTime<Utc>,
    /// Overrides the configured pace for elapsed-time estimates
    pub pace_min_per_km: Option<f64>,
}

impl RunContext {
    pub fn now(profile: HealthProfile) -> Self {
        Self {
            profile,
            start: Utc::now(),
            pace_min_per_km: None,
        }
    }

    pub fn starting_at(&self, start: DateTime<Utc>) -> Self {
        Self {
            start,
            ..self.clone()
        }
    }
}

pub struct RouteScorer {
    fetcher: Arc<SampleFetcher>,
    zones: Arc<ZoneMap>,
    sampler: SamplerConfig,
}

impl RouteScorer {
    pub fn new(fetcher: Arc<SampleFetcher>, zones: Arc<ZoneMap>, sampler: SamplerConfig) -> Self {
        Self {
            fetcher,
            zones,
            sampler,
        }
    }

    pub fn zones(&self) -> &ZoneMap {
        &self.zones
    }

    pub fn fetcher(&self) -> &Arc<SampleFetcher> {
        &self.fetcher
    }

    pub async fn score_route(
        &self,
        route: &Route,
        run: &RunContext,
        cancel: &CancellationToken,
    ) -> Result<RouteExposureScore, CoreError> {
        let sampler = self.sampler.with_pace(run.pace_min_per_km);
        let points = sample_route(route, &sampler);
        let requests = SampleRequest::for_points(&points, run.start);
        let samples = self.fetcher.fetch(&requests, cancel).await;
        let score = score_samples(
            &route.id,
            &points,
            &samples,
            &run.profile,
            &self.zones,
            Utc::now(),
        )?;

        if score.low_confidence {
            tracing::debug!(
                route_id = %route.id,
                completeness = score.data_completeness,
                "Low-confidence exposure score"
            );
        }
        Ok(score)
    }
}
