//! Route exposure scoring.
//!
//! Samples are weighted by the running time spent near them. Unavailable
//! samples are excluded from every aggregate; they only lower the reported
//! completeness.

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::health::{sensitivity_multiplier, HealthProfile};
use crate::models::{ExposureSample, RouteExposureScore};
use crate::sampler::SamplePoint;
use crate::zones::ZoneMap;

/// AQI that maps to an exposure score of 1.0.
pub const AQI_REFERENCE_MAX: f64 = 300.0;
/// Below this share of available samples a score is flagged low confidence.
pub const LOW_CONFIDENCE_COMPLETENESS: f64 = 0.5;
/// AQI-equivalent added per pollen index point for pollen-sensitive runners.
pub const POLLEN_AQI_PER_INDEX: f64 = 10.0;

fn aqi_contribution(sample: &ExposureSample, profile: &HealthProfile) -> f64 {
    let pollen = if profile.pollen_sensitive {
        sample
            .pollen_index
            .filter(|p| p.is_finite() && *p > 0.0)
            .map(|p| p * POLLEN_AQI_PER_INDEX)
            .unwrap_or(0.0)
    } else {
        0.0
    };
    sample.aqi.max(0.0) + pollen
}

/// Score a route from its sample points and the samples fetched for them.
///
/// `samples[i]` must describe `points[i]`. Fails with
/// [`CoreError::InsufficientData`] when no sample is available.
pub fn score_samples(
    route_id: &str,
    points: &[SamplePoint],
    samples: &[ExposureSample],
    profile: &HealthProfile,
    zones: &ZoneMap,
    computed_at: DateTime<Utc>,
) -> Result<RouteExposureScore, CoreError> {
    if points.len() != samples.len() {
        return Err(CoreError::Validation(format!(
            "{} samples for {} sample points",
            samples.len(),
            points.len()
        )));
    }

    let samples_total = samples.len();
    let available: Vec<(&SamplePoint, &ExposureSample)> = points
        .iter()
        .zip(samples)
        .filter(|(_, s)| s.data_available && s.aqi.is_finite())
        .collect();

    if available.is_empty() {
        return Err(CoreError::InsufficientData {
            route_id: route_id.to_string(),
            samples_total,
        });
    }

    // A zero-length route has no dwell anywhere; weight samples equally.
    let uniform = available.iter().all(|(p, _)| p.dwell_min <= 0.0);
    let weight = |p: &SamplePoint| if uniform { 1.0 } else { p.dwell_min.max(0.0) };

    let sensitivity = sensitivity_multiplier(profile);
    let mut total_weight = 0.0;
    let mut weighted_aqi = 0.0;
    let mut weighted_exposure = 0.0;
    let mut max_aqi = f64::MIN;
    for (point, sample) in &available {
        let w = weight(*point);
        total_weight += w;
        weighted_aqi += sample.aqi * w;
        weighted_exposure += aqi_contribution(sample, profile) * w * sensitivity;
        max_aqi = max_aqi.max(sample.aqi);
    }

    // Every available sample sits on a zero-dwell endpoint of a non-empty route.
    if total_weight <= 0.0 {
        total_weight = available.len() as f64;
        weighted_aqi = available.iter().map(|(_, s)| s.aqi).sum();
        weighted_exposure = available
            .iter()
            .map(|(_, s)| aqi_contribution(s, profile) * sensitivity)
            .sum();
    }

    let avg_aqi = weighted_aqi / total_weight;
    let weighted_exposure = weighted_exposure / total_weight;
    let exposure_score = (weighted_exposure / AQI_REFERENCE_MAX).clamp(0.0, 1.0);
    let data_completeness = available.len() as f64 / samples_total as f64;

    let coords: Vec<(f64, f64)> = points.iter().map(|p| (p.lat, p.lon)).collect();

    Ok(RouteExposureScore {
        route_id: route_id.to_string(),
        avg_aqi,
        max_aqi,
        exposure_score,
        weighted_exposure,
        green_coverage: zones.green_coverage(&coords),
        safety_score: zones.safety_score(&coords),
        low_confidence: data_completeness < LOW_CONFIDENCE_COMPLETENESS,
        data_completeness,
        samples_used: available.len(),
        samples_total,
        computed_at,
    })
}
