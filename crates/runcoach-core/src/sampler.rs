//! Fixed-interval sampling of a route polyline.
//!
//! Pure and deterministic: the same route and config always produce the same
//! sample points. Spacing is measured along the polyline, positions between
//! waypoints are interpolated on the great circle.

use serde::{Deserialize, Serialize};

use crate::models::Route;
use crate::spatial::{haversine_distance, interpolate};

pub const DEFAULT_SAMPLE_INTERVAL_M: f64 = 250.0;
pub const DEFAULT_PACE_MIN_PER_KM: f64 = 6.0;
const MIN_SAMPLE_INTERVAL_M: f64 = 10.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub interval_m: f64,
    pub pace_min_per_km: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_m: DEFAULT_SAMPLE_INTERVAL_M,
            pace_min_per_km: DEFAULT_PACE_MIN_PER_KM,
        }
    }
}

impl SamplerConfig {
    pub fn with_pace(mut self, pace_min_per_km: Option<f64>) -> Self {
        if let Some(pace) = pace_min_per_km {
            self.pace_min_per_km = pace;
        }
        self
    }

    fn interval(&self) -> f64 {
        if self.interval_m.is_finite() {
            self.interval_m.max(MIN_SAMPLE_INTERVAL_M)
        } else {
            DEFAULT_SAMPLE_INTERVAL_M
        }
    }

    fn pace(&self) -> f64 {
        if self.pace_min_per_km.is_finite() && self.pace_min_per_km > 0.0 {
            self.pace_min_per_km
        } else {
            DEFAULT_PACE_MIN_PER_KM
        }
    }
}

/// A point to fetch environmental data for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub index: usize,
    pub lat: f64,
    pub lon: f64,
    /// Distance along the route from the start
    pub distance_m: f64,
    /// Estimated time since the start of the run
    pub elapsed_min: f64,
    /// Length of the leg ending at this point (0 for the first point)
    pub segment_length_m: f64,
    /// Running time attributed to this point: half of each adjacent leg
    pub dwell_min: f64,
}

/// Reduce a route to evenly spaced sample points.
///
/// Points sit at every `interval_m` along the polyline plus the final
/// endpoint, so a route always yields at least its two endpoints and the
/// count never shrinks as the route gets longer.
pub fn sample_route(route: &Route, config: &SamplerConfig) -> Vec<SamplePoint> {
    let waypoints = &route.waypoints;
    if waypoints.is_empty() {
        return Vec::new();
    }

    let interval = config.interval();
    let pace = config.pace();

    let mut cumulative = Vec::with_capacity(waypoints.len());
    cumulative.push(0.0);
    for pair in waypoints.windows(2) {
        let leg = haversine_distance(pair[0].lat, pair[0].lon, pair[1].lat, pair[1].lon);
        let last = cumulative.last().copied().unwrap_or(0.0);
        cumulative.push(last + leg);
    }
    let total_m = cumulative.last().copied().unwrap_or(0.0);

    let steps = (total_m / interval).ceil() as usize;
    let mut targets: Vec<f64> = (0..steps).map(|k| k as f64 * interval).collect();
    targets.push(total_m);
    if targets.len() < 2 {
        targets.insert(0, 0.0);
    }

    let mut points = Vec::with_capacity(targets.len());
    let mut leg_idx = 0usize;
    for (index, target) in targets.iter().copied().enumerate() {
        while leg_idx + 1 < waypoints.len() - 1 && cumulative[leg_idx + 1] < target {
            leg_idx += 1;
        }
        let (lat, lon) = if waypoints.len() == 1 {
            (waypoints[0].lat, waypoints[0].lon)
        } else {
            let leg_start = cumulative[leg_idx];
            let leg_len = cumulative[leg_idx + 1] - leg_start;
            let fraction = if leg_len <= f64::EPSILON {
                0.0
            } else {
                (target - leg_start) / leg_len
            };
            interpolate(&waypoints[leg_idx], &waypoints[leg_idx + 1], fraction)
        };

        let segment_length_m = if index == 0 {
            0.0
        } else {
            target - targets[index - 1]
        };

        points.push(SamplePoint {
            index,
            lat,
            lon,
            distance_m: target,
            elapsed_min: target / 1000.0 * pace,
            segment_length_m,
            dwell_min: 0.0,
        });
    }

    assign_dwell(&mut points, pace);
    points
}

fn assign_dwell(points: &mut [SamplePoint], pace: f64) {
    let count = points.len();
    for i in 0..count {
        let before = points[i].segment_length_m;
        let after = if i + 1 < count {
            points[i + 1].segment_length_m
        } else {
            0.0
        };
        points[i].dwell_min = (before + after) / 2.0 / 1000.0 * pace;
    }
}

/// Total running time of a sampled route in minutes.
pub fn total_duration_min(points: &[SamplePoint]) -> f64 {
    points.last().map(|p| p.elapsed_min).unwrap_or(0.0)
}
