//! Candidate route generation.
//!
//! Two sources feed the optimizer: seeded lateral perturbations of the base
//! route's interior waypoints, and alternate polylines from a routing
//! provider. Both pass through the same distance and elevation tolerances.
//! This module also builds fresh loop and out-and-back routes from a start
//! point and a distance target.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::{Route, RouteDraft, RouteType, Waypoint};
use crate::spatial::{
    haversine_distance, interpolate, lateral_bearing, offset_by_bearing, route_distance_m,
};
use crate::zones::ZoneMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateConfig {
    pub max_candidates: usize,
    /// Allowed relative distance deviation from the base route
    pub distance_tolerance: f64,
    /// Allowed relative elevation-gain deviation from the base route
    pub elevation_tolerance: f64,
    pub min_offset_m: f64,
    pub max_offset_m: f64,
    /// Probability of shifting toward the side with the lower zone AQI
    pub cleaner_side_bias: f64,
    /// Perturbation attempts allowed per requested candidate
    pub attempts_per_candidate: usize,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            max_candidates: 6,
            distance_tolerance: 0.15,
            elevation_tolerance: 0.25,
            min_offset_m: 50.0,
            max_offset_m: 400.0,
            cleaner_side_bias: 0.8,
            attempts_per_candidate: 8,
        }
    }
}

/// Interior waypoints added to a route that has none to move.
const DENSIFY_POINTS: usize = 3;

/// Relative deviation of `value` from `reference`. Zero references only
/// accept zero values.
fn within_tolerance(value: f64, reference: f64, tolerance: f64) -> bool {
    if reference.abs() <= f64::EPSILON {
        return value.abs() <= f64::EPSILON;
    }
    ((value - reference) / reference).abs() <= tolerance
}

/// Elevation gain for a reshaped route without elevation data: the base
/// climb scaled with distance.
fn estimated_elevation_gain(base: &Route, distance_km: f64) -> f64 {
    if base.distance_km <= f64::EPSILON {
        return base.elevation_gain_m;
    }
    base.elevation_gain_m * distance_km / base.distance_km
}

fn satisfies_tolerances(base: &Route, candidate: &Route, config: &CandidateConfig) -> bool {
    within_tolerance(candidate.distance_km, base.distance_km, config.distance_tolerance)
        && within_tolerance(
            candidate.elevation_gain_m,
            base.elevation_gain_m,
            config.elevation_tolerance,
        )
}

fn strip_elevation(waypoints: &mut [Waypoint]) {
    for wp in waypoints {
        wp.elevation_m = None;
    }
}

/// Guarantee at least one movable waypoint by inserting evenly spaced
/// points along a two-point route.
fn densify(waypoints: &[Waypoint]) -> Vec<Waypoint> {
    if waypoints.len() != 2 {
        return waypoints.to_vec();
    }
    let (start, end) = (&waypoints[0], &waypoints[1]);
    let mut out = Vec::with_capacity(DENSIFY_POINTS + 2);
    out.push(start.clone());
    for i in 1..=DENSIFY_POINTS {
        let fraction = i as f64 / (DENSIFY_POINTS + 1) as f64;
        let (lat, lon) = interpolate(start, end, fraction);
        out.push(Waypoint::new(lat, lon, i));
    }
    out.push(end.clone());
    out
}

fn candidate_route(
    base: &Route,
    id: String,
    name: String,
    mut waypoints: Vec<Waypoint>,
) -> Result<Route, CoreError> {
    strip_elevation(&mut waypoints);
    let distance_km = route_distance_m(&waypoints) / 1000.0;
    Route::build(RouteDraft {
        id,
        owner_id: base.owner_id.clone(),
        name,
        waypoints,
        route_type: base.route_type,
        elevation_gain_m: Some(estimated_elevation_gain(base, distance_km)),
        parent_route_id: Some(base.id.clone()),
        created_at: base.created_at,
    })
}

/// One perturbation: a triangular bump of lateral offsets centered on a
/// random interior waypoint. Endpoints never move, so point-to-point anchors
/// and loop closure are preserved.
fn perturb(
    waypoints: &[Waypoint],
    zones: &ZoneMap,
    config: &CandidateConfig,
    rng: &mut StdRng,
) -> Vec<Waypoint> {
    let interior = waypoints.len() - 2;
    let center = rng.random_range(1..=interior);
    let half_width = rng.random_range(1..=interior.clamp(1, 3));
    let (min_offset, max_offset) = if config.min_offset_m < config.max_offset_m {
        (config.min_offset_m.max(0.0), config.max_offset_m)
    } else {
        (config.max_offset_m.max(0.0), config.max_offset_m.max(0.0) + 1.0)
    };
    let amplitude = rng.random_range(min_offset..max_offset);

    let side = match lateral_bearing(waypoints, center) {
        Some(lateral) => {
            let anchor = &waypoints[center];
            let (r_lat, r_lon) = offset_by_bearing(anchor.lat, anchor.lon, amplitude, lateral);
            let (l_lat, l_lon) = offset_by_bearing(anchor.lat, anchor.lon, -amplitude, lateral);
            let right = zones.estimated_aqi(r_lat, r_lon);
            let left = zones.estimated_aqi(l_lat, l_lon);
            let cleaner = if right < left {
                1.0
            } else if left < right {
                -1.0
            } else if rng.random_bool(0.5) {
                1.0
            } else {
                -1.0
            };
            if rng.random_bool(config.cleaner_side_bias.clamp(0.0, 1.0)) {
                cleaner
            } else {
                -cleaner
            }
        }
        None => 1.0,
    };

    let mut out = waypoints.to_vec();
    for idx in 1..waypoints.len() - 1 {
        let distance = idx.abs_diff(center) as f64;
        let taper = 1.0 - distance / (half_width as f64 + 1.0);
        if taper <= 0.0 {
            continue;
        }
        if let Some(lateral) = lateral_bearing(waypoints, idx) {
            let wp = &waypoints[idx];
            let (lat, lon) = offset_by_bearing(wp.lat, wp.lon, side * amplitude * taper, lateral);
            out[idx].lat = lat;
            out[idx].lon = lon;
        }
    }
    out
}

/// Propose up to `config.max_candidates` perturbed variants of `base`.
///
/// Deterministic for a given seed. Attempts are bounded, so the result may
/// be empty when no perturbation satisfies the tolerances.
pub fn generate_candidates(
    base: &Route,
    zones: &ZoneMap,
    config: &CandidateConfig,
    seed: u64,
) -> Vec<Route> {
    if config.max_candidates == 0 || base.waypoints.len() < 2 {
        return Vec::new();
    }
    let waypoints = densify(&base.waypoints);
    let mut rng = StdRng::seed_from_u64(seed);
    let max_attempts = config.max_candidates * config.attempts_per_candidate.max(1);

    let mut candidates = Vec::with_capacity(config.max_candidates);
    for _ in 0..max_attempts {
        if candidates.len() >= config.max_candidates {
            break;
        }
        let shifted = perturb(&waypoints, zones, config, &mut rng);
        let n = candidates.len() + 1;
        let Ok(route) = candidate_route(
            base,
            format!("{}-candidate-{}", base.id, n),
            format!("{} (alternative {})", base.name, n),
            shifted,
        ) else {
            continue;
        };
        if satisfies_tolerances(base, &route, config) {
            candidates.push(route);
        }
    }
    candidates
}

/// Turn provider polylines into candidates. Each polyline is pinned to the
/// base route's exact endpoints; ones outside tolerance are dropped.
pub fn filter_alternates(
    base: &Route,
    polylines: Vec<Vec<Waypoint>>,
    config: &CandidateConfig,
) -> Vec<Route> {
    let mut accepted = Vec::new();
    for mut polyline in polylines {
        if polyline.len() < 2 {
            continue;
        }
        let last = polyline.len() - 1;
        polyline[0] = base.start().clone();
        polyline[last] = base.end().clone();
        if polyline == base.waypoints {
            continue;
        }
        let n = accepted.len() + 1;
        let Ok(route) = candidate_route(
            base,
            format!("{}-alternate-{}", base.id, n),
            format!("{} (provider alternative {})", base.name, n),
            polyline,
        ) else {
            continue;
        };
        if satisfies_tolerances(base, &route, config) {
            accepted.push(route);
        }
    }
    accepted
}

/// One generated route layout: a shape and the compass heading it extends in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteShape {
    pub route_type: RouteType,
    pub heading_deg: f64,
}

impl RouteShape {
    /// Loops toward the four compass points, then out-and-backs along the diagonals.
    pub fn catalogue() -> [RouteShape; 8] {
        let lp = |heading_deg| RouteShape {
            route_type: RouteType::Loop,
            heading_deg,
        };
        let ob = |heading_deg| RouteShape {
            route_type: RouteType::OutAndBack,
            heading_deg,
        };
        [
            lp(0.0),
            lp(90.0),
            lp(180.0),
            lp(270.0),
            ob(45.0),
            ob(135.0),
            ob(225.0),
            ob(315.0),
        ]
    }

    fn label(&self) -> String {
        let compass = match self.heading_deg.rem_euclid(360.0).round() as i64 {
            0 => "north",
            45 => "northeast",
            90 => "east",
            135 => "southeast",
            180 => "south",
            225 => "southwest",
            270 => "west",
            315 => "northwest",
            _ => "custom",
        };
        match self.route_type {
            RouteType::Loop => format!("{} loop", compass),
            RouteType::OutAndBack => format!("{} out-and-back", compass),
            RouteType::PointToPoint => format!("{} route", compass),
        }
    }

    /// Waypoints for this shape at unit scale (`scale_m` = loop radius or
    /// out-leg length).
    fn waypoints(&self, start: &Waypoint, scale_m: f64) -> Vec<Waypoint> {
        let heading = self.heading_deg.to_radians();
        let point = |distance_m: f64, bearing_rad: f64| {
            let (lat, lon) = offset_by_bearing(start.lat, start.lon, distance_m, bearing_rad);
            Waypoint::new(lat, lon, 0)
        };
        match self.route_type {
            RouteType::Loop => {
                // Two corners at 0.6 radius: one along the heading, one a quarter turn left.
                let first = point(0.6 * scale_m, heading);
                let second = point(0.6 * scale_m, heading - std::f64::consts::FRAC_PI_2);
                let mut origin = start.clone();
                origin.elevation_m = None;
                vec![origin.clone(), first, second, origin]
            }
            RouteType::OutAndBack | RouteType::PointToPoint => {
                let mid = point(scale_m / 2.0, heading);
                let turn = point(scale_m, heading);
                let mut origin = start.clone();
                origin.elevation_m = None;
                if self.route_type == RouteType::OutAndBack {
                    vec![origin.clone(), mid.clone(), turn, mid, origin]
                } else {
                    vec![origin, mid, turn]
                }
            }
        }
    }
}

/// Build routes from `start` for a target distance, one per catalogue shape
/// up to `count`. Shapes are rescaled once so their length lands on target.
pub fn generate_routes(
    owner_id: &str,
    start: &Waypoint,
    target_km: f64,
    count: usize,
    created_at: DateTime<Utc>,
) -> Result<Vec<Route>, CoreError> {
    if !start.is_valid() {
        return Err(CoreError::Validation(format!(
            "invalid start coordinate ({}, {})",
            start.lat, start.lon
        )));
    }
    if !target_km.is_finite() || !(0.2..=100.0).contains(&target_km) {
        return Err(CoreError::Validation(format!(
            "target distance must be between 0.2 and 100 km, got {}",
            target_km
        )));
    }

    let target_m = target_km * 1000.0;
    let mut routes = Vec::new();
    for (idx, shape) in RouteShape::catalogue().iter().take(count).enumerate() {
        let initial_scale = match shape.route_type {
            RouteType::Loop => target_m / (2.0 * std::f64::consts::PI),
            _ => target_m / 2.0,
        };
        let first_pass = shape.waypoints(start, initial_scale);
        let measured = route_distance_m(&first_pass);
        let scale = if measured > f64::EPSILON {
            initial_scale * target_m / measured
        } else {
            initial_scale
        };
        let waypoints = shape.waypoints(start, scale);

        routes.push(Route::build(RouteDraft {
            id: format!("generated-{}", idx + 1),
            owner_id: owner_id.to_string(),
            name: format!("{:.1} km {}", target_km, shape.label()),
            waypoints,
            route_type: shape.route_type,
            elevation_gain_m: None,
            parent_route_id: None,
            created_at,
        })?);
    }
    Ok(routes)
}

/// Farthest waypoint from the start, used to split a loop into two legs.
pub fn loop_pivot(route: &Route) -> Option<&Waypoint> {
    let start = route.start();
    route.waypoints[1..route.waypoints.len().saturating_sub(1)]
        .iter()
        .max_by(|a, b| {
            let da = haversine_distance(start.lat, start.lon, a.lat, a.lon);
            let db = haversine_distance(start.lat, start.lon, b.lat, b.lon);
            da.total_cmp(&db)
        })
}
