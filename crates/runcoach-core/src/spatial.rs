//! Spatial math for route sampling, perturbation and distance calculations.

use crate::models::Waypoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two points given in degrees.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Total polyline length in meters.
pub fn route_distance_m(waypoints: &[Waypoint]) -> f64 {
    waypoints
        .windows(2)
        .map(|pair| haversine_distance(pair[0].lat, pair[0].lon, pair[1].lat, pair[1].lon))
        .sum()
}

/// Initial bearing from point 1 to point 2 in radians (0 = north, π/2 = east).
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let x = delta_lambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    x.atan2(y)
}

/// Destination `distance_m` along `bearing_rad` from (`lat`, `lon`), in degrees.
pub fn offset_by_bearing(lat: f64, lon: f64, distance_m: f64, bearing_rad: f64) -> (f64, f64) {
    if distance_m.abs() <= f64::EPSILON {
        return (lat, lon);
    }

    let lat1 = lat.to_radians();
    let lon1 = lon.to_radians();
    let angular_distance = distance_m / EARTH_RADIUS_M;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_ad = angular_distance.sin();
    let cos_ad = angular_distance.cos();

    let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * sin_ad * cos_lat1;
    let x = cos_ad - sin_lat1 * sin_lat2;
    let mut lon2 = lon1 + y.atan2(x);
    lon2 =
        (lon2 + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI) - std::f64::consts::PI;

    (lat2.to_degrees(), lon2.to_degrees())
}

/// Point at `fraction` (0..=1) of the way from `start` to `end`.
pub fn interpolate(start: &Waypoint, end: &Waypoint, fraction: f64) -> (f64, f64) {
    let fraction = fraction.clamp(0.0, 1.0);
    if fraction <= 0.0 {
        return (start.lat, start.lon);
    }
    if fraction >= 1.0 {
        return (end.lat, end.lon);
    }
    let distance_m = haversine_distance(start.lat, start.lon, end.lat, end.lon);
    let heading = bearing(start.lat, start.lon, end.lat, end.lon);
    offset_by_bearing(start.lat, start.lon, distance_m * fraction, heading)
}

/// Bearing perpendicular to the path at waypoint `idx`, averaged over the
/// incoming and outgoing legs. Positive offsets go to the right of travel.
pub fn lateral_bearing(waypoints: &[Waypoint], idx: usize) -> Option<f64> {
    if waypoints.len() < 2 || idx >= waypoints.len() {
        return None;
    }
    let prev = &waypoints[idx.saturating_sub(1)];
    let next = &waypoints[(idx + 1).min(waypoints.len() - 1)];
    if haversine_distance(prev.lat, prev.lon, next.lat, next.lon) <= f64::EPSILON {
        let here = &waypoints[idx];
        let heading = bearing(prev.lat, prev.lon, here.lat, here.lon);
        return Some(heading + std::f64::consts::FRAC_PI_2);
    }
    let heading = bearing(prev.lat, prev.lon, next.lat, next.lon);
    Some(heading + std::f64::consts::FRAC_PI_2)
}
