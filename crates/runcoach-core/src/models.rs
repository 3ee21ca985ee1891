//! Core data models for the exposure optimizer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::spatial::{haversine_distance, route_distance_m};

/// Start and end closer than this are treated as the same point (loop closure).
pub const LOOP_CLOSURE_M: f64 = 50.0;

/// A single geographic coordinate in a route's ordered path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub sequence_index: usize,
    /// Optional elevation, used to derive elevation gain when every waypoint has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation_m: Option<f64>,
}

impl Waypoint {
    pub fn new(lat: f64, lon: f64, sequence_index: usize) -> Self {
        Self {
            lat,
            lon,
            sequence_index,
            elevation_m: None,
        }
    }

    /// Coordinates are finite and inside WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    pub fn distance_to(&self, other: &Waypoint) -> f64 {
        haversine_distance(self.lat, self.lon, other.lat, other.lon)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    #[default]
    Loop,
    PointToPoint,
    OutAndBack,
}

impl RouteType {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteType::Loop => "loop",
            RouteType::PointToPoint => "point_to_point",
            RouteType::OutAndBack => "out_and_back",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "loop" => Some(RouteType::Loop),
            "point_to_point" => Some(RouteType::PointToPoint),
            "out_and_back" => Some(RouteType::OutAndBack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Moderate,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Moderate => "moderate",
            Difficulty::Hard => "hard",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "easy" => Some(Difficulty::Easy),
            "moderate" => Some(Difficulty::Moderate),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }

    /// Rough difficulty from distance and climb (10 m of climb ~ 0.1 km of effort).
    pub fn from_metrics(distance_km: f64, elevation_gain_m: f64) -> Self {
        let effort_km = distance_km + elevation_gain_m / 100.0;
        if effort_km < 5.0 {
            Difficulty::Easy
        } else if effort_km < 12.0 {
            Difficulty::Moderate
        } else {
            Difficulty::Hard
        }
    }
}

/// An immutable running route. Optimization always produces a new Route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub waypoints: Vec<Waypoint>,
    pub distance_km: f64,
    pub elevation_gain_m: f64,
    pub route_type: RouteType,
    pub difficulty: Difficulty,
    pub created_at: DateTime<Utc>,
    /// Route this one was optimized from
    #[serde(default)]
    pub parent_route_id: Option<String>,
}

/// Everything needed to build a [`Route`] except the derived metrics.
#[derive(Debug, Clone)]
pub struct RouteDraft {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub waypoints: Vec<Waypoint>,
    pub route_type: RouteType,
    /// Declared climb, used when waypoints carry no elevation
    pub elevation_gain_m: Option<f64>,
    pub parent_route_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Route {
    /// Validate a draft and derive distance, elevation gain and difficulty.
    ///
    /// Sequence indices are rewritten to match the waypoint order.
    pub fn build(draft: RouteDraft) -> Result<Route, CoreError> {
        if draft.waypoints.len() < 2 {
            return Err(CoreError::Validation(format!(
                "route needs at least 2 waypoints, got {}",
                draft.waypoints.len()
            )));
        }
        if let Some(bad) = draft.waypoints.iter().find(|wp| !wp.is_valid()) {
            return Err(CoreError::Validation(format!(
                "invalid coordinate ({}, {})",
                bad.lat, bad.lon
            )));
        }
        if let Some(gain) = draft.elevation_gain_m {
            if !gain.is_finite() || gain < 0.0 {
                return Err(CoreError::Validation(format!(
                    "elevation gain must be a non-negative number, got {}",
                    gain
                )));
            }
        }

        let mut waypoints = draft.waypoints;
        for (idx, wp) in waypoints.iter_mut().enumerate() {
            wp.sequence_index = idx;
        }

        let distance_km = route_distance_m(&waypoints) / 1000.0;
        let elevation_gain_m = elevation_gain_from_waypoints(&waypoints)
            .or(draft.elevation_gain_m)
            .unwrap_or(0.0);

        Ok(Route {
            id: draft.id,
            owner_id: draft.owner_id,
            name: draft.name,
            difficulty: Difficulty::from_metrics(distance_km, elevation_gain_m),
            waypoints,
            distance_km,
            elevation_gain_m,
            route_type: draft.route_type,
            created_at: draft.created_at,
            parent_route_id: draft.parent_route_id,
        })
    }

    pub fn start(&self) -> &Waypoint {
        &self.waypoints[0]
    }

    pub fn end(&self) -> &Waypoint {
        &self.waypoints[self.waypoints.len() - 1]
    }

    pub fn is_closed_loop(&self) -> bool {
        self.waypoints.len() >= 2 && self.start().distance_to(self.end()) <= LOOP_CLOSURE_M
    }
}

/// Sum of positive elevation deltas, only when every waypoint has an elevation.
pub fn elevation_gain_from_waypoints(waypoints: &[Waypoint]) -> Option<f64> {
    let elevations: Option<Vec<f64>> = waypoints.iter().map(|wp| wp.elevation_m).collect();
    let elevations = elevations?;
    if elevations.len() < 2 {
        return None;
    }
    Some(
        elevations
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).max(0.0))
            .sum(),
    )
}

/// Environmental conditions at one sample point and instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureSample {
    pub waypoint_index: usize,
    pub timestamp: DateTime<Utc>,
    pub aqi: f64,
    pub pm25: f64,
    pub pollen_index: Option<f64>,
    pub wind_speed: Option<f64>,
    pub temperature: Option<f64>,
    /// False when the air-quality provider failed for this point
    pub data_available: bool,
}

impl ExposureSample {
    pub fn unavailable(waypoint_index: usize, timestamp: DateTime<Utc>) -> Self {
        Self {
            waypoint_index,
            timestamp,
            aqi: 0.0,
            pm25: 0.0,
            pollen_index: None,
            wind_speed: None,
            temperature: None,
            data_available: false,
        }
    }
}

/// Derived exposure metrics for one route. Recomputed on demand, never stored as truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteExposureScore {
    pub route_id: String,
    pub avg_aqi: f64,
    pub max_aqi: f64,
    /// Normalized [0, 1] exposure
    pub exposure_score: f64,
    /// Dwell-weighted AQI equivalent after sensitivity and pollen, unclamped.
    /// Routes are ranked on this.
    pub weighted_exposure: f64,
    pub green_coverage: f64,
    pub safety_score: f64,
    /// Fewer than half of the samples were available
    pub low_confidence: bool,
    /// Share of samples that were available, 0..=1
    pub data_completeness: f64,
    pub samples_used: usize,
    pub samples_total: usize,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationType {
    /// Lateral waypoint perturbation toward cleaner corridors
    Perturbation,
    /// Alternate paths from the routing provider
    ProviderAlternates,
    #[default]
    Combined,
}

impl OptimizationType {
    pub fn uses_perturbation(self) -> bool {
        matches!(self, OptimizationType::Perturbation | OptimizationType::Combined)
    }

    pub fn uses_alternates(self) -> bool {
        matches!(
            self,
            OptimizationType::ProviderAlternates | OptimizationType::Combined
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OptimizationType::Perturbation => "perturbation",
            OptimizationType::ProviderAlternates => "provider_alternates",
            OptimizationType::Combined => "combined",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "perturbation" => Some(OptimizationType::Perturbation),
            "provider_alternates" => Some(OptimizationType::ProviderAlternates),
            "combined" => Some(OptimizationType::Combined),
            _ => None,
        }
    }
}

/// Links a base route to the optimized route chosen for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub id: String,
    pub owner_id: String,
    pub base_route_id: String,
    pub optimized_route_id: String,
    pub candidates_evaluated: usize,
    pub actual_improvement_pct: f64,
    pub optimization_type: OptimizationType,
    pub base_exposure_score: f64,
    pub optimized_exposure_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// A scored future run window. Ephemeral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    pub route_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub avg_aqi: f64,
    pub exposure_score: f64,
    pub quality: WindowQuality,
    pub confidence: f64,
}

/// Weekly exposure allowance for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureBudget {
    pub user_id: String,
    pub week_start: DateTime<Utc>,
    pub consumed_exposure_units: f64,
    pub budget_limit_units: f64,
    pub usage_percentage: f64,
    pub remaining_budget: f64,
}

impl ExposureBudget {
    pub fn new(user_id: impl Into<String>, week_start: DateTime<Utc>, limit_units: f64) -> Self {
        let mut budget = Self {
            user_id: user_id.into(),
            week_start,
            consumed_exposure_units: 0.0,
            budget_limit_units: limit_units.max(f64::EPSILON),
            usage_percentage: 0.0,
            remaining_budget: 0.0,
        };
        budget.refresh();
        budget
    }

    /// Add consumption. Negative or non-finite amounts are ignored so the
    /// counter only grows within a week.
    pub fn consume(&mut self, units: f64) {
        if units.is_finite() && units > 0.0 {
            self.consumed_exposure_units += units;
        }
        self.refresh();
    }

    fn refresh(&mut self) {
        self.usage_percentage = self.consumed_exposure_units / self.budget_limit_units * 100.0;
        self.remaining_budget = (self.budget_limit_units - self.consumed_exposure_units).max(0.0);
    }
}

/// One completed run. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSession {
    pub id: String,
    pub user_id: String,
    pub route_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_min: f64,
    pub avg_aqi_experienced: f64,
}

impl RunSession {
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.started_at + Duration::milliseconds((self.duration_min * 60_000.0).round() as i64)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.duration_min.is_finite() || self.duration_min <= 0.0 {
            return Err(CoreError::Validation(format!(
                "duration_min must be positive, got {}",
                self.duration_min
            )));
        }
        if self.duration_min > 24.0 * 60.0 {
            return Err(CoreError::Validation(
                "duration_min exceeds 24 hours".to_string(),
            ));
        }
        if !self.avg_aqi_experienced.is_finite() || self.avg_aqi_experienced < 0.0 {
            return Err(CoreError::Validation(format!(
                "avg_aqi_experienced must be a non-negative number, got {}",
                self.avg_aqi_experienced
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(waypoints: Vec<Waypoint>) -> RouteDraft {
        RouteDraft {
            id: "r1".to_string(),
            owner_id: "u1".to_string(),
            name: "Test".to_string(),
            waypoints,
            route_type: RouteType::PointToPoint,
            elevation_gain_m: Some(12.0),
            parent_route_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn build_rejects_single_waypoint() {
        let err = Route::build(draft(vec![Waypoint::new(37.0, -122.0, 0)])).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn build_rejects_out_of_range_coordinates() {
        let err = Route::build(draft(vec![
            Waypoint::new(37.0, -122.0, 0),
            Waypoint::new(97.0, -122.0, 1),
        ]))
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn build_renumbers_and_measures() {
        let route = Route::build(draft(vec![
            Waypoint::new(37.0, -122.0, 7),
            Waypoint::new(37.01, -122.0, 3),
        ]))
        .unwrap();
        assert_eq!(route.waypoints[0].sequence_index, 0);
        assert_eq!(route.waypoints[1].sequence_index, 1);
        assert!((route.distance_km - 1.112).abs() < 0.01);
        assert_eq!(route.elevation_gain_m, 12.0);
    }

    #[test]
    fn waypoint_elevations_override_declared_gain() {
        let mut a = Waypoint::new(37.0, -122.0, 0);
        let mut b = Waypoint::new(37.005, -122.0, 1);
        let mut c = Waypoint::new(37.01, -122.0, 2);
        a.elevation_m = Some(10.0);
        b.elevation_m = Some(30.0);
        c.elevation_m = Some(25.0);
        let route = Route::build(draft(vec![a, b, c])).unwrap();
        assert_eq!(route.elevation_gain_m, 20.0);
    }

    #[test]
    fn budget_remaining_never_negative() {
        let mut budget = ExposureBudget::new("u1", Utc::now(), 700.0);
        budget.consume(250.0);
        budget.consume(500.0);
        assert!((budget.usage_percentage - 107.142857).abs() < 1e-3);
        assert_eq!(budget.remaining_budget, 0.0);
    }

    #[test]
    fn budget_ignores_negative_consumption() {
        let mut budget = ExposureBudget::new("u1", Utc::now(), 100.0);
        budget.consume(40.0);
        budget.consume(-10.0);
        budget.consume(f64::NAN);
        assert_eq!(budget.consumed_exposure_units, 40.0);
    }
}
