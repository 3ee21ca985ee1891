//! Coarse pollution-zone map.
//!
//! Circular zones with a baseline AQI. Used as a historical heuristic for
//! steering perturbations and for green coverage and safety metrics. Never a
//! substitute for live provider data.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::spatial::haversine_distance;

/// AQI assumed outside every zone.
pub const BACKGROUND_AQI: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Green,
    Traffic,
    Industrial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollutionZone {
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
    pub baseline_aqi: f64,
    pub kind: ZoneKind,
}

impl PollutionZone {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        haversine_distance(self.lat, self.lon, lat, lon) <= self.radius_m
    }

    fn validate(&self) -> Result<(), CoreError> {
        let coords_ok = self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon);
        if !coords_ok {
            return Err(CoreError::Validation(format!(
                "zone center ({}, {}) is out of range",
                self.lat, self.lon
            )));
        }
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return Err(CoreError::Validation(format!(
                "zone radius must be positive, got {}",
                self.radius_m
            )));
        }
        if !self.baseline_aqi.is_finite() || self.baseline_aqi < 0.0 {
            return Err(CoreError::Validation(format!(
                "zone baseline AQI must be non-negative, got {}",
                self.baseline_aqi
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneMap {
    pub zones: Vec<PollutionZone>,
}

impl ZoneMap {
    pub fn new(zones: Vec<PollutionZone>) -> Result<Self, CoreError> {
        for zone in &zones {
            zone.validate()?;
        }
        Ok(Self { zones })
    }

    /// Parse either `{"zones": [...]}` or a bare array of zones.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Wrapped { zones: Vec<PollutionZone> },
            Bare(Vec<PollutionZone>),
        }

        let shape: Shape = serde_json::from_str(raw)
            .map_err(|err| CoreError::Validation(format!("invalid zone file: {}", err)))?;
        let zones = match shape {
            Shape::Wrapped { zones } => zones,
            Shape::Bare(zones) => zones,
        };
        Self::new(zones)
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Baseline AQI at a point. Overlapping zones take the worst baseline,
    /// except that green zones pull the value down when nothing dirtier covers it.
    pub fn estimated_aqi(&self, lat: f64, lon: f64) -> f64 {
        let mut dirtiest: Option<f64> = None;
        let mut cleanest_green: Option<f64> = None;
        for zone in self.zones.iter().filter(|z| z.contains(lat, lon)) {
            match zone.kind {
                ZoneKind::Green => {
                    cleanest_green = Some(
                        cleanest_green.map_or(zone.baseline_aqi, |v| v.min(zone.baseline_aqi)),
                    );
                }
                ZoneKind::Traffic | ZoneKind::Industrial => {
                    dirtiest =
                        Some(dirtiest.map_or(zone.baseline_aqi, |v| v.max(zone.baseline_aqi)));
                }
            }
        }
        dirtiest.or(cleanest_green).unwrap_or(BACKGROUND_AQI)
    }

    fn share_in(&self, points: &[(f64, f64)], kind: ZoneKind) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let inside = points
            .iter()
            .filter(|(lat, lon)| {
                self.zones
                    .iter()
                    .any(|z| z.kind == kind && z.contains(*lat, *lon))
            })
            .count();
        inside as f64 / points.len() as f64
    }

    /// Share of points inside green zones.
    pub fn green_coverage(&self, points: &[(f64, f64)]) -> f64 {
        self.share_in(points, ZoneKind::Green)
    }

    /// 1 minus the share of points inside traffic zones.
    pub fn safety_score(&self, points: &[(f64, f64)]) -> f64 {
        1.0 - self.share_in(points, ZoneKind::Traffic)
    }
}
