//! Environmental and routing data providers.
//!
//! Providers answer one point and one hour at a time. Failures come back as
//! [`ProviderError`] and are absorbed by the sample fetcher; nothing here
//! retries or caches.

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use reqwest::Client;
use runcoach_core::{Waypoint, ZoneKind, ZoneMap};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("provider call timed out")]
    Timeout,
    #[error("provider returned HTTP {0}")]
    Http(u16),
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("provider response could not be decoded: {0}")]
    Decode(String),
    #[error("provider response had no value for the requested hour")]
    MissingValue,
    #[error("provider is disabled")]
    Disabled,
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::Http(status.as_u16())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirQualityReading {
    pub aqi: f64,
    pub pm25: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollenReading {
    /// 0-12 scale
    pub index: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherReading {
    pub temperature_c: f64,
    pub wind_speed_mps: f64,
}

#[async_trait]
pub trait EnvironmentalProvider: Send + Sync {
    async fn air_quality(
        &self,
        lat: f64,
        lon: f64,
        at: DateTime<Utc>,
    ) -> Result<AirQualityReading, ProviderError>;

    async fn pollen(&self, lat: f64, lon: f64, at: DateTime<Utc>)
        -> Result<PollenReading, ProviderError>;

    async fn weather(
        &self,
        lat: f64,
        lon: f64,
        at: DateTime<Utc>,
    ) -> Result<WeatherReading, ProviderError>;
}

#[async_trait]
pub trait RoutingProvider: Send + Sync {
    /// Alternate walking paths between two anchors, best first.
    async fn alternates(
        &self,
        from: &Waypoint,
        to: &Waypoint,
    ) -> Result<Vec<Vec<Waypoint>>, ProviderError>;
}

/// Build the providers selected by configuration.
pub fn from_config(
    config: &Config,
    zones: Arc<ZoneMap>,
) -> anyhow::Result<(Arc<dyn EnvironmentalProvider>, Arc<dyn RoutingProvider>)> {
    let client = Client::builder()
        .timeout(config.provider_timeout())
        .user_agent(concat!("runcoach-server/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let environment: Arc<dyn EnvironmentalProvider> =
        if config.synthetic_environment() {
            tracing::warn!("Using synthetic environmental data derived from the zone map");
            Arc::new(SyntheticProvider::new(zones))
        } else {
            Arc::new(OpenMeteoProvider::new(
                client.clone(),
                &config.air_quality_url,
                &config.weather_url,
            ))
        };

    let routing: Arc<dyn RoutingProvider> = if config.routing_enabled() {
        Arc::new(OsrmProvider::new(client, &config.routing_url))
    } else {
        Arc::new(NoRouting)
    };

    Ok((environment, routing))
}

// ---------------------------------------------------------------------------
// Open-Meteo
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct HourlyResponse {
    hourly: Option<HourlySeries>,
}

#[derive(Debug, Default, Deserialize)]
struct HourlySeries {
    #[serde(default)]
    us_aqi: Vec<Option<f64>>,
    #[serde(default)]
    pm2_5: Vec<Option<f64>>,
    #[serde(default)]
    grass_pollen: Vec<Option<f64>>,
    #[serde(default)]
    birch_pollen: Vec<Option<f64>>,
    #[serde(default)]
    ragweed_pollen: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
}

fn first_value(series: &[Option<f64>]) -> Option<f64> {
    series.first().copied().flatten().filter(|v| v.is_finite())
}

/// Grains per cubic meter at which the pollen index saturates.
const POLLEN_GRAINS_AT_MAX_INDEX: f64 = 120.0;

pub fn pollen_index_from_grains(grains_per_m3: f64) -> f64 {
    (grains_per_m3.max(0.0) / POLLEN_GRAINS_AT_MAX_INDEX * 12.0).min(12.0)
}

pub struct OpenMeteoProvider {
    client: Client,
    air_quality_url: String,
    weather_url: String,
}

impl OpenMeteoProvider {
    pub fn new(client: Client, air_quality_url: &str, weather_url: &str) -> Self {
        Self {
            client,
            air_quality_url: air_quality_url.trim().to_string(),
            weather_url: weather_url.trim().to_string(),
        }
    }

    async fn hourly(
        &self,
        base: &str,
        fields: &str,
        lat: f64,
        lon: f64,
        at: DateTime<Utc>,
        extra: &str,
    ) -> Result<HourlySeries, ProviderError> {
        if base.is_empty() {
            return Err(ProviderError::Disabled);
        }
        let url = build_hourly_url(base, fields, lat, lon, at, extra);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Http(response.status().as_u16()));
        }
        let payload: HourlyResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        payload.hourly.ok_or(ProviderError::MissingValue)
    }
}

fn build_hourly_url(
    base: &str,
    fields: &str,
    lat: f64,
    lon: f64,
    at: DateTime<Utc>,
    extra: &str,
) -> String {
    let separator = if base.contains('?') { "&" } else { "?" };
    let hour = at.format("%Y-%m-%dT%H:00");
    format!(
        "{}{}latitude={:.4}&longitude={:.4}&hourly={}&timezone=GMT&start_hour={}&end_hour={}{}",
        base, separator, lat, lon, fields, hour, hour, extra
    )
}

#[async_trait]
impl EnvironmentalProvider for OpenMeteoProvider {
    async fn air_quality(
        &self,
        lat: f64,
        lon: f64,
        at: DateTime<Utc>,
    ) -> Result<AirQualityReading, ProviderError> {
        let series = self
            .hourly(&self.air_quality_url, "us_aqi,pm2_5", lat, lon, at, "")
            .await?;
        let aqi = first_value(&series.us_aqi).ok_or(ProviderError::MissingValue)?;
        Ok(AirQualityReading {
            aqi,
            pm25: first_value(&series.pm2_5).unwrap_or(0.0),
        })
    }

    async fn pollen(
        &self,
        lat: f64,
        lon: f64,
        at: DateTime<Utc>,
    ) -> Result<PollenReading, ProviderError> {
        let series = self
            .hourly(
                &self.air_quality_url,
                "grass_pollen,birch_pollen,ragweed_pollen",
                lat,
                lon,
                at,
                "",
            )
            .await?;
        let grains = [
            first_value(&series.grass_pollen),
            first_value(&series.birch_pollen),
            first_value(&series.ragweed_pollen),
        ]
        .into_iter()
        .flatten()
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
        .ok_or(ProviderError::MissingValue)?;
        Ok(PollenReading {
            index: pollen_index_from_grains(grains),
        })
    }

    async fn weather(
        &self,
        lat: f64,
        lon: f64,
        at: DateTime<Utc>,
    ) -> Result<WeatherReading, ProviderError> {
        let series = self
            .hourly(
                &self.weather_url,
                "temperature_2m,wind_speed_10m",
                lat,
                lon,
                at,
                "&wind_speed_unit=ms",
            )
            .await?;
        Ok(WeatherReading {
            temperature_c: first_value(&series.temperature_2m)
                .ok_or(ProviderError::MissingValue)?,
            wind_speed_mps: first_value(&series.wind_speed_10m)
                .ok_or(ProviderError::MissingValue)?,
        })
    }
}

// ---------------------------------------------------------------------------
// OSRM alternates
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

/// Polylines longer than this are thinned before becoming candidates.
const MAX_ALTERNATE_POINTS: usize = 200;

pub struct OsrmProvider {
    client: Client,
    base_url: String,
}

impl OsrmProvider {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }
}

fn thin_polyline(points: Vec<Waypoint>, max_points: usize) -> Vec<Waypoint> {
    if points.len() <= max_points || max_points < 2 {
        return points;
    }
    let last = points.len() - 1;
    let stride = (points.len() as f64 / (max_points - 1) as f64).ceil() as usize;
    let mut thinned: Vec<Waypoint> = points.iter().step_by(stride).cloned().collect();
    if thinned.last() != points.get(last) {
        thinned.push(points[last].clone());
    }
    thinned
}

#[async_trait]
impl RoutingProvider for OsrmProvider {
    async fn alternates(
        &self,
        from: &Waypoint,
        to: &Waypoint,
    ) -> Result<Vec<Vec<Waypoint>>, ProviderError> {
        let url = format!(
            "{}/route/v1/foot/{:.6},{:.6};{:.6},{:.6}?alternatives=true&geometries=geojson&overview=full",
            self.base_url, from.lon, from.lat, to.lon, to.lat
        );
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Http(response.status().as_u16()));
        }
        let payload: OsrmResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        if payload.code != "Ok" {
            return Err(ProviderError::Decode(format!("OSRM code {}", payload.code)));
        }
        Ok(payload
            .routes
            .into_iter()
            .map(|route| {
                let points = route
                    .geometry
                    .coordinates
                    .into_iter()
                    .enumerate()
                    .map(|(idx, [lon, lat])| Waypoint::new(lat, lon, idx))
                    .collect();
                thin_polyline(points, MAX_ALTERNATE_POINTS)
            })
            .filter(|points: &Vec<Waypoint>| points.len() >= 2)
            .collect())
    }
}

/// Routing provider used when no routing URL is configured.
pub struct NoRouting;

#[async_trait]
impl RoutingProvider for NoRouting {
    async fn alternates(
        &self,
        _from: &Waypoint,
        _to: &Waypoint,
    ) -> Result<Vec<Vec<Waypoint>>, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

// ---------------------------------------------------------------------------
// Synthetic
// ---------------------------------------------------------------------------

/// Offline provider that derives readings from the zone map, with traffic
/// zones worsening during rush hours. Deterministic for a given point and hour.
pub struct SyntheticProvider {
    zones: Arc<ZoneMap>,
}

impl SyntheticProvider {
    pub fn new(zones: Arc<ZoneMap>) -> Self {
        Self { zones }
    }

    fn rush_hour_factor(hour: u32) -> f64 {
        match hour {
            7..=9 | 16..=19 => 1.3,
            0..=4 => 0.8,
            _ => 1.0,
        }
    }

    fn in_traffic(&self, lat: f64, lon: f64) -> bool {
        self.zones
            .zones
            .iter()
            .any(|z| z.kind == ZoneKind::Traffic && z.contains(lat, lon))
    }
}

#[async_trait]
impl EnvironmentalProvider for SyntheticProvider {
    async fn air_quality(
        &self,
        lat: f64,
        lon: f64,
        at: DateTime<Utc>,
    ) -> Result<AirQualityReading, ProviderError> {
        let mut aqi = self.zones.estimated_aqi(lat, lon);
        if self.in_traffic(lat, lon) {
            aqi *= Self::rush_hour_factor(at.hour());
        }
        Ok(AirQualityReading {
            aqi,
            pm25: aqi / 4.0,
        })
    }

    async fn pollen(
        &self,
        lat: f64,
        lon: f64,
        _at: DateTime<Utc>,
    ) -> Result<PollenReading, ProviderError> {
        let green = self.zones.green_coverage(&[(lat, lon)]);
        Ok(PollenReading {
            index: 2.0 + 4.0 * green,
        })
    }

    async fn weather(
        &self,
        _lat: f64,
        _lon: f64,
        at: DateTime<Utc>,
    ) -> Result<WeatherReading, ProviderError> {
        let hour = at.hour() as f64;
        let temperature_c = 15.0 + 6.0 * ((hour - 9.0) / 24.0 * std::f64::consts::TAU).sin();
        Ok(WeatherReading {
            temperature_c,
            wind_speed_mps: 3.0,
        })
    }
}
