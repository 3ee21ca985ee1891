//! Blocking HTTP client for the exposure optimizer API.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use runcoach_core::{OptimizationType, Waypoint};
use serde_json::{json, Value};

pub struct RunCoachClient {
    client: Client,
    base_url: String,
    token: String,
}

impl RunCoachClient {
    /// `base_url` is the server root, e.g. `http://localhost:3000`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn send(&self, request: RequestBuilder, what: &str) -> Result<Value> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .with_context(|| format!("Failed to {}", what))?;
        let status = response.status();
        let body: Value = response
            .json()
            .with_context(|| format!("Failed to decode response to {}", what))?;
        if !status.is_success() {
            let message = body["message"].as_str().unwrap_or("no message");
            bail!("Failed to {}: HTTP {} {}", what, status.as_u16(), message);
        }
        Ok(body)
    }

    pub fn create_route(&self, name: Option<&str>, waypoints: &[Waypoint]) -> Result<Value> {
        let points: Vec<Value> = waypoints
            .iter()
            .map(|wp| json!({ "lat": wp.lat, "lon": wp.lon }))
            .collect();
        let request = self
            .client
            .post(self.url("/routes"))
            .json(&json!({ "name": name, "waypoints": points }));
        self.send(request, "create route")
    }

    pub fn generate(&self, lat: f64, lon: f64, distance_km: f64, count: usize) -> Result<Value> {
        let request = self.client.post(self.url("/routes/generate")).json(&json!({
            "lat": lat,
            "lon": lon,
            "distance_km": distance_km,
            "count": count,
        }));
        self.send(request, "generate routes")
    }

    pub fn exposure(&self, route_id: &str) -> Result<Value> {
        let request = self
            .client
            .get(self.url(&format!("/routes/{}/exposure", route_id)));
        self.send(request, "score route")
    }

    pub fn optimize(
        &self,
        route_id: &str,
        optimization_type: OptimizationType,
        seed: Option<u64>,
    ) -> Result<Value> {
        let request = self
            .client
            .post(self.url(&format!("/routes/{}/optimize", route_id)))
            .json(&json!({
                "optimization_type": optimization_type,
                "seed": seed,
            }));
        self.send(request, "optimize route")
    }

    pub fn optimal_times(
        &self,
        route_id: &str,
        horizon_hours: u32,
        window_hours: u32,
        top_k: usize,
    ) -> Result<Value> {
        let request = self
            .client
            .get(self.url(&format!("/routes/{}/optimal-times", route_id)))
            .query(&[
                ("horizon_hours", horizon_hours.to_string()),
                ("window_hours", window_hours.to_string()),
                ("top_k", top_k.to_string()),
            ]);
        self.send(request, "fetch optimal times")
    }

    pub fn log_run(
        &self,
        route_id: &str,
        started_at: DateTime<Utc>,
        duration_min: f64,
        avg_aqi: f64,
    ) -> Result<Value> {
        let request = self.client.post(self.url("/sessions")).json(&json!({
            "route_id": route_id,
            "started_at": started_at,
            "duration_min": duration_min,
            "avg_aqi_experienced": avg_aqi,
        }));
        self.send(request, "log run")
    }

    pub fn history(&self, limit: Option<usize>) -> Result<Value> {
        let mut request = self.client.get(self.url("/history"));
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        self.send(request, "fetch history")
    }

    pub fn budget(&self, current_aqi: Option<f64>) -> Result<Value> {
        let mut request = self.client.get(self.url("/budget"));
        if let Some(aqi) = current_aqi {
            request = request.query(&[("current_aqi", aqi)]);
        }
        self.send(request, "fetch budget")
    }

    pub fn health_risk(&self, current_aqi: f64, activity_level: Option<&str>) -> Result<Value> {
        let mut request = self
            .client
            .get(self.url("/health-risk"))
            .query(&[("current_aqi", current_aqi.to_string())]);
        if let Some(level) = activity_level {
            request = request.query(&[("activity_level", level)]);
        }
        self.send(request, "assess health risk")
    }

    pub fn weekly_schedule(&self, route_id: &str, runs_per_week: u32) -> Result<Value> {
        let request = self
            .client
            .get(self.url(&format!("/routes/{}/weekly-schedule", route_id)))
            .query(&[("runs_per_week", runs_per_week)]);
        self.send(request, "plan weekly schedule")
    }
}

/// Parse `lat,lon;lat,lon;...` into waypoints.
pub fn parse_waypoints(raw: &str) -> Result<Vec<Waypoint>> {
    let mut waypoints = Vec::new();
    for (idx, pair) in raw.split(';').filter(|p| !p.trim().is_empty()).enumerate() {
        let Some((lat, lon)) = pair.split_once(',') else {
            bail!("waypoint {} is not lat,lon: {:?}", idx + 1, pair);
        };
        let lat: f64 = lat
            .trim()
            .parse()
            .with_context(|| format!("bad latitude in waypoint {}", idx + 1))?;
        let lon: f64 = lon
            .trim()
            .parse()
            .with_context(|| format!("bad longitude in waypoint {}", idx + 1))?;
        waypoints.push(Waypoint::new(lat, lon, idx));
    }
    if waypoints.len() < 2 {
        bail!("a route needs at least two waypoints");
    }
    Ok(waypoints)
}
