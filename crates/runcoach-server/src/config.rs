//! Server configuration from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_AIR_QUALITY_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";
pub const DEFAULT_WEATHER_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_path: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    /// Empty or `synthetic` selects zone-derived synthetic readings
    pub air_quality_url: String,
    pub weather_url: String,
    /// OSRM-compatible base URL; empty disables provider alternates
    pub routing_url: String,
    pub provider_timeout_ms: u64,
    pub provider_max_retries: u32,
    pub max_inflight_fetches: usize,
    pub sample_cache_ttl_s: u64,
    pub sample_cache_max_entries: usize,
    pub sample_interval_m: f64,
    pub default_pace_min_per_km: f64,
    pub max_candidates: usize,
    pub max_concurrent_scorings: usize,
    pub min_improvement_pct: f64,
    pub request_deadline_s: u64,
    pub weekly_base_units: f64,
    pub zones_path: Option<String>,
    pub log_format: LogFormat,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        let zones_path = env::var("RUNCOACH_ZONES_PATH")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let log_format = match env::var("RUNCOACH_LOG_FORMAT")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Self {
            server_port: env_or("RUNCOACH_PORT", 3000),
            database_path: env_string("RUNCOACH_DATABASE_PATH", "data/runcoach.db"),
            database_max_connections: env_or("RUNCOACH_DATABASE_MAX_CONNECTIONS", 5),
            jwt_secret: env_string("RUNCOACH_JWT_SECRET", "change-me"),
            air_quality_url: env_string("RUNCOACH_AIR_QUALITY_URL", DEFAULT_AIR_QUALITY_URL),
            weather_url: env_string("RUNCOACH_WEATHER_URL", DEFAULT_WEATHER_URL),
            routing_url: env_string("RUNCOACH_ROUTING_URL", ""),
            provider_timeout_ms: env_or("RUNCOACH_PROVIDER_TIMEOUT_MS", 5000),
            provider_max_retries: env_or("RUNCOACH_PROVIDER_MAX_RETRIES", 1),
            max_inflight_fetches: env_or("RUNCOACH_MAX_INFLIGHT_FETCHES", 16),
            sample_cache_ttl_s: env_or("RUNCOACH_SAMPLE_CACHE_TTL_S", 300),
            sample_cache_max_entries: env_or("RUNCOACH_SAMPLE_CACHE_MAX_ENTRIES", 20_000),
            sample_interval_m: env_or("RUNCOACH_SAMPLE_INTERVAL_M", 250.0),
            default_pace_min_per_km: env_or("RUNCOACH_DEFAULT_PACE_MIN_PER_KM", 6.0),
            max_candidates: env_or("RUNCOACH_MAX_CANDIDATES", 6),
            max_concurrent_scorings: env_or("RUNCOACH_MAX_CONCURRENT_SCORINGS", 4),
            min_improvement_pct: env_or("RUNCOACH_MIN_IMPROVEMENT_PCT", 5.0),
            request_deadline_s: env_or("RUNCOACH_REQUEST_DEADLINE_S", 20),
            weekly_base_units: env_or("RUNCOACH_WEEKLY_BASE_UNITS", 1000.0),
            zones_path,
            log_format,
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms.max(1))
    }

    pub fn sample_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.sample_cache_ttl_s)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_s.max(1))
    }

    pub fn routing_enabled(&self) -> bool {
        !self.routing_url.trim().is_empty()
    }

    pub fn synthetic_environment(&self) -> bool {
        let url = self.air_quality_url.trim();
        url.is_empty() || url.eq_ignore_ascii_case("synthetic")
    }
}
