//! Concurrent environmental sample fetching.
//!
//! One task per sample point, each issuing its air-quality, pollen and
//! weather calls in parallel. A shared semaphore bounds provider calls in
//! flight across every task and request. Failures never escape: a point
//! whose air-quality call fails comes back with `data_available = false`.

use chrono::{DateTime, Utc};
use runcoach_core::{ExposureSample, SamplePoint};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::RetryDelays;
use crate::cache::{Lookup, TtlCache};
use crate::config::Config;
use crate::providers::{
    AirQualityReading, EnvironmentalProvider, PollenReading, ProviderError, WeatherReading,
};

/// One (coordinate, instant) pair to fetch conditions for.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRequest {
    pub index: usize,
    pub lat: f64,
    pub lon: f64,
    pub at: DateTime<Utc>,
}

impl SampleRequest {
    /// Requests for sampled route points, timed from a run starting at `start`.
    pub fn for_points(points: &[SamplePoint], start: DateTime<Utc>) -> Vec<SampleRequest> {
        points
            .iter()
            .map(|p| SampleRequest {
                index: p.index,
                lat: p.lat,
                lon: p.lon,
                at: start + chrono::Duration::milliseconds((p.elapsed_min * 60_000.0) as i64),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub call_timeout: Duration,
    pub max_retries: u32,
    pub max_inflight: usize,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub retry_base: Duration,
}

impl FetcherConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            call_timeout: config.provider_timeout(),
            max_retries: config.provider_max_retries,
            max_inflight: config.max_inflight_fetches.max(1),
            cache_ttl: config.sample_cache_ttl(),
            cache_max_entries: config.sample_cache_max_entries.max(1),
            retry_base: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ReadingKind {
    AirQuality,
    Pollen,
    Weather,
}

/// Coordinates rounded to 3 decimals (~100 m) and the UTC hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: ReadingKind,
    lat_e3: i64,
    lon_e3: i64,
    hour: i64,
}

impl CacheKey {
    fn new(kind: ReadingKind, request: &SampleRequest) -> Self {
        Self {
            kind,
            lat_e3: (request.lat * 1e3).round() as i64,
            lon_e3: (request.lon * 1e3).round() as i64,
            hour: request.at.timestamp().div_euclid(3600),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Reading {
    Air(AirQualityReading),
    Pollen(PollenReading),
    Weather(WeatherReading),
}

pub struct SampleFetcher {
    provider: Arc<dyn EnvironmentalProvider>,
    cache: TtlCache<CacheKey, Reading>,
    inflight: Arc<Semaphore>,
    config: FetcherConfig,
}

impl SampleFetcher {
    pub fn new(provider: Arc<dyn EnvironmentalProvider>, config: FetcherConfig) -> Self {
        Self {
            provider,
            cache: TtlCache::new(config.cache_ttl, config.cache_max_entries),
            inflight: Arc::new(Semaphore::new(config.max_inflight)),
            config,
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Fetch one sample per request, in request order.
    ///
    /// Cancelling the token aborts outstanding provider calls; points not yet
    /// answered come back unavailable.
    pub async fn fetch(
        self: &Arc<Self>,
        requests: &[SampleRequest],
        cancel: &CancellationToken,
    ) -> Vec<ExposureSample> {
        let mut results: Vec<Option<ExposureSample>> = vec![None; requests.len()];
        let mut tasks = JoinSet::new();

        for (position, request) in requests.iter().cloned().enumerate() {
            let fetcher = Arc::clone(self);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let sample = fetcher.fetch_point(&request, &cancel).await;
                (position, sample)
            });
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    debug!(pending = tasks.len(), "Sample fetch cancelled");
                    break;
                }
                next = tasks.join_next() => match next {
                    None => break,
                    Some(Ok((position, sample))) => results[position] = Some(sample),
                    Some(Err(err)) => warn!(error = %err, "Sample fetch task failed"),
                },
            }
        }

        self.cache.prune();

        let samples: Vec<ExposureSample> = results
            .into_iter()
            .zip(requests)
            .map(|(sample, request)| {
                sample.unwrap_or_else(|| ExposureSample::unavailable(request.index, request.at))
            })
            .collect();
        let available = samples.iter().filter(|s| s.data_available).count();
        debug!(
            requested = requests.len(),
            available,
            cache_entries = self.cache.len(),
            "Fetched environmental samples"
        );
        samples
    }

    async fn fetch_point(&self, request: &SampleRequest, cancel: &CancellationToken) -> ExposureSample {
        let provider = self.provider.as_ref();
        let (lat, lon, at) = (request.lat, request.lon, request.at);

        let (air, pollen, weather) = tokio::join!(
            self.cached_call(CacheKey::new(ReadingKind::AirQuality, request), cancel, || async move {
                provider.air_quality(lat, lon, at).await.map(Reading::Air)
            }),
            self.cached_call(CacheKey::new(ReadingKind::Pollen, request), cancel, || async move {
                provider.pollen(lat, lon, at).await.map(Reading::Pollen)
            }),
            self.cached_call(CacheKey::new(ReadingKind::Weather, request), cancel, || async move {
                provider.weather(lat, lon, at).await.map(Reading::Weather)
            }),
        );

        let mut sample = ExposureSample::unavailable(request.index, at);
        if let Some(Reading::Air(reading)) = air {
            sample.aqi = reading.aqi;
            sample.pm25 = reading.pm25;
            sample.data_available = true;
        }
        if let Some(Reading::Pollen(reading)) = pollen {
            sample.pollen_index = Some(reading.index);
        }
        if let Some(Reading::Weather(reading)) = weather {
            sample.temperature = Some(reading.temperature_c);
            sample.wind_speed = Some(reading.wind_speed_mps);
        }
        sample
    }

    /// Cache lookup, then bounded retries with backoff. Falls back to a
    /// stale cache entry (up to twice the TTL old) when every attempt fails.
    async fn cached_call<F, Fut>(
        &self,
        key: CacheKey,
        cancel: &CancellationToken,
        call: F,
    ) -> Option<Reading>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Reading, ProviderError>>,
    {
        let stale = match self.cache.lookup(&key) {
            Lookup::Fresh(reading) => {
                debug!(kind = ?key.kind, "Sample cache hit");
                return Some(reading);
            }
            Lookup::Stale(reading) => Some(reading),
            Lookup::Miss => None,
        };

        let mut delays = RetryDelays::new(self.config.retry_base, self.config.call_timeout);
        let mut last_error = ProviderError::Timeout;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = delays.next().unwrap_or(self.config.retry_base);
                tokio::select! {
                    _ = cancel.cancelled() => return stale,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => return stale,
                permit = self.inflight.acquire() => permit,
            };
            let Ok(_permit) = permit else {
                return stale;
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return stale,
                outcome = tokio::time::timeout(self.config.call_timeout, call()) => outcome,
            };
            match outcome {
                Ok(Ok(reading)) => {
                    self.cache.insert(key, reading);
                    return Some(reading);
                }
                Ok(Err(ProviderError::Disabled)) => return stale,
                Ok(Err(err)) => last_error = err,
                Err(_) => last_error = ProviderError::Timeout,
            }
        }

        if stale.is_some() {
            warn!(kind = ?key.kind, error = %last_error, "Provider failed, using stale sample");
        } else {
            warn!(kind = ?key.kind, error = %last_error, "Provider failed, sample unavailable");
        }
        stale
    }
}
