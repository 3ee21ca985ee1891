//! In-memory state store using DashMap, written through to SQLite.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use runcoach_core::budget::session_units;
use runcoach_core::{
    canonical_total, ExposureBudget, HealthProfile, OptimizationResult, Route, RunSession,
    SamplerConfig, ZoneMap,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

use crate::budget::{BudgetStatus, BudgetTracker};
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::fetcher::{FetcherConfig, SampleFetcher};
use crate::optimizer::{OptimizerSettings, RouteOptimizer};
use crate::persistence::{self, Database};
use crate::providers::{EnvironmentalProvider, RoutingProvider};
use crate::scoring::RouteScorer;

/// External collaborators the state is wired to.
#[derive(Clone)]
pub struct Providers {
    pub environment: Arc<dyn EnvironmentalProvider>,
    pub routing: Arc<dyn RoutingProvider>,
    pub zones: Arc<ZoneMap>,
}

/// Application state shared by every handler.
pub struct AppState {
    config: Config,
    db: Option<Database>,
    routes: DashMap<String, Route>,
    /// Keyed by base route id, oldest first
    optimizations: DashMap<String, Vec<OptimizationResult>>,
    profiles: DashMap<String, HealthProfile>,
    /// Keyed by user id, in submission order
    sessions: DashMap<String, Vec<RunSession>>,
    budgets: BudgetTracker,
    scorer: Arc<RouteScorer>,
    optimizer: RouteOptimizer,
}

impl AppState {
    /// In-memory state with no database behind it.
    pub fn new(config: Config, providers: Providers) -> Self {
        let fetcher = Arc::new(SampleFetcher::new(
            providers.environment,
            FetcherConfig::from_config(&config),
        ));
        let sampler = SamplerConfig {
            interval_m: config.sample_interval_m,
            pace_min_per_km: config.default_pace_min_per_km,
        };
        let scorer = Arc::new(RouteScorer::new(fetcher, providers.zones, sampler));
        let optimizer = RouteOptimizer::new(
            Arc::clone(&scorer),
            providers.routing,
            OptimizerSettings::from_config(&config),
        );

        Self {
            budgets: BudgetTracker::new(config.weekly_base_units),
            config,
            db: None,
            routes: DashMap::new(),
            optimizations: DashMap::new(),
            profiles: DashMap::new(),
            sessions: DashMap::new(),
            scorer,
            optimizer,
        }
    }

    pub fn with_database(db: Database, config: Config, providers: Providers) -> Self {
        let mut state = Self::new(config, providers);
        state.db = Some(db);
        state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scorer(&self) -> &Arc<RouteScorer> {
        &self.scorer
    }

    pub fn optimizer(&self) -> &RouteOptimizer {
        &self.optimizer
    }

    /// Load persisted records and rebuild weekly budgets from sessions.
    pub async fn load_from_database(&self) -> anyhow::Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let pool = db.pool();

        let routes = persistence::routes::load_all_routes(pool).await?;
        let route_count = routes.len();
        for route in routes {
            self.routes.insert(route.id.clone(), route);
        }

        let results = persistence::optimizations::load_all_optimizations(pool).await?;
        let result_count = results.len();
        for result in results {
            self.optimizations
                .entry(result.base_route_id.clone())
                .or_default()
                .push(result);
        }

        for (user_id, profile) in persistence::profiles::load_all_profiles(pool).await? {
            self.profiles.insert(user_id, profile);
        }

        let sessions = persistence::sessions::load_all_sessions(pool).await?;
        let session_count = sessions.len();
        let mut by_user: HashMap<String, Vec<RunSession>> = HashMap::new();
        for session in sessions {
            by_user
                .entry(session.user_id.clone())
                .or_default()
                .push(session);
        }

        let mut limits = persistence::budgets::load_week_limits(pool).await?;
        let users: BTreeSet<String> = by_user.keys().chain(limits.keys()).cloned().collect();
        for user_id in users {
            let user_sessions = by_user.remove(&user_id).unwrap_or_default();
            let user_limits = limits.remove(&user_id).unwrap_or_default();
            let fallback = self.budgets.limit_for(&self.profile(&user_id));
            self.budgets
                .restore(&user_id, &user_sessions, &user_limits, fallback)
                .await;
            if !user_sessions.is_empty() {
                self.sessions.insert(user_id, user_sessions);
            }
        }

        info!(
            routes = route_count,
            optimizations = result_count,
            profiles = self.profiles.len(),
            sessions = session_count,
            "Loaded state from database"
        );
        Ok(())
    }

    // Routes

    pub fn route(&self, route_id: &str) -> Option<Route> {
        self.routes.get(route_id).map(|r| r.value().clone())
    }

    /// A route the user is allowed to read.
    pub fn route_for(&self, user_id: &str, route_id: &str) -> ApiResult<Route> {
        let route = self
            .route(route_id)
            .ok_or_else(|| ApiError::route_not_found(route_id))?;
        if route.owner_id != user_id {
            return Err(ApiError::Forbidden(format!(
                "route {} belongs to another user",
                route_id
            )));
        }
        Ok(route)
    }

    pub async fn insert_routes(&self, routes: &[Route]) -> anyhow::Result<()> {
        if let Some(db) = &self.db {
            let mut tx = db.pool().begin().await?;
            for route in routes {
                persistence::routes::insert_route_tx(&mut tx, route).await?;
            }
            tx.commit().await?;
        }
        for route in routes {
            self.routes.insert(route.id.clone(), route.clone());
        }
        Ok(())
    }

    pub async fn insert_route(&self, route: &Route) -> anyhow::Result<()> {
        if let Some(db) = &self.db {
            persistence::routes::insert_route(db.pool(), route).await?;
        }
        self.routes.insert(route.id.clone(), route.clone());
        Ok(())
    }

    // Optimizations

    /// Store an optimized route and the result linking it to its base.
    pub async fn record_optimization(
        &self,
        route: &Route,
        result: &OptimizationResult,
    ) -> anyhow::Result<()> {
        if let Some(db) = &self.db {
            let mut tx = db.pool().begin().await?;
            persistence::routes::insert_route_tx(&mut tx, route).await?;
            persistence::optimizations::insert_optimization_tx(&mut tx, result).await?;
            tx.commit().await?;
        }
        self.routes.insert(route.id.clone(), route.clone());
        self.optimizations
            .entry(result.base_route_id.clone())
            .or_default()
            .push(result.clone());
        Ok(())
    }

    /// Results for a base route, latest first.
    pub fn optimizations_for(&self, base_route_id: &str) -> Vec<OptimizationResult> {
        let mut results = self
            .optimizations
            .get(base_route_id)
            .map(|r| r.value().clone())
            .unwrap_or_default();
        results.reverse();
        results
    }

    // Profiles

    /// The user's profile, or the default one if none was saved.
    pub fn profile(&self, user_id: &str) -> HealthProfile {
        self.profiles
            .get(user_id)
            .map(|p| p.value().clone())
            .unwrap_or_default()
    }

    pub async fn set_profile(&self, user_id: &str, profile: HealthProfile) -> anyhow::Result<()> {
        if let Some(db) = &self.db {
            persistence::profiles::upsert_profile(db.pool(), user_id, &profile).await?;
        }
        self.profiles.insert(user_id.to_string(), profile);
        Ok(())
    }

    // Sessions and budgets

    /// Record a completed run and charge it to its week.
    ///
    /// The user's ledger lock is held across validation, persistence and the
    /// in-memory update, so concurrent submissions for one user serialize.
    pub async fn record_session(
        &self,
        session: RunSession,
        now: DateTime<Utc>,
    ) -> ApiResult<ExposureBudget> {
        let limit = self.budgets.limit_for(&self.profile(&session.user_id));
        let ledger = self.budgets.ledger(&session.user_id);
        let mut guard = ledger.lock().await;

        let week = guard.preview(&session, limit, now)?;
        let budget = week.budget.clone();
        if let Some(db) = &self.db {
            let mut tx = db.pool().begin().await.map_err(anyhow::Error::from)?;
            persistence::sessions::insert_session_tx(&mut tx, &session).await?;
            persistence::budgets::upsert_budget_tx(&mut tx, &budget).await?;
            tx.commit().await.map_err(anyhow::Error::from)?;
        }

        guard.apply(week);
        self.sessions
            .entry(session.user_id.clone())
            .or_default()
            .push(session);
        Ok(budget)
    }

    /// The user's sessions, most recent start first.
    pub fn history(&self, user_id: &str) -> Vec<RunSession> {
        let mut sessions = self
            .sessions
            .get(user_id)
            .map(|s| s.value().clone())
            .unwrap_or_default();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        sessions
    }

    /// Units charged by sessions that completed on `now`'s UTC date.
    pub fn units_on_day(&self, user_id: &str, now: DateTime<Utc>) -> f64 {
        let today = now.date_naive();
        let units: Vec<f64> = self
            .sessions
            .get(user_id)
            .map(|sessions| {
                sessions
                    .iter()
                    .filter(|s| s.completed_at().date_naive() == today)
                    .map(session_units)
                    .collect()
            })
            .unwrap_or_default();
        canonical_total(&units)
    }

    pub async fn budget_status(&self, user_id: &str, now: DateTime<Utc>) -> BudgetStatus {
        self.budgets
            .current(user_id, &self.profile(user_id), now)
            .await
    }

    pub async fn budget_history(&self, user_id: &str, now: DateTime<Utc>) -> Vec<BudgetStatus> {
        self.budgets
            .history(user_id, &self.profile(user_id), now)
            .await
    }
}
