//! Per-user weekly exposure ledgers.
//!
//! Each user has one ledger behind an async mutex, so concurrent session
//! completions for the same user apply one at a time while different users
//! never contend. Week status is derived from the clock on every read.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use runcoach_core::budget::{session_units, session_week, week_units};
use runcoach_core::{
    budget_limit_units, canonical_total, daily_limit_units, personal_threshold, replay_week,
    risk_level, CoreError, ExposureBudget, HealthProfile, RiskLevel, RunSession, WeekStatus,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sessions may report a completion slightly ahead of the server clock.
const FUTURE_SKEW_MINUTES: i64 = 5;

/// One week's budget and the per-session units it was built from.
#[derive(Debug, Clone)]
pub struct LedgerWeek {
    pub budget: ExposureBudget,
    units: Vec<f64>,
}

impl LedgerWeek {
    fn empty(user_id: &str, week_start: DateTime<Utc>, limit: f64) -> Self {
        Self {
            budget: ExposureBudget::new(user_id, week_start, limit),
            units: Vec::new(),
        }
    }

    fn replayed(
        user_id: &str,
        week_start: DateTime<Utc>,
        limit: f64,
        sessions: &[RunSession],
    ) -> Self {
        Self {
            budget: replay_week(user_id, week_start, limit, sessions),
            units: week_units(user_id, week_start, sessions),
        }
    }

    /// The week after charging one more session, totalled the same way a
    /// replay totals it.
    fn charged(&self, units: f64) -> Self {
        let mut units_after = self.units.clone();
        units_after.push(units);
        let mut budget = ExposureBudget::new(
            &self.budget.user_id,
            self.budget.week_start,
            self.budget.budget_limit_units,
        );
        budget.consume(canonical_total(&units_after));
        Self {
            budget,
            units: units_after,
        }
    }
}

#[derive(Debug, Default)]
pub struct UserLedger {
    weeks: BTreeMap<DateTime<Utc>, LedgerWeek>,
}

impl UserLedger {
    pub fn week(&self, week_start: DateTime<Utc>) -> Option<&ExposureBudget> {
        self.weeks.get(&week_start).map(|w| &w.budget)
    }

    pub fn weeks(&self) -> impl DoubleEndedIterator<Item = &ExposureBudget> {
        self.weeks.values().map(|w| &w.budget)
    }

    pub fn apply(&mut self, week: LedgerWeek) {
        self.weeks.insert(week.budget.week_start, week);
    }

    /// The week the session would produce, without applying it.
    ///
    /// The week record is created with `limit_units` on first use; an
    /// existing week keeps the limit it was created with.
    pub fn preview(
        &self,
        session: &RunSession,
        limit_units: f64,
        now: DateTime<Utc>,
    ) -> Result<LedgerWeek, CoreError> {
        session.validate()?;
        let completed = session.completed_at();
        if completed > now + chrono::Duration::minutes(FUTURE_SKEW_MINUTES) {
            return Err(CoreError::Validation(
                "session cannot complete in the future".to_string(),
            ));
        }
        let week_start = session_week(session);
        if WeekStatus::at(week_start, now) == WeekStatus::Closed {
            return Err(CoreError::Validation(format!(
                "week starting {} is closed",
                week_start.format("%Y-%m-%d")
            )));
        }

        let units = session_units(session);
        Ok(match self.weeks.get(&week_start) {
            Some(week) => week.charged(units),
            None => LedgerWeek::empty(&session.user_id, week_start, limit_units).charged(units),
        })
    }
}

/// A budget as reported to the user.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    #[serde(flatten)]
    pub budget: ExposureBudget,
    pub status: WeekStatus,
    pub risk_level: RiskLevel,
    pub personal_threshold_aqi: f64,
    pub daily_limit_units: f64,
}

pub struct BudgetTracker {
    ledgers: DashMap<String, Arc<Mutex<UserLedger>>>,
    weekly_base_units: f64,
}

impl BudgetTracker {
    pub fn new(weekly_base_units: f64) -> Self {
        Self {
            ledgers: DashMap::new(),
            weekly_base_units,
        }
    }

    pub fn limit_for(&self, profile: &HealthProfile) -> f64 {
        budget_limit_units(self.weekly_base_units, personal_threshold(profile))
    }

    /// The user's ledger, created empty on first access.
    pub fn ledger(&self, user_id: &str) -> Arc<Mutex<UserLedger>> {
        self.ledgers
            .entry(user_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Current-week status; an untouched week reads as zero consumption.
    pub async fn current(
        &self,
        user_id: &str,
        profile: &HealthProfile,
        now: DateTime<Utc>,
    ) -> BudgetStatus {
        let week_start = runcoach_core::iso_week_start(now);
        let ledger = self.ledger(user_id);
        let guard = ledger.lock().await;
        let budget = guard
            .week(week_start)
            .cloned()
            .unwrap_or_else(|| ExposureBudget::new(user_id, week_start, self.limit_for(profile)));
        status_of(budget, profile, now)
    }

    /// Past and current weeks, most recent first.
    pub async fn history(
        &self,
        user_id: &str,
        profile: &HealthProfile,
        now: DateTime<Utc>,
    ) -> Vec<BudgetStatus> {
        let ledger = self.ledger(user_id);
        let guard = ledger.lock().await;
        guard
            .weeks()
            .rev()
            .cloned()
            .map(|budget| status_of(budget, profile, now))
            .collect()
    }

    /// Rebuild a user's weeks by replaying sessions against stored limits.
    /// Weeks with sessions but no stored limit use `fallback_limit`.
    pub async fn restore(
        &self,
        user_id: &str,
        sessions: &[RunSession],
        stored_limits: &BTreeMap<DateTime<Utc>, f64>,
        fallback_limit: f64,
    ) {
        let mut weeks: Vec<DateTime<Utc>> = sessions.iter().map(session_week).collect();
        weeks.extend(stored_limits.keys().copied());
        weeks.sort();
        weeks.dedup();

        let ledger = self.ledger(user_id);
        let mut guard = ledger.lock().await;
        for week_start in weeks {
            let limit = stored_limits
                .get(&week_start)
                .copied()
                .unwrap_or(fallback_limit);
            guard.apply(LedgerWeek::replayed(user_id, week_start, limit, sessions));
        }
    }
}

pub fn status_of(budget: ExposureBudget, profile: &HealthProfile, now: DateTime<Utc>) -> BudgetStatus {
    let ratio = budget.consumed_exposure_units / budget.budget_limit_units;
    BudgetStatus {
        status: WeekStatus::at(budget.week_start, now),
        risk_level: risk_level(ratio),
        personal_threshold_aqi: personal_threshold(profile),
        daily_limit_units: daily_limit_units(budget.budget_limit_units),
        budget,
    }
}
