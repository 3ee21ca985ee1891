//! Weekly budget persistence.
//!
//! Only the limit is authoritative here. Consumption is stored for audit
//! and rebuilt from run sessions on startup.

use anyhow::Result;
use chrono::{DateTime, Utc};
use runcoach_core::ExposureBudget;
use sqlx::{Sqlite, SqlitePool};
use std::collections::{BTreeMap, HashMap};

use super::parse_timestamp;

pub async fn upsert_budget_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    budget: &ExposureBudget,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO exposure_budgets (user_id, week_start, budget_limit_units, consumed_exposure_units)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(user_id, week_start) DO UPDATE SET consumed_exposure_units = ?4
        "#,
    )
    .bind(&budget.user_id)
    .bind(budget.week_start.to_rfc3339())
    .bind(budget.budget_limit_units)
    .bind(budget.consumed_exposure_units)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Stored week limits, grouped by user.
pub async fn load_week_limits(
    pool: &SqlitePool,
) -> Result<HashMap<String, BTreeMap<DateTime<Utc>, f64>>> {
    let rows: Vec<(String, String, f64)> = sqlx::query_as(
        "SELECT user_id, week_start, budget_limit_units FROM exposure_budgets",
    )
    .fetch_all(pool)
    .await?;

    let mut limits: HashMap<String, BTreeMap<DateTime<Utc>, f64>> = HashMap::new();
    for (user_id, week_start, limit) in rows {
        limits
            .entry(user_id)
            .or_default()
            .insert(parse_timestamp(&week_start), limit);
    }
    Ok(limits)
}
