//! Optimization result persistence.

use anyhow::Result;
use runcoach_core::{OptimizationResult, OptimizationType};
use sqlx::{Sqlite, SqlitePool};

use super::parse_timestamp;

pub async fn insert_optimization_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    result: &OptimizationResult,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO optimization_results (id, owner_id, base_route_id, optimized_route_id, candidates_evaluated, actual_improvement_pct, optimization_type, base_exposure_score, optimized_exposure_score, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&result.id)
    .bind(&result.owner_id)
    .bind(&result.base_route_id)
    .bind(&result.optimized_route_id)
    .bind(result.candidates_evaluated as i64)
    .bind(result.actual_improvement_pct)
    .bind(result.optimization_type.as_str())
    .bind(result.base_exposure_score)
    .bind(result.optimized_exposure_score)
    .bind(result.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// All results, oldest first.
pub async fn load_all_optimizations(pool: &SqlitePool) -> Result<Vec<OptimizationResult>> {
    let rows = sqlx::query_as::<_, OptimizationRow>(
        "SELECT id, owner_id, base_route_id, optimized_route_id, candidates_evaluated, actual_improvement_pct, optimization_type, base_exposure_score, optimized_exposure_score, created_at FROM optimization_results ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

#[derive(sqlx::FromRow)]
struct OptimizationRow {
    id: String,
    owner_id: String,
    base_route_id: String,
    optimized_route_id: String,
    candidates_evaluated: i64,
    actual_improvement_pct: f64,
    optimization_type: String,
    base_exposure_score: f64,
    optimized_exposure_score: f64,
    created_at: String,
}

impl From<OptimizationRow> for OptimizationResult {
    fn from(row: OptimizationRow) -> Self {
        OptimizationResult {
            optimization_type: OptimizationType::parse(&row.optimization_type).unwrap_or_default(),
            created_at: parse_timestamp(&row.created_at),
            id: row.id,
            owner_id: row.owner_id,
            base_route_id: row.base_route_id,
            optimized_route_id: row.optimized_route_id,
            candidates_evaluated: row.candidates_evaluated.max(0) as usize,
            actual_improvement_pct: row.actual_improvement_pct,
            base_exposure_score: row.base_exposure_score,
            optimized_exposure_score: row.optimized_exposure_score,
        }
    }
}
