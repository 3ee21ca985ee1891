//! Run session persistence.

use anyhow::Result;
use runcoach_core::RunSession;
use sqlx::{Sqlite, SqlitePool};

use super::parse_timestamp;

pub async fn insert_session_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    session: &RunSession,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO run_sessions (id, user_id, route_id, started_at, duration_min, avg_aqi_experienced)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(&session.id)
    .bind(&session.user_id)
    .bind(&session.route_id)
    .bind(session.started_at.to_rfc3339())
    .bind(session.duration_min)
    .bind(session.avg_aqi_experienced)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// All sessions, oldest first.
pub async fn load_all_sessions(pool: &SqlitePool) -> Result<Vec<RunSession>> {
    let rows = sqlx::query_as::<_, SessionRow>(
        "SELECT id, user_id, route_id, started_at, duration_min, avg_aqi_experienced FROM run_sessions ORDER BY started_at ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    route_id: String,
    started_at: String,
    duration_min: f64,
    avg_aqi_experienced: f64,
}

impl From<SessionRow> for RunSession {
    fn from(row: SessionRow) -> Self {
        RunSession {
            started_at: parse_timestamp(&row.started_at),
            id: row.id,
            user_id: row.user_id,
            route_id: row.route_id,
            duration_min: row.duration_min,
            avg_aqi_experienced: row.avg_aqi_experienced,
        }
    }
}
