//! Health profile persistence. Profiles are stored as JSON documents.

use anyhow::Result;
use chrono::Utc;
use runcoach_core::HealthProfile;
use sqlx::SqlitePool;

pub async fn upsert_profile(pool: &SqlitePool, user_id: &str, profile: &HealthProfile) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO health_profiles (user_id, profile, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(user_id) DO UPDATE SET profile = ?2, updated_at = ?3
        "#,
    )
    .bind(user_id)
    .bind(serde_json::to_string(profile)?)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_all_profiles(pool: &SqlitePool) -> Result<Vec<(String, HealthProfile)>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT user_id, profile FROM health_profiles")
            .fetch_all(pool)
            .await?;

    let mut profiles = Vec::with_capacity(rows.len());
    for (user_id, raw) in rows {
        match serde_json::from_str(&raw) {
            Ok(profile) => profiles.push((user_id, profile)),
            Err(err) => tracing::warn!(user_id = %user_id, error = %err, "Skipping unreadable profile"),
        }
    }
    Ok(profiles)
}
