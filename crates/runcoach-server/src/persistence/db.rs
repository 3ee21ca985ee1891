//! SQLite pool and schema setup.

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

const SCHEMA: &str = include_str!("../../migrations/001_init.sql");

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Open (creating if needed) the SQLite database and apply the schema.
pub async fn init_database(db_path: &str, max_connections: u32) -> Result<Database> {
    if let Some(dir) = Path::new(db_path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating database directory {}", dir.display()))?;
    }

    info!(path = %db_path, "Opening database");
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await
        .with_context(|| format!("opening database {}", db_path))?;

    apply_schema(&pool).await?;
    Ok(Database { pool })
}

/// Statements of a migration script. `--` comment lines are dropped, so
/// comments must not contain `;`.
fn schema_statements(sql: &str) -> impl Iterator<Item = String> + '_ {
    sql.split(';').filter_map(|chunk| {
        let statement = chunk
            .lines()
            .filter(|line| !line.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let statement = statement.trim();
        (!statement.is_empty()).then(|| statement.to_string())
    })
}

/// Every statement is `IF NOT EXISTS`, so this is safe on every start.
async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    let mut applied = 0;
    for statement in schema_statements(SCHEMA) {
        sqlx::query(&statement)
            .execute(pool)
            .await
            .with_context(|| format!("schema statement failed: {}", statement))?;
        applied += 1;
    }
    info!(statements = applied, "Database schema ready");
    Ok(())
}
