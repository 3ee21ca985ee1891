//! Route persistence.

use anyhow::Result;
use runcoach_core::{Difficulty, Route, RouteType, Waypoint};
use sqlx::{Sqlite, SqlitePool};

use super::parse_timestamp;

const INSERT_ROUTE: &str = r#"
    INSERT INTO routes (id, owner_id, name, waypoints, distance_km, elevation_gain_m, route_type, difficulty, parent_route_id, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(id) DO NOTHING
"#;

/// Insert a route. Routes never change, so an existing id is left alone.
pub async fn insert_route(pool: &SqlitePool, route: &Route) -> Result<()> {
    sqlx::query(INSERT_ROUTE)
        .bind(&route.id)
        .bind(&route.owner_id)
        .bind(&route.name)
        .bind(serde_json::to_string(&route.waypoints)?)
        .bind(route.distance_km)
        .bind(route.elevation_gain_m)
        .bind(route.route_type.as_str())
        .bind(route.difficulty.as_str())
        .bind(&route.parent_route_id)
        .bind(route.created_at.to_rfc3339())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_route_tx(tx: &mut sqlx::Transaction<'_, Sqlite>, route: &Route) -> Result<()> {
    sqlx::query(INSERT_ROUTE)
        .bind(&route.id)
        .bind(&route.owner_id)
        .bind(&route.name)
        .bind(serde_json::to_string(&route.waypoints)?)
        .bind(route.distance_km)
        .bind(route.elevation_gain_m)
        .bind(route.route_type.as_str())
        .bind(route.difficulty.as_str())
        .bind(&route.parent_route_id)
        .bind(route.created_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn load_all_routes(pool: &SqlitePool) -> Result<Vec<Route>> {
    let rows = sqlx::query_as::<_, RouteRow>(
        "SELECT id, owner_id, name, waypoints, distance_km, elevation_gain_m, route_type, difficulty, parent_route_id, created_at FROM routes",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Route::try_from).collect()
}

#[derive(sqlx::FromRow)]
struct RouteRow {
    id: String,
    owner_id: String,
    name: String,
    waypoints: String,
    distance_km: f64,
    elevation_gain_m: f64,
    route_type: String,
    difficulty: String,
    parent_route_id: Option<String>,
    created_at: String,
}

impl TryFrom<RouteRow> for Route {
    type Error = anyhow::Error;

    fn try_from(row: RouteRow) -> Result<Self> {
        let waypoints: Vec<Waypoint> = serde_json::from_str(&row.waypoints)?;
        Ok(Route {
            route_type: RouteType::parse(&row.route_type).unwrap_or_default(),
            difficulty: Difficulty::parse(&row.difficulty).unwrap_or_default(),
            created_at: parse_timestamp(&row.created_at),
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            waypoints,
            distance_km: row.distance_km,
            elevation_gain_m: row.elevation_gain_m,
            parent_route_id: row.parent_route_id,
        })
    }
}
