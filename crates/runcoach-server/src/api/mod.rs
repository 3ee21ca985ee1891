//! API routes for the exposure optimizer.

pub mod auth;
pub mod profile;
pub mod request_id;
mod routes;
pub mod running_routes;
pub mod sessions;

use crate::config::Config;
use axum::Router;

pub fn routes(config: &Config) -> Router<std::sync::Arc<crate::state::AppState>> {
    routes::create_router(config)
}

#[cfg(test)]
mod tests;
