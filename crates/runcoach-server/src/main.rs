//! Exposure optimizer server - route scoring, optimization and budgets.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use runcoach_core::ZoneMap;
use runcoach_server::config::{Config, LogFormat};
use runcoach_server::state::{AppState, Providers};
use runcoach_server::{api, persistence, providers};

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("runcoach_server=debug".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
    Ok(())
}

fn load_zones(config: &Config) -> Result<ZoneMap> {
    let Some(path) = &config.zones_path else {
        return Ok(ZoneMap::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading zone file {}", path))?;
    let zones = ZoneMap::from_json(&raw).with_context(|| format!("parsing zone file {}", path))?;
    tracing::info!(zones = zones.zones.len(), path = %path, "Loaded pollution zones");
    Ok(zones)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();
    init_tracing(config.log_format)?;

    tracing::info!("Starting exposure optimizer server...");

    let zones = Arc::new(load_zones(&config)?);
    let (environment, routing) = providers::from_config(&config, Arc::clone(&zones))?;
    if !config.routing_enabled() {
        tracing::info!("No routing provider configured, optimizing by perturbation only");
    }

    let db = persistence::init_database(&config.database_path, config.database_max_connections)
        .await?;
    let state = Arc::new(AppState::with_database(
        db,
        config.clone(),
        Providers {
            environment,
            routing,
            zones,
        },
    ));
    state.load_from_database().await?;

    let app = api::routes(&config)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
