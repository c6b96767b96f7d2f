//! Paddock Server - reference REST server for Paddock farm records.
//!
//! Serves one collection per record kind under `/api` (`/api/animals`,
//! `/api/reports`, ...) with list, create, update and delete. Bodies are
//! validated with the `paddock-engine` wire types, so the server enforces the
//! same rules as the devices: one report per animal per day, owners must
//! exist, and deleting an owner cascades.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;

use crate::config::Config;
use crate::db::Pool;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
}

impl AppState {
    /// Connect to the configured database and run migrations.
    pub async fn connect(config: Config) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let pool = if config.database_url == "sqlite::memory:" {
            db::create_memory_pool().await?
        } else {
            db::create_pool(&config.database_url).await?
        };

        tracing::info!("Running database migrations...");
        db::run_migrations(&pool).await?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }
}

/// Build the router with tracing and permissive CORS.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
