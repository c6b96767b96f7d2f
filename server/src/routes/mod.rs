//! HTTP route definitions.

mod health;
mod resources;

use crate::AppState;
use axum::Router;

/// Create all application routes. Collections live under `/api`.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .nest("/api", resources::routes())
}
