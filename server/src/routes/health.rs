//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Stored documents per collection; absent when the database is down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<BTreeMap<String, i64>>,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler. Reports `degraded` instead of failing when the
/// database cannot be read.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts: Result<Vec<(String, i64)>, sqlx::Error> =
        sqlx::query_as("SELECT collection, COUNT(*) FROM documents GROUP BY collection")
            .fetch_all(&state.pool)
            .await;

    let (status, documents) = match counts {
        Ok(rows) => ("ok", Some(rows.into_iter().collect())),
        Err(err) => {
            tracing::warn!("health check could not read documents: {}", err);
            ("degraded", None)
        }
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        documents,
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Paddock Farm Server"
}
