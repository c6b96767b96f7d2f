//! Collection routes, one set per entity kind.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde_json::Value;
use std::collections::HashMap;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    collection_kind, create_document, delete_document, list_documents, update_document,
};
use crate::AppState;

/// Create collection routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{collection}", get(list_handler).post(create_handler))
        .route("/{collection}/{id}", put(update_handler).delete(delete_handler))
}

/// GET /{collection} - List records, optionally filtered.
async fn list_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(collection): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Value>>> {
    let kind = collection_kind(&collection)?;
    let documents = list_documents(&state.pool, kind, &params).await?;
    Ok(Json(documents))
}

/// POST /{collection} - Create a record.
async fn create_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>)> {
    let kind = collection_kind(&collection)?;
    let document = create_document(&state.pool, kind, body).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// PUT /{collection}/{id} - Update a record.
async fn update_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((collection, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    let kind = collection_kind(&collection)?;
    let document = update_document(&state.pool, kind, &id, body).await?;
    Ok(Json(document))
}

/// DELETE /{collection}/{id} - Delete a record and its dependents.
async fn delete_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let kind = collection_kind(&collection)?;
    let message = delete_document(&state.pool, kind, &id).await?;
    Ok(Json(message))
}
