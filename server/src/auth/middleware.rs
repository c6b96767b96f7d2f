//! Bearer token check.
//!
//! With `AUTH_TOKEN` configured every request must present it; without it the
//! server runs in development mode and accepts anonymous requests.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Caller identity extracted from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUser {
    Token,
    Anonymous,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.auth_token.as_deref() else {
            return Ok(AuthUser::Anonymous);
        };

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .map(str::trim);

        match token {
            Some(token) if token == expected => Ok(AuthUser::Token),
            Some(_) => {
                tracing::debug!("rejected bearer token");
                Err(AppError::Unauthorized)
            }
            None => Err(AppError::Unauthorized),
        }
    }
}
