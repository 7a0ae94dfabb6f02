use axum::{
    body::Body,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::session::AuthError;
use crate::AppState;

/// The authenticated caller, stored in request extensions.
#[derive(Clone, Debug)]
pub struct AuthUser(pub String);

/// Extracts the credential from `Authorization: Bearer <token>`.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::Missing)?;
    let value = value.to_str().map_err(|_| AuthError::Malformed)?;
    let token = value.strip_prefix("Bearer ").ok_or(AuthError::Malformed)?;
    if token.trim().is_empty() {
        return Err(AuthError::Missing);
    }
    Ok(token)
}

/// Rejects requests without a valid session credential and inserts the
/// caller's [`AuthUser`] for downstream handlers.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Response {
    let state = match req.extensions().get::<Arc<AppState>>() {
        Some(state) => state.clone(),
        None => {
            return ApiError::Internal("application state missing".to_string()).into_response()
        }
    };

    let user_id = match bearer_token(req.headers()).and_then(|t| state.verifier.verify(t)) {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::debug!(path = %req.uri().path(), "rejected request: {}", e);
            return ApiError::from(e).into_response();
        }
    };

    req.extensions_mut().insert(AuthUser(user_id));
    next.run(req).await
}
