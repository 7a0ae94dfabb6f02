//! Direct message history.

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::{with_conn, AppState};
use axum::{
    extract::{rejection::QueryRejection, Extension, Path, Query},
    Json,
};
use confer_messages::Message;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// Only return messages persisted before this message id.
    pub before: Option<String>,
    pub limit: Option<u32>,
}

/// Handler for `GET /api/messages/{userId}`.
///
/// Returns the caller's conversation with `userId`, newest first.
pub async fn get_conversation_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(user_id): Path<String>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let Query(params) = params?;
    let messages = with_conn(&state.pool, move |conn| {
        Ok(confer_messages::list_conversation(
            conn,
            &caller,
            &user_id,
            params.before.as_deref(),
            params.limit,
        )?)
    })
    .await?;
    Ok(Json(messages))
}
