//! SSE relationship event stream.

use crate::middleware::AuthUser;
use crate::AppState;
use axum::{
    extract::Extension,
    response::{sse::Event, Sse},
};
use futures_util::Stream;
use std::{convert::Infallible, sync::Arc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Handler for `GET /events/relationships`.
///
/// Streams the caller's own relationship events. Events published before
/// the stream opened are not replayed.
pub async fn relationship_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.dispatcher.subscribe());

    let mapped_stream = stream.filter_map(move |result| match result {
        Ok(addressed) if addressed.recipient_id == caller => {
            match serde_json::to_string(&addressed.event) {
                Ok(data) => Some(Ok(Event::default()
                    .event(addressed.event.kind())
                    .data(data))),
                Err(e) => {
                    tracing::error!("failed to serialize relationship event: {}", e);
                    None
                }
            }
        }
        Ok(_) => None,
        Err(lagged) => {
            tracing::warn!(
                user_id = %caller,
                error = %lagged,
                "relationship SSE stream lagged; events were dropped for this subscriber"
            );
            None
        }
    });

    Sse::new(mapped_stream).keep_alive(axum::response::sse::KeepAlive::default())
}
