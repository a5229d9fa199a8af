use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{stream, Stream};
use relatos_shared::{ChangeEvent, Collection};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::AppState;

#[derive(Deserialize)]
pub struct ChangeParams {
    collection: Option<Collection>,
}

/// GET /api/changes?collection=posts
///
/// Server-sent change notifications.
pub async fn stream_changes(
    State(state): State<AppState>,
    Query(params): Query<ChangeParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.changes.subscribe();
    let wanted = params.collection;
    debug!(collection = ?wanted, "change subscriber connected");

    let events = stream::unfold(rx, move |mut rx| async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) if wanted.map_or(true, |c| c == event.collection) => event,
                Ok(_) => continue,
                // Dropped notifications still mean "something changed".
                Err(RecvError::Lagged(_)) => ChangeEvent::new(wanted.unwrap_or(Collection::Posts)),
                Err(RecvError::Closed) => return None,
            };
            match Event::default().json_data(event) {
                Ok(frame) => return Some((Ok(frame), rx)),
                Err(err) => warn!(error = %err, "failed to encode change event"),
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
