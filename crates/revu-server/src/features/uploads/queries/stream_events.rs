use crate::ingest::ProgressBroadcaster;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Keep-alive comment interval for idle event streams
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEventsQuery {
    pub session_id: Uuid,
    pub upload_id: Uuid,
}

/// Relay a job's progress as server-sent events.
///
/// Each event is named after its kind (`progress`, `done`, `error`) and carries
/// the payload as JSON. The stream closes after the terminal event, or at once
/// when the upload is unknown or already finished.
#[tracing::instrument(skip(broadcaster), fields(session_id = %query.session_id, upload_id = %query.upload_id))]
pub fn handle(
    broadcaster: &Arc<ProgressBroadcaster>,
    query: StreamEventsQuery,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = broadcaster
        .subscribe(query.upload_id)
        .into_stream()
        .map(|event| Event::default().event(event.kind.as_str()).json_data(&event.payload));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    )
}
