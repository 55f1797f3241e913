//! Server-Sent Events (SSE) for realtime updates.
//!
//! Every connected viewer gets `file_ready` and `message` events as they
//! happen. A viewer that falls too far behind skips the events it missed
//! and is told how many via a comment line.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::events::ServerEvent;

use super::state::SharedState;

/// Render a [`ServerEvent`] as an SSE frame.
fn to_sse(event: &ServerEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(event.kind()).data(data)
}

/// GET /api/events - SSE stream of file and message events.
pub async fn events_sse(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    tracing::debug!(
        subscribers = state.events.subscriber_count(),
        "Viewer connected to event stream"
    );

    let stream = BroadcastStream::new(rx).map(|item| {
        let event = match item {
            Ok(event) => to_sse(&event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Slow viewer skipped events");
                Event::default().comment(format!("skipped {skipped} events"))
            }
        };
        Ok(event)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
