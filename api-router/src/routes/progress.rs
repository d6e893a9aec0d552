use std::{pin::Pin, time::Duration};

use async_stream::stream;
use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
};
use futures::{stream, Stream, StreamExt};
use tokio::time::timeout;
use tracing::debug;

use crate::api_state::ApiState;

/// Bounded wait per pull. Every loop iteration either forwards an event or
/// emits a heartbeat, so the connection is never silent for longer than this.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>;

fn error_stream(message: impl Into<String>) -> EventStream {
    let message = message.into();
    stream::once(async move { Ok(Event::default().event("error").data(message)) }).boxed()
}

/// Live progress relay for one document.
///
/// Bridges the document's progress channel to an SSE connection: `progress`
/// events carry `{document_id, step, progress, message, done}`, empty
/// `heartbeat` events keep the connection alive through quiet stretches, and
/// the stream ends after the event with `done = true`.
///
/// Events are not replayed: a client that connects after processing already
/// reached a terminal state only ever sees heartbeats and must treat the
/// document's stored status (via the list endpoint) as the authoritative
/// fallback.
pub async fn document_progress(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> impl IntoResponse {
    // Subscribe before returning the response so no event published after
    // this point can be missed.
    let mut subscription = match state.broker.subscribe(&document_id).await {
        Ok(subscription) => subscription,
        Err(err) => {
            debug!(%document_id, error = %err, "progress subscription failed");
            return Sse::new(error_stream("Failed to subscribe to progress channel"));
        }
    };

    let event_stream: EventStream = stream! {
        loop {
            match timeout(HEARTBEAT_INTERVAL, subscription.next()).await {
                // Bounded wait expired with nothing to forward.
                Err(_) => yield Ok(Event::default().event("heartbeat").data("")),
                Ok(Some(Ok(progress_event))) => {
                    let done = progress_event.done;
                    match Event::default().event("progress").json_data(&progress_event) {
                        Ok(event) => yield Ok(event),
                        Err(err) => {
                            yield Ok(Event::default().event("error").data(err.to_string()));
                            break;
                        }
                    }
                    if done {
                        break;
                    }
                }
                Ok(Some(Err(err))) => {
                    yield Ok(Event::default().event("error").data(err.to_string()));
                    break;
                }
                // Subscription ended without a terminal event.
                Ok(None) => {
                    yield Ok(Event::default().event("error").data("progress channel closed"));
                    break;
                }
            }
        }
        // The subscription drops here, releasing the live query on every
        // exit path, including client disconnects tearing down the stream.
    }
    .boxed();

    Sse::new(event_stream)
}
