//! Change counter and watcher event stream.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
    Json,
};
use serde::Serialize;

use docferry_core::WatcherEvent;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct ChangeCountResponse {
    pub count: u64,
}

/// Changes observed since process start.
pub async fn change_count(State(state): State<AppState>) -> Json<ChangeCountResponse> {
    Json(ChangeCountResponse {
        count: state.feed.change_count(),
    })
}

/// SSE stream of watcher events.
///
/// Each event is sent with its `watcher.*` type as the SSE event name and
/// the JSON-encoded event as data. Lagged receivers skip what they missed.
pub async fn change_stream(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.feed.subscribe();

    use tokio_stream::StreamExt as _;
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(
        |result: Result<WatcherEvent, _>| match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
                Err(_) => None,
            },
            Err(_) => None,
        },
    );

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}
