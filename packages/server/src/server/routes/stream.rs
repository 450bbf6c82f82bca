//! SSE streaming endpoint.
//!
//! GET /api/crawl/logs
//!
//! Forwards live log entries as SSE events named by level (`info`,
//! `success`, `warning`, `error`). Slow consumers receive a `lagged` event
//! with the number of missed entries instead of being disconnected.

use std::convert::Infallible;

use axum::{
    extract::Extension,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::server::app::AxumAppState;

pub async fn live_log_handler(
    Extension(state): Extension<AxumAppState>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.live_log.subscribe();

    // Stream with connected event and lag handling
    let connected =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });

    let events = BroadcastStream::new(rx).filter_map(|result| async {
        match result {
            Ok(entry) => Event::default()
                .event(entry.level.as_str())
                .json_data(&entry)
                .ok()
                .map(Ok),
            Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                Event::default()
                    .event("lagged")
                    .json_data(serde_json::json!({ "missed": n }))
                    .ok()
                    .map(Ok)
            }
        }
    });

    Sse::new(connected.chain(events)).keep_alive(KeepAlive::default())
}
