//! `GET /api/dashboard/stream` — the SSE mirror of the admin WS leg.
//!
//! One `venue_list` snapshot on connect, then every relay broadcast as a
//! `data:` event. Keepalive comments go out every 30 s so proxies don't
//! reap idle dashboards.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;

use vigil_protocol::frames::RelayEvent;

use crate::app::AppState;

pub async fn dashboard_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut events = state.broadcaster.subscribe();
    let snapshot = serde_json::to_string(&RelayEvent::VenueList {
        venues: state.venue_summaries(),
    })
    .unwrap_or_default();

    let stream = async_stream::stream! {
        yield Ok(Event::default().data(snapshot));
        loop {
            match events.recv().await {
                Ok(payload) => yield Ok(Event::default().data(payload)),
                // Lagged dashboards skip the lost backlog and continue live.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    )
}
