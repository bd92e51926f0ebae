pub mod api;
pub mod sse;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::app::AppState;

/// Assemble the full Axum router: the two WS legs plus the admin API.
/// Everything under `/api` requires the admin key.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(api::health))
        .route("/venues/register", post(api::register_venue))
        .route("/venues", get(api::list_venues))
        .route("/venues/{id}", delete(api::delete_venue))
        .route("/venues/{id}/schedule", put(api::put_schedule))
        .route("/venues/{id}/maintenance", put(api::put_maintenance))
        .route("/venues/{id}/bot", put(api::put_bot))
        .route("/venues/{id}/guest", post(api::issue_guest))
        .route("/command", post(api::post_command))
        .route("/broadcast", post(api::post_broadcast))
        .route("/alerts", get(api::get_alerts))
        .route("/alerts/{id}/acknowledge", post(api::acknowledge_alert))
        .route("/dashboard/stream", get(sse::dashboard_stream))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            api::require_api_key,
        ));

    Router::new()
        .route("/church", get(crate::ws::agent::church_handler))
        .route("/controller", get(crate::ws::admin::controller_handler))
        .nest("/api", api)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
}
