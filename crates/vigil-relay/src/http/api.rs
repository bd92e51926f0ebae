//! Admin HTTP surface. Every route requires `x-api-key` (header) or
//! `?apikey=` (query). Error bodies are `{"error":"<code>"}` with the code
//! drawn from the shared taxonomy.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use vigil_core::{AlertId, ErrorCode, VenueId};
use vigil_venues::{ServiceTime, VenueError};

use crate::app::AppState;
use crate::dispatch::Inject;

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    let query_key = query.get("apikey").map(String::as_str);

    if header_key != Some(state.config.api_key.as_str())
        && query_key != Some(state.config.api_key.as_str())
    {
        return error_response(ErrorCode::Unauthenticated);
    }
    next.run(request).await
}

fn error_response(code: ErrorCode) -> Response {
    let status = match code {
        ErrorCode::InvalidParams => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::DeviceNotConfigured | ErrorCode::DeviceUnreachable => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": code.as_str() }))).into_response()
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let registered = state.venues.list().map(|v| v.len()).unwrap_or(0);
    Json(json!({
        "uptime": state.started_at.elapsed().as_secs(),
        "registeredVenues": registered,
        "connectedVenues": state.core.sessions.connected_count(),
        "controllers": state.controllers.load(Ordering::Relaxed),
        "totalMessagesRelayed": state.messages_relayed.load(Ordering::Relaxed),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    name: String,
    email: Option<String>,
    /// Present for one-off event venues: the instant the venue auto-mutes.
    expires_at: Option<DateTime<Utc>>,
}

pub async fn register_venue(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> Response {
    match state.venues.register(&body.name, body.email.as_deref()) {
        Ok(venue) => {
            if let Some(expires_at) = body.expires_at {
                if let Err(e) = state.venues.set_event_expiry(&venue.id, expires_at) {
                    return error_response(e.code());
                }
            }
            Json(json!({
                "venueId": venue.id,
                "name": venue.name,
                "token": venue.token,
                "registrationCode": venue.registration_code,
            }))
            .into_response()
        }
        Err(VenueError::DuplicateName { .. }) => error_response(ErrorCode::Conflict),
        Err(_) => error_response(ErrorCode::Internal),
    }
}

pub async fn list_venues(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.venue_summaries()))
}

pub async fn delete_venue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let venue_id = VenueId::from(id);
    // Closing the session first: the agent sees a clean close, not a dead
    // venue answering 1008 on its next reconnect.
    if let Some(session) = state.core.sessions.get(&venue_id) {
        *session.close_reason.lock().unwrap() = "venue deleted";
        session.cancel.cancel();
    }
    state.core.limiter.forget(&venue_id);
    match state.venues.delete(&venue_id) {
        Ok(()) => {
            info!(venue_id = %venue_id, "venue deleted via admin API");
            Json(json!({ "deleted": true })).into_response()
        }
        Err(VenueError::NotFound { .. }) => error_response(ErrorCode::NotFound),
        Err(_) => error_response(ErrorCode::Internal),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandBody {
    venue_id: VenueId,
    command: String,
    #[serde(default)]
    params: Value,
}

pub async fn post_command(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CommandBody>,
) -> Response {
    if state
        .venues
        .get(&body.venue_id)
        .ok()
        .flatten()
        .is_none()
    {
        return error_response(ErrorCode::NotFound);
    }
    match state.core.inject(&body.venue_id, &body.command, body.params) {
        Inject::Sent { id } => Json(json!({ "sent": true, "id": id })).into_response(),
        Inject::Queued { id } => {
            Json(json!({ "sent": false, "queued": true, "id": id })).into_response()
        }
        Inject::RateLimited => error_response(ErrorCode::RateLimited),
        Inject::Offline => error_response(ErrorCode::ServiceUnavailable),
    }
}

#[derive(Deserialize)]
pub struct BroadcastBody {
    command: String,
    #[serde(default)]
    params: Value,
}

pub async fn post_broadcast(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BroadcastBody>,
) -> Json<Value> {
    let total = state.venues.list().map(|v| v.len()).unwrap_or(0);
    let (sent, total) = state.core.broadcast(&body.command, &body.params, total);
    Json(json!({ "sent": sent, "total": total }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBody {
    service_times: Vec<ServiceTime>,
}

pub async fn put_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ScheduleBody>,
) -> Response {
    let venue_id = VenueId::from(id);
    match state.venues.set_schedule(&venue_id, &body.service_times) {
        Ok(()) => Json(json!({ "saved": true })).into_response(),
        Err(VenueError::NotFound { .. }) => error_response(ErrorCode::NotFound),
        Err(VenueError::InvalidSchedule(_)) => error_response(ErrorCode::InvalidParams),
        Err(_) => error_response(ErrorCode::Internal),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceEntry {
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    reason: Option<String>,
}

#[derive(Deserialize)]
pub struct MaintenanceBody {
    windows: Vec<MaintenanceEntry>,
}

pub async fn put_maintenance(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<MaintenanceBody>,
) -> Response {
    let venue_id = VenueId::from(id);
    if state.venues.get(&venue_id).ok().flatten().is_none() {
        return error_response(ErrorCode::NotFound);
    }
    let windows: Vec<_> = body
        .windows
        .into_iter()
        .map(|w| (w.starts_at, w.ends_at, w.reason))
        .collect();
    match state.venues.replace_maintenance(&venue_id, &windows) {
        Ok(saved) => Json(json!({ "saved": true, "count": saved.len() })).into_response(),
        Err(_) => error_response(ErrorCode::Internal),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestBody {
    display_name: String,
}

pub async fn issue_guest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<GuestBody>,
) -> Response {
    let venue_id = VenueId::from(id);
    if state.venues.get(&venue_id).ok().flatten().is_none() {
        return error_response(ErrorCode::NotFound);
    }
    match state.roster.issue_guest(&venue_id, &body.display_name) {
        Ok(guest) => Json(json!({
            "token": guest.token,
            "expiresAt": guest.expires_at,
        }))
        .into_response(),
        Err(_) => error_response(ErrorCode::Internal),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotBody {
    /// `null` clears the override back to the relay default bot.
    bot_token: Option<String>,
}

pub async fn put_bot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<BotBody>,
) -> Response {
    let venue_id = VenueId::from(id);
    match state.venues.set_bot_token(&venue_id, body.bot_token.as_deref()) {
        Ok(()) => Json(json!({ "saved": true })).into_response(),
        Err(VenueError::NotFound { .. }) => error_response(ErrorCode::NotFound),
        Err(_) => error_response(ErrorCode::Internal),
    }
}

#[derive(Deserialize)]
pub struct AckBody {
    responder: String,
}

pub async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AckBody>,
) -> Response {
    match state
        .pipeline
        .acknowledge(&AlertId::from(id), &body.responder)
    {
        Ok(_) => Json(json!({ "acknowledged": true })).into_response(),
        Err(e) if matches!(e.code(), ErrorCode::NotFound) => error_response(ErrorCode::NotFound),
        Err(_) => error_response(ErrorCode::Internal),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsQuery {
    venue_id: Option<String>,
}

pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Response {
    let venue_id = query.venue_id.map(VenueId::from);
    match state.alerts.recent(venue_id.as_ref(), 50) {
        Ok(alerts) => Json(json!(alerts)).into_response(),
        Err(_) => error_response(ErrorCode::Internal),
    }
}
