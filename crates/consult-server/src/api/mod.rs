//! REST API for consult-server
//!
//! Thin handlers over [`LifecycleEngine`]. The caller is always the bearer
//! identity; client ids and roles are never taken from request bodies.

pub mod auth;
pub mod error;

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use consult_core::{
    ActiveSession, Booking, BookingDetail, BookingLists, CallEvent, DeviceInfo, IdentityProvider,
    JoinGrant, LifecycleEngine, SlotCheck, SweepReport,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use validator::Validate;

pub use auth::AuthContext;
pub use error::{AppError, ErrorDetail, ErrorResponse};

pub const DEFAULT_LOOKAHEAD_MINUTES: i64 = 15;

#[derive(Clone)]
pub struct ApiState {
    pub engine: LifecycleEngine,
    pub identity: Arc<dyn IdentityProvider>,
}

impl ApiState {
    pub fn new(engine: LifecycleEngine, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { engine, identity }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[validate(length(min = 1, max = 128))]
    pub provider_id: String,
    pub starts_at: DateTime<Utc>,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AvailabilityQuery {
    pub starts_at: DateTime<Utc>,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: i64,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_booking_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ActiveSessionsQuery {
    #[validate(range(min = 0, max = 1440))]
    pub lookahead_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CallEventResponse {
    pub accepted: bool,
    /// Present when the event was a join
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant: Option<JoinGrant>,
}

/// Create the REST API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/cancel", post(cancel_booking))
        .route("/bookings/:id/join", post(join_booking))
        .route("/bookings/:id/events", post(record_call_event))
        .route("/providers/:id/availability", get(check_availability))
        .route("/sessions/active", get(active_sessions))
        .route("/events", get(event_stream))
        .route("/admin/sweep", post(run_sweep))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

async fn create_booking(
    State(state): State<ApiState>,
    auth: AuthContext,
    payload: Result<Json<CreateBookingRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = json_body(payload)?;
    req.validate()?;

    let booking = state
        .engine
        .create_booking(&auth.user_id, &req.provider_id, req.starts_at, req.duration_minutes)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn list_bookings(
    State(state): State<ApiState>,
    auth: AuthContext,
) -> Result<Json<BookingLists>, AppError> {
    Ok(Json(state.engine.list_bookings_for(&auth.user_id).await?))
}

async fn get_booking(
    State(state): State<ApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<BookingDetail>, AppError> {
    Ok(Json(state.engine.get_booking_detail(&id, &auth.user_id).await?))
}

async fn cancel_booking(
    State(state): State<ApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.engine.cancel_booking(&id, &auth.user_id).await?))
}

/// The body is optional; a missing or unreadable one means default devices
async fn join_booking(
    State(state): State<ApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
    device: Option<Json<DeviceInfo>>,
) -> Result<Json<JoinGrant>, AppError> {
    let device = device.map(|Json(d)| d).unwrap_or_default();
    Ok(Json(state.engine.request_join(&id, &auth.user_id, &device).await?))
}

async fn record_call_event(
    State(state): State<ApiState>,
    auth: AuthContext,
    Path(id): Path<String>,
    payload: Result<Json<CallEvent>, JsonRejection>,
) -> Result<Json<CallEventResponse>, AppError> {
    let event = json_body(payload)?;
    let grant = state
        .engine
        .record_call_event(&id, &auth.user_id, event)
        .await?;
    Ok(Json(CallEventResponse {
        accepted: true,
        grant,
    }))
}

async fn check_availability(
    State(state): State<ApiState>,
    _auth: AuthContext,
    Path(provider_id): Path<String>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let Query(query) = query.map_err(|r| AppError::bad_request(r.body_text()))?;
    query.validate()?;

    let check = state
        .engine
        .check_slot(&provider_id, query.starts_at, query.duration_minutes)
        .await?;
    Ok(Json(match check {
        SlotCheck::Available => AvailabilityResponse {
            available: true,
            conflicting_booking_id: None,
        },
        SlotCheck::Conflict { booking_id } => AvailabilityResponse {
            available: false,
            conflicting_booking_id: Some(booking_id),
        },
    }))
}

/// Polling fallback for clients without the event stream
async fn active_sessions(
    State(state): State<ApiState>,
    auth: AuthContext,
    query: Result<Query<ActiveSessionsQuery>, QueryRejection>,
) -> Result<Json<Vec<ActiveSession>>, AppError> {
    let Query(query) = query.map_err(|r| AppError::bad_request(r.body_text()))?;
    query.validate()?;

    let lookahead = Duration::minutes(query.lookahead_minutes.unwrap_or(DEFAULT_LOOKAHEAD_MINUTES));
    let engine = &state.engine;
    Ok(Json(
        engine
            .active_sessions_for(&auth.user_id, engine.now(), lookahead)
            .await?,
    ))
}

async fn event_stream(
    State(state): State<ApiState>,
    auth: AuthContext,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    info!("📡 Event stream opened for {}", auth.user_id);
    let stream = state
        .engine
        .subscribe(&auth.user_id)
        .map(|event| Event::default().event(event.type_name()).json_data(&event));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn run_sweep(
    State(state): State<ApiState>,
    auth: AuthContext,
) -> Result<Json<SweepReport>, AppError> {
    if !auth.is_admin() {
        return Err(AppError::Forbidden);
    }
    let engine = &state.engine;
    let report = engine.sweep_expired(engine.now()).await?;
    info!(
        "🧹 Manual sweep by {}: {} completed, {} orphaned calls removed",
        auth.user_id,
        report.completed.len(),
        report.orphaned_calls_removed
    );
    Ok(Json(report))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "consult-server",
        "timestamp": Utc::now(),
    }))
}
