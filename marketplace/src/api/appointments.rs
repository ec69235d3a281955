//! Appointment endpoints:
//! - POST /appointments - Book a slot (409 on overlap)
//! - GET /appointments/conflicts - Probe a slot without booking it
//! - GET /appointments/:id - Read an appointment
//! - PUT /appointments/:id - Reschedule, change status, edit details

use super::ApiJson;
use crate::aggregates::schedule::{AppointmentChanges, BookingDraft};
use crate::auth::AuthenticatedCaller;
use crate::server::state::AppState;
use crate::types::{Appointment, AppointmentId, UserId};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use inkmatch_web::AppError;
use serde::{Deserialize, Serialize};

/// Query of `GET /appointments/conflicts`.
#[derive(Debug, Deserialize)]
pub struct ConflictQuery {
    /// Profile whose calendar is probed
    pub profile_id: UserId,
    /// Slot start
    pub start: DateTime<Utc>,
    /// Slot end (exclusive)
    pub end: DateTime<Utc>,
    /// Appointment to ignore, for reschedules
    #[serde(default)]
    pub exclude: Option<AppointmentId>,
}

/// Response of `GET /appointments/conflicts`.
#[derive(Debug, Serialize)]
pub struct ConflictResponse {
    /// Whether the slot overlaps an active appointment
    pub conflict: bool,
}

/// Book an appointment.
///
/// ```bash
/// curl -X POST http://localhost:8080/appointments \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{"profile_id":"<uuid>","start_at":"2030-05-01T14:00:00Z","duration_minutes":120}'
/// ```
pub async fn create_appointment(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    ApiJson(draft): ApiJson<BookingDraft>,
) -> Result<(StatusCode, Json<Appointment>), AppError> {
    let appointment = state.scheduling.book(caller, draft).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

/// Whether a slot is free. Booking re-checks under lock.
pub async fn check_conflict(
    AuthenticatedCaller(_caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Query(query): Query<ConflictQuery>,
) -> Result<Json<ConflictResponse>, AppError> {
    let conflict = state
        .scheduling
        .has_conflict(query.profile_id, query.start, query.end, query.exclude)
        .await?;
    Ok(Json(ConflictResponse { conflict }))
}

/// Read an appointment.
pub async fn get_appointment(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Path(appointment_id): Path<AppointmentId>,
) -> Result<Json<Appointment>, AppError> {
    Ok(Json(
        state
            .scheduling
            .get_appointment(caller, appointment_id)
            .await?,
    ))
}

/// Update an appointment.
pub async fn update_appointment(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Path(appointment_id): Path<AppointmentId>,
    ApiJson(changes): ApiJson<AppointmentChanges>,
) -> Result<Json<Appointment>, AppError> {
    let appointment = state
        .scheduling
        .update(caller, appointment_id, changes)
        .await?;
    Ok(Json(appointment))
}
