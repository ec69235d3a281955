//! Offer endpoints:
//! - POST /offers - Submit an offer (artists and studios)
//! - GET /offers/:id - Read an offer
//! - PUT /offers/:id - Change status, or revise content, never both
//! - DELETE /offers/:id - Delete a pending offer (responder only)

use super::ApiJson;
use crate::aggregates::negotiation::{OfferChanges, OfferDraft};
use crate::aggregates::NegotiationError;
use crate::auth::AuthenticatedCaller;
use crate::error::EngineError;
use crate::server::state::AppState;
use crate::types::{Offer, OfferId, OfferStatus, RequestId};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use inkmatch_web::AppError;
use serde::Deserialize;

/// Body of `POST /offers`.
#[derive(Debug, Deserialize)]
pub struct CreateOfferBody {
    /// Request being offered on
    pub request_id: RequestId,
    /// Offer content
    #[serde(flatten)]
    pub draft: OfferDraft,
}

/// Body of `PUT /offers/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateOfferBody {
    /// Target status
    #[serde(default)]
    pub status: Option<OfferStatus>,
    /// Content changes
    #[serde(flatten)]
    pub changes: OfferChanges,
}

/// Submit an offer.
///
/// ```bash
/// curl -X POST http://localhost:8080/offers \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{"request_id":"<uuid>","message":"Happy to do it","price":75000,"estimated_duration_minutes":240}'
/// ```
pub async fn create_offer(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateOfferBody>,
) -> Result<(StatusCode, Json<Offer>), AppError> {
    let offer = state
        .negotiation
        .submit_offer(caller, body.request_id, body.draft)
        .await?;
    Ok((StatusCode::CREATED, Json(offer)))
}

/// Read an offer.
pub async fn get_offer(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Path(offer_id): Path<OfferId>,
) -> Result<Json<Offer>, AppError> {
    Ok(Json(state.negotiation.get_offer(caller, offer_id).await?))
}

/// Change an offer's status or revise its content.
pub async fn update_offer(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Path(offer_id): Path<OfferId>,
    ApiJson(body): ApiJson<UpdateOfferBody>,
) -> Result<Json<Offer>, AppError> {
    let offer = match (body.status, body.changes.is_empty()) {
        (Some(_), false) => return Err(EngineError::from(NegotiationError::AmbiguousUpdate).into()),
        (Some(to), true) => {
            state
                .negotiation
                .change_offer_status(caller, offer_id, to)
                .await?
        }
        (None, false) => {
            state
                .negotiation
                .revise_offer(caller, offer_id, body.changes)
                .await?
        }
        (None, true) => {
            return Err(EngineError::from(NegotiationError::MissingField("status")).into());
        }
    };
    Ok(Json(offer))
}

/// Delete a pending offer.
pub async fn delete_offer(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Path(offer_id): Path<OfferId>,
) -> Result<StatusCode, AppError> {
    state.negotiation.delete_offer(caller, offer_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
