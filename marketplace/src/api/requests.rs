//! Request endpoints:
//! - POST /requests - Open a request (clients only)
//! - GET /requests/:id - Read a request
//! - PUT /requests/:id - Revise descriptive fields or cancel (owner only)
//! - DELETE /requests/:id - Delete or deactivate (owner only)
//! - GET /requests/:id/offers - Offers on a request

use super::ApiJson;
use crate::aggregates::negotiation::{RequestChanges, RequestDraft};
use crate::app::negotiation::Retirement;
use crate::auth::AuthenticatedCaller;
use crate::server::state::AppState;
use crate::types::{Offer, Request, RequestId, RequestStatus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use inkmatch_web::AppError;
use serde::{Deserialize, Serialize};

/// Body of `PUT /requests/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequestBody {
    /// Descriptive fields to change
    #[serde(flatten)]
    pub changes: RequestChanges,
    /// Only `cancelled` is accepted
    #[serde(default)]
    pub status: Option<RequestStatus>,
}

/// Response of `DELETE /requests/:id`.
#[derive(Debug, Serialize)]
pub struct RetireResponse {
    /// Request id
    pub request_id: RequestId,
    /// `true` when the row was removed, `false` when it was deactivated
    pub deleted: bool,
}

/// Open a request.
///
/// ```bash
/// curl -X POST http://localhost:8080/requests \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{"title":"Koi sleeve","description":"Half sleeve","budget_min":50000,"budget_max":90000}'
/// ```
pub async fn create_request(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    ApiJson(draft): ApiJson<RequestDraft>,
) -> Result<(StatusCode, Json<Request>), AppError> {
    let request = state.negotiation.create_request(caller, draft).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// Read a request.
pub async fn get_request(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Path(request_id): Path<RequestId>,
) -> Result<Json<Request>, AppError> {
    Ok(Json(state.negotiation.get_request(caller, request_id).await?))
}

/// Revise a request, or cancel it with `{"status":"cancelled"}`.
pub async fn update_request(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Path(request_id): Path<RequestId>,
    ApiJson(body): ApiJson<UpdateRequestBody>,
) -> Result<Json<Request>, AppError> {
    let request = state
        .negotiation
        .update_request(caller, request_id, body.changes, body.status)
        .await?;
    Ok(Json(request))
}

/// Delete a request. Requests with offers are deactivated instead.
pub async fn delete_request(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Path(request_id): Path<RequestId>,
) -> Result<Json<RetireResponse>, AppError> {
    let retirement = state.negotiation.retire_request(caller, request_id).await?;
    Ok(Json(RetireResponse {
        request_id,
        deleted: retirement == Retirement::Deleted,
    }))
}

/// Offers on a request visible to the caller.
pub async fn list_offers(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Path(request_id): Path<RequestId>,
) -> Result<Json<Vec<Offer>>, AppError> {
    Ok(Json(state.negotiation.list_offers(caller, request_id).await?))
}
