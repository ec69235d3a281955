//! Payment endpoints:
//! - POST /payments/intent - Create an intent and charge it
//! - GET /payments/intent/:id - Read an intent (paying client only)
//! - POST /payments/:processor/capture - Capture and reconcile
//! - PUT /payments/webhook - Processor confirmation
//!
//! Provider payloads are translated into [`ProcessorOutcome`] here; nothing
//! below this module sees provider status strings.

use super::ApiJson;
use crate::aggregates::payment::IntentRequest;
use crate::aggregates::ReconcileDisposition;
use crate::app::ReconcileReceipt;
use crate::auth::AuthenticatedCaller;
use crate::server::state::AppState;
use crate::types::{PaymentIntent, PaymentIntentId, Processor, ProcessorOutcome};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use inkmatch_web::AppError;
use serde::{Deserialize, Serialize};

/// Header carrying the webhook shared secret.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Body of `POST /payments/:processor/capture`.
#[derive(Debug, Deserialize)]
pub struct CaptureBody {
    /// Processor's reference
    pub external_id: String,
}

/// Body of `PUT /payments/webhook`.
#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    /// Rail reporting the event
    pub processor: Processor,
    /// Processor's reference
    pub external_id: String,
    /// Provider status string
    pub status: String,
}

/// Webhook acknowledgement. Sent for applied and duplicate deliveries alike.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Always `true`
    pub acknowledged: bool,
    /// What the delivery did
    pub disposition: ReconcileDisposition,
}

/// Create a payment intent.
///
/// ```bash
/// curl -X POST http://localhost:8080/payments/intent \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{"amount":75000,"processor":"card","metadata":{"client_id":"<uuid>","offer_id":"<uuid>"}}'
/// ```
pub async fn create_intent(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<IntentRequest>,
) -> Result<(StatusCode, Json<PaymentIntent>), AppError> {
    let intent = state.payments.create_intent(caller, request).await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

/// Read a payment intent.
pub async fn get_intent(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Path(intent_id): Path<PaymentIntentId>,
) -> Result<Json<PaymentIntent>, AppError> {
    Ok(Json(state.payments.get_intent(caller, intent_id).await?))
}

/// Capture a processing payment and reconcile what the processor reports.
pub async fn capture(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Path(processor): Path<Processor>,
    ApiJson(body): ApiJson<CaptureBody>,
) -> Result<Json<ReconcileReceipt>, AppError> {
    let receipt = state
        .payments
        .capture(caller, processor, &body.external_id)
        .await?;
    Ok(Json(receipt))
}

/// Apply a processor confirmation.
///
/// ```bash
/// curl -X PUT http://localhost:8080/payments/webhook \
///   -H "X-Webhook-Signature: <secret>" \
///   -H "Content-Type: application/json" \
///   -d '{"processor":"card","external_id":"pa_123","status":"succeeded"}'
/// ```
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<WebhookBody>,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    state.payments.verify_webhook_signature(signature)?;

    let outcome = ProcessorOutcome::from_provider_status(&body.status);
    let receipt = state
        .payments
        .reconcile(body.processor, &body.external_id, outcome)
        .await?;
    Ok(Json(WebhookAck {
        acknowledged: true,
        disposition: receipt.disposition,
    }))
}
