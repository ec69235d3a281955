//! HTTP API.
//!
//! Handlers authenticate the caller, translate the body into a service call,
//! and map [`EngineError`] onto [`AppError`]. Every route lives under the
//! router in [`crate::server::routes`].
//!
//! Endpoints:
//! - `/requests`: create, read, revise or cancel, delete, list offers
//! - `/offers`: submit, read, change status or content, delete
//! - `/appointments`: book, read, reschedule or change status, conflict probe
//! - `/payments`: create and read intents, capture, webhook confirmations
//! - `/notifications`: list, mark read

pub mod appointments;
pub mod notifications;
pub mod offers;
pub mod payments;
pub mod requests;

use crate::aggregates::{NegotiationError, PaymentError, ScheduleError};
use crate::error::EngineError;
use crate::store::StoreError;
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    Json,
};
use inkmatch_web::AppError;
use serde_json::json;

/// JSON body extractor whose rejection is a 400 in the API's error shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                Err(AppError::bad_request(rejection.body_text()).with_code("INVALID_BODY"))
            }
        }
    }
}

fn negotiation_status(error: &NegotiationError) -> (StatusCode, &'static str) {
    use NegotiationError as E;
    match error {
        E::MissingField(_) => (StatusCode::BAD_REQUEST, "MISSING_FIELD"),
        E::InvalidBudget => (StatusCode::BAD_REQUEST, "BUDGET_RANGE_INVALID"),
        E::InvalidOffer(_) => (StatusCode::BAD_REQUEST, "INVALID_OFFER"),
        E::RequestNotOpen => (StatusCode::BAD_REQUEST, "REQUEST_NOT_OPEN"),
        E::RequestInactive => (StatusCode::BAD_REQUEST, "REQUEST_INACTIVE"),
        E::SelfOffer => (StatusCode::BAD_REQUEST, "SELF_OFFER"),
        E::DuplicateOffer => (StatusCode::BAD_REQUEST, "DUPLICATE_OFFER"),
        E::InvalidTransition { .. } | E::InvalidRequestTransition { .. } => {
            (StatusCode::BAD_REQUEST, "INVALID_TRANSITION")
        }
        E::RequestClosed(_) => (StatusCode::BAD_REQUEST, "REQUEST_CLOSED"),
        E::OfferNotEditable => (StatusCode::BAD_REQUEST, "OFFER_NOT_EDITABLE"),
        E::AmbiguousUpdate => (StatusCode::BAD_REQUEST, "AMBIGUOUS_UPDATE"),
        E::StatusNotSettable(_) => (StatusCode::BAD_REQUEST, "STATUS_NOT_SETTABLE"),
        E::ClientsOnly => (StatusCode::FORBIDDEN, "CLIENTS_ONLY"),
        E::RespondersOnly => (StatusCode::FORBIDDEN, "RESPONDERS_ONLY"),
        E::NotTargetedResponder => (StatusCode::FORBIDDEN, "NOT_TARGETED_RESPONDER"),
        E::ClientMismatch => (StatusCode::FORBIDDEN, "NOT_REQUEST_OWNER"),
        E::NotResponder => (StatusCode::FORBIDDEN, "NOT_OFFER_RESPONDER"),
        E::NotParticipant => (StatusCode::FORBIDDEN, "NOT_PARTICIPANT"),
        E::OfferNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
    }
}

fn schedule_status(error: &ScheduleError) -> (StatusCode, &'static str) {
    use ScheduleError as E;
    match error {
        E::MissingField(_) => (StatusCode::BAD_REQUEST, "MISSING_FIELD"),
        E::InvalidDuration => (StatusCode::BAD_REQUEST, "INVALID_DURATION"),
        E::StartInPast => (StatusCode::BAD_REQUEST, "START_IN_PAST"),
        E::ProfileInactive => (StatusCode::BAD_REQUEST, "PROFILE_INACTIVE"),
        E::SelfBooking => (StatusCode::BAD_REQUEST, "SELF_BOOKING"),
        E::InvalidTransition { .. } => (StatusCode::BAD_REQUEST, "INVALID_TRANSITION"),
        E::AppointmentClosed(_) => (StatusCode::BAD_REQUEST, "APPOINTMENT_CLOSED"),
        E::OfferNotBookable(_) => (StatusCode::BAD_REQUEST, "OFFER_NOT_BOOKABLE"),
        E::NoChanges => (StatusCode::BAD_REQUEST, "NO_CHANGES"),
        E::NotParticipant => (StatusCode::FORBIDDEN, "NOT_PARTICIPANT"),
        E::NotProfileOwner(_) => (StatusCode::FORBIDDEN, "NOT_PROFILE_OWNER"),
        E::OfferClientMismatch => (StatusCode::FORBIDDEN, "CLIENT_MISMATCH"),
        E::Conflict { .. } => (StatusCode::CONFLICT, "SCHEDULING_CONFLICT"),
        E::AppointmentNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
    }
}

fn payment_status(error: &PaymentError) -> (StatusCode, &'static str) {
    use PaymentError as E;
    match error {
        E::AmountBelowMinimum { .. } => (StatusCode::BAD_REQUEST, "AMOUNT_BELOW_MINIMUM"),
        E::InvalidCurrency(_) => (StatusCode::BAD_REQUEST, "INVALID_CURRENCY"),
        E::ResponderMismatch => (StatusCode::BAD_REQUEST, "RESPONDER_MISMATCH"),
        E::OfferNotPayable(_) => (StatusCode::BAD_REQUEST, "OFFER_NOT_PAYABLE"),
        E::ClientMismatch => (StatusCode::FORBIDDEN, "CLIENT_MISMATCH"),
        E::InvalidSignature => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE"),
        E::PaymentInFlight { .. } => (StatusCode::CONFLICT, "PAYMENT_IN_FLIGHT"),
        E::IntentNotPending(_) | E::ExternalRefAlreadySet => {
            (StatusCode::CONFLICT, "PAYMENT_STATE_CONFLICT")
        }
        E::UnknownExternalRef { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        E::Processor(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PROCESSOR_ERROR"),
    }
}

impl From<EngineError> for AppError {
    fn from(error: EngineError) -> Self {
        tracing::debug!(kind = error.kind().as_str(), error = %error, "Operation rejected");

        let (status, code) = match &error {
            EngineError::Negotiation(e) => negotiation_status(e),
            EngineError::Schedule(e) => schedule_status(e),
            EngineError::Payment(e) => payment_status(e),
            EngineError::Store(StoreError::ExclusionViolation(_)) => {
                (StatusCode::CONFLICT, "SCHEDULING_CONFLICT")
            }
            EngineError::Store(StoreError::UniqueViolation(_)) => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            EngineError::Store(_) | EngineError::Discrepancy { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            EngineError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        };

        // Processor and persistence detail stays in the logs.
        if status.is_server_error() {
            let message = if code == "PROCESSOR_ERROR" {
                "Payment processing failed"
            } else {
                "An internal error occurred"
            };
            return Self::new(status, message, code).with_source(anyhow::Error::new(error));
        }

        let details = match &error {
            EngineError::Schedule(ScheduleError::Conflict {
                conflicting,
                start,
                end,
            }) => Some(json!({
                "conflicting_appointment_id": conflicting,
                "start": start,
                "end": end,
            })),
            _ => None,
        };
        let app_error = Self::new(status, error.to_string(), code);
        match details {
            Some(details) => app_error.with_details(details),
            None => app_error,
        }
    }
}
