//! Router configuration.

use super::health::readiness_check;
use super::state::AppState;
use crate::api::{appointments, notifications, offers, payments, requests};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use inkmatch_web::{health_check, propagate_correlation_id};

/// Build the complete Axum router.
///
/// Every route runs inside the correlation-id middleware, so each request is
/// one `http_request` span and the id is echoed on the response.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health checks (no authentication)
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Requests
        .route("/requests", post(requests::create_request))
        .route(
            "/requests/:id",
            get(requests::get_request)
                .put(requests::update_request)
                .delete(requests::delete_request),
        )
        .route("/requests/:id/offers", get(requests::list_offers))
        // Offers
        .route("/offers", post(offers::create_offer))
        .route(
            "/offers/:id",
            get(offers::get_offer)
                .put(offers::update_offer)
                .delete(offers::delete_offer),
        )
        // Appointments
        .route("/appointments", post(appointments::create_appointment))
        .route("/appointments/conflicts", get(appointments::check_conflict))
        .route(
            "/appointments/:id",
            get(appointments::get_appointment).put(appointments::update_appointment),
        )
        // Payments
        .route("/payments/intent", post(payments::create_intent))
        .route("/payments/intent/:id", get(payments::get_intent))
        .route("/payments/webhook", put(payments::webhook))
        .route("/payments/:processor/capture", post(payments::capture))
        // Notifications
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/:id/read", put(notifications::mark_read))
        .layer(middleware::from_fn(propagate_correlation_id))
        .with_state(state)
}
