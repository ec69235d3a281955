//! End-to-end HTTP tests over the full router with an in-memory store.
//!
//! Run with: `cargo test -p marketplace --test http_api`

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use common::Marketplace;
use inkmatch_web::CORRELATION_ID_HEADER;
use marketplace::auth::StaticIdentityGateway;
use marketplace::build_router;
use marketplace::config::PaymentConfig;
use marketplace::types::{Caller, ProfileKind, Role, UserId};
use serde_json::{json, Value};
use std::time::Duration;

const CLIENT: &str = "client-token";
const ARTIST: &str = "artist-token";
const WEBHOOK_SECRET: &str = "whsec_test";

struct Harness {
    server: TestServer,
    client: Caller,
    artist: Caller,
}

async fn harness() -> Harness {
    let client = Caller::new(UserId::new(), Role::Client);
    let artist = Caller::new(UserId::new(), Role::Artist);
    let identity = StaticIdentityGateway::new()
        .with_token(CLIENT, client)
        .with_token(ARTIST, artist);
    let config = PaymentConfig {
        webhook_secret: Some(WEBHOOK_SECRET.to_string()),
        ..PaymentConfig::default()
    };
    let market = Marketplace::with_identity(config, Duration::from_secs(2), identity);
    market.add_profile(artist, ProfileKind::Artist).await;

    Harness {
        server: TestServer::new(build_router(market.state.clone())).unwrap(),
        client,
        artist,
    }
}

impl Harness {
    async fn open_request(&self) -> Value {
        let response = self
            .server
            .post("/requests")
            .authorization_bearer(CLIENT)
            .json(&json!({
                "title": "Koi sleeve",
                "description": "Half sleeve, japanese style",
                "budget_min": 50_000,
                "budget_max": 90_000,
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    async fn submit_offer(&self, request_id: &Value, price: i64) -> Value {
        let response = self
            .server
            .post("/offers")
            .authorization_bearer(ARTIST)
            .json(&json!({
                "request_id": request_id,
                "message": "Happy to do this",
                "price": price,
                "estimated_duration_minutes": 180,
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }
}

#[tokio::test]
async fn test_health_and_readiness() {
    let harness = harness().await;

    harness.server.get("/health").await.assert_status_ok();

    let ready = harness.server.get("/ready").await;
    ready.assert_status_ok();
    let body: Value = ready.json();
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_requests_require_a_known_bearer_token() {
    let harness = harness().await;

    let response = harness.server.get("/notifications").await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = harness
        .server
        .get("/notifications")
        .authorization_bearer("nobody")
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_invalid_budget_maps_to_bad_request() {
    let harness = harness().await;

    let response = harness
        .server
        .post("/requests")
        .authorization_bearer(CLIENT)
        .json(&json!({
            "title": "Koi sleeve",
            "description": "Half sleeve",
            "budget_min": 100,
            "budget_max": 50,
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "BUDGET_RANGE_INVALID");
}

#[tokio::test]
async fn test_malformed_body_is_rejected_with_json_error() {
    let harness = harness().await;

    let response = harness
        .server
        .post("/requests")
        .authorization_bearer(CLIENT)
        .json(&json!({ "title": 42 }))
        .await;
    assert!(response.status_code().is_client_error());
    let body: Value = response.json();
    assert_eq!(body["code"], "INVALID_BODY");
}

/// Negotiate, book and pay through the HTTP surface.
#[tokio::test]
async fn test_offer_accept_book_and_pay() {
    let harness = harness().await;
    let request = harness.open_request().await;
    let offer = harness.submit_offer(&request["id"], 70_000).await;
    assert_eq!(offer["status"], "pending");

    let duplicate = harness
        .server
        .post("/offers")
        .authorization_bearer(ARTIST)
        .json(&json!({
            "request_id": request["id"],
            "message": "Again",
            "price": 60_000,
            "estimated_duration_minutes": 180,
        }))
        .await;
    duplicate.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(duplicate.json::<Value>()["code"], "DUPLICATE_OFFER");

    let offer_path = format!("/offers/{}", offer["id"].as_str().unwrap());
    let accepted = harness
        .server
        .put(&offer_path)
        .authorization_bearer(CLIENT)
        .json(&json!({ "status": "accepted" }))
        .await;
    accepted.assert_status_ok();
    assert_eq!(accepted.json::<Value>()["status"], "accepted");

    let request_path = format!("/requests/{}", request["id"].as_str().unwrap());
    let reread: Value = harness
        .server
        .get(&request_path)
        .authorization_bearer(CLIENT)
        .await
        .json();
    assert_eq!(reread["status"], "in_progress");

    let booking = json!({
        "profile_id": harness.artist.user_id,
        "start_at": "2025-01-02T10:00:00Z",
        "offer_id": offer["id"],
    });
    let booked = harness
        .server
        .post("/appointments")
        .authorization_bearer(CLIENT)
        .json(&booking)
        .await;
    booked.assert_status(StatusCode::CREATED);
    let appointment: Value = booked.json();
    assert_eq!(appointment["end_at"], "2025-01-02T13:00:00Z");

    let clash = harness
        .server
        .post("/appointments")
        .authorization_bearer(CLIENT)
        .json(&json!({
            "profile_id": harness.artist.user_id,
            "start_at": "2025-01-02T12:00:00Z",
            "duration_minutes": 60,
        }))
        .await;
    clash.assert_status(StatusCode::CONFLICT);
    let body: Value = clash.json();
    assert_eq!(body["code"], "SCHEDULING_CONFLICT");
    assert_eq!(body["details"]["conflicting_appointment_id"], appointment["id"]);

    let probe: Value = harness
        .server
        .get("/appointments/conflicts")
        .authorization_bearer(CLIENT)
        .add_query_param("profile_id", harness.artist.user_id)
        .add_query_param("start", "2025-01-02T13:00:00Z")
        .add_query_param("end", "2025-01-02T14:00:00Z")
        .await
        .json();
    assert_eq!(probe["conflict"], false);

    let intent = harness
        .server
        .post("/payments/intent")
        .authorization_bearer(CLIENT)
        .json(&json!({
            "amount": 70_000,
            "processor": "processor_a",
            "metadata": { "client_id": harness.client.user_id, "offer_id": offer["id"] },
        }))
        .await;
    intent.assert_status(StatusCode::CREATED);
    let intent: Value = intent.json();
    assert_eq!(intent["status"], "processing");
    assert_eq!(intent["currency"], "usd");
    let external_ref = intent["external_ref"].as_str().unwrap().to_string();

    let webhook = json!({
        "processor": "processor_a",
        "external_id": external_ref,
        "status": "succeeded",
    });
    for expected in [json!({ "result": "applied", "status": "completed" }), json!({ "result": "duplicate" })] {
        let ack = harness
            .server
            .put("/payments/webhook")
            .add_header(
                HeaderName::from_static("x-webhook-signature"),
                HeaderValue::from_static(WEBHOOK_SECRET),
            )
            .json(&webhook)
            .await;
        ack.assert_status_ok();
        let body: Value = ack.json();
        assert_eq!(body["acknowledged"], true);
        assert_eq!(body["disposition"], expected);
    }

    let inbox: Value = harness
        .server
        .get("/notifications")
        .authorization_bearer(ARTIST)
        .await
        .json();
    let kinds: Vec<&str> = inbox
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds.iter().filter(|k| **k == "payment_received").count(), 1);
    assert!(kinds.contains(&"offer_accepted"));
    assert!(kinds.contains(&"appointment_booked"));
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature_and_unknown_reference() {
    let harness = harness().await;
    let body = json!({
        "processor": "processor_b",
        "external_id": "wallet_missing",
        "status": "succeeded",
    });

    let unsigned = harness.server.put("/payments/webhook").json(&body).await;
    unsigned.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(unsigned.json::<Value>()["code"], "INVALID_SIGNATURE");

    let unknown = harness
        .server
        .put("/payments/webhook")
        .add_header(
            HeaderName::from_static("x-webhook-signature"),
            HeaderValue::from_static(WEBHOOK_SECRET),
        )
        .json(&body)
        .await;
    unknown.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_small_payment_is_rejected() {
    let harness = harness().await;

    let response = harness
        .server
        .post("/payments/intent")
        .authorization_bearer(CLIENT)
        .json(&json!({
            "amount": 10,
            "processor": "processor_a",
            "metadata": { "client_id": harness.client.user_id },
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "AMOUNT_BELOW_MINIMUM");
}

#[tokio::test]
async fn test_notifications_can_be_marked_read_by_recipient_only() {
    let harness = harness().await;
    let request = harness.open_request().await;
    harness.submit_offer(&request["id"], 70_000).await;

    let unread: Value = harness
        .server
        .get("/notifications")
        .authorization_bearer(CLIENT)
        .add_query_param("unread_only", true)
        .await
        .json();
    let unread = unread.as_array().unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0]["type"], "new_offer");
    let path = format!("/notifications/{}/read", unread[0]["id"].as_str().unwrap());

    harness
        .server
        .put(&path)
        .authorization_bearer(ARTIST)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let read = harness.server.put(&path).authorization_bearer(CLIENT).await;
    read.assert_status_ok();
    assert_eq!(read.json::<Value>()["read"], true);

    let unread: Value = harness
        .server
        .get("/notifications")
        .authorization_bearer(CLIENT)
        .add_query_param("unread_only", true)
        .await
        .json();
    assert!(unread.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_correlation_id_is_echoed() {
    let harness = harness().await;
    let id = "4b7f1c52-6a0e-4f7e-9d7a-2f1f3c8e9a10";

    let response = harness
        .server
        .get("/health")
        .add_header(
            HeaderName::from_static(CORRELATION_ID_HEADER),
            HeaderValue::from_static(id),
        )
        .await;
    let echoed = response.headers().get(CORRELATION_ID_HEADER).unwrap();
    assert_eq!(echoed.to_str().unwrap(), id);

    let generated = harness.server.get("/health").await;
    assert!(generated.headers().get(CORRELATION_ID_HEADER).is_some());
}
