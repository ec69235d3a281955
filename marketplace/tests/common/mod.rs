//! Shared fixtures: an in-memory marketplace with mock processors and a
//! fixed clock at 2025-01-01T00:00:00Z.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, Duration, Utc};
use inkmatch_core::environment::Clock;
use inkmatch_testing::{init_test_tracing, test_clock};
use marketplace::aggregates::negotiation::{OfferDraft, RequestDraft};
use marketplace::auth::StaticIdentityGateway;
use marketplace::config::PaymentConfig;
use marketplace::processors::{MockPaymentProcessor, PaymentProcessors};
use marketplace::store::MarketplaceStore;
use marketplace::types::{
    Caller, Money, Offer, OfferStatus, Profile, ProfileKind, Request, Role, UserId,
};
use marketplace::{AppState, InMemoryStore};
use std::sync::Arc;

/// Everything a scenario needs.
pub struct Marketplace {
    pub store: InMemoryStore,
    pub card: Arc<MockPaymentProcessor>,
    pub wallet: Arc<MockPaymentProcessor>,
    pub state: AppState,
    pub now: DateTime<Utc>,
}

impl Marketplace {
    pub fn new() -> Self {
        Self::with_config(PaymentConfig::default(), std::time::Duration::from_secs(2))
    }

    pub fn with_config(config: PaymentConfig, processor_timeout: std::time::Duration) -> Self {
        Self::with_identity(config, processor_timeout, StaticIdentityGateway::new())
    }

    pub fn with_identity(
        config: PaymentConfig,
        processor_timeout: std::time::Duration,
        identity: StaticIdentityGateway,
    ) -> Self {
        init_test_tracing();
        let clock = test_clock();
        let now = clock.now();
        let store = InMemoryStore::new();
        let card = Arc::new(MockPaymentProcessor::new(
            marketplace::types::Processor::ProcessorA,
        ));
        let wallet = Arc::new(MockPaymentProcessor::new(
            marketplace::types::Processor::ProcessorB,
        ));
        let processors = PaymentProcessors::new(
            Arc::clone(&card) as _,
            Arc::clone(&wallet) as _,
            processor_timeout,
        );
        let state = AppState::new(
            Arc::new(store.clone()),
            Arc::new(identity),
            processors,
            Arc::new(clock),
            config,
        );
        Self {
            store,
            card,
            wallet,
            state,
            now,
        }
    }

    /// A point `hours` after the fixed clock.
    pub fn at(&self, hours: i64) -> DateTime<Utc> {
        self.now + Duration::hours(hours)
    }

    /// An artist with an active, bookable profile.
    pub async fn artist(&self) -> Caller {
        self.profile(ProfileKind::Artist, Role::Artist).await
    }

    /// A studio with an active, bookable profile.
    pub async fn studio(&self) -> Caller {
        self.profile(ProfileKind::Studio, Role::Studio).await
    }

    async fn profile(&self, kind: ProfileKind, role: Role) -> Caller {
        let caller = Caller::new(UserId::new(), role);
        self.add_profile(caller, kind).await;
        caller
    }

    /// Give an existing caller an active profile.
    pub async fn add_profile(&self, caller: Caller, kind: ProfileKind) {
        self.store
            .upsert_profile(&Profile {
                id: caller.user_id,
                kind,
                display_name: format!("{kind} {}", caller.user_id),
                active: true,
            })
            .await
            .unwrap();
    }

    pub async fn deactivate_profile(&self, caller: Caller, kind: ProfileKind) {
        self.store
            .upsert_profile(&Profile {
                id: caller.user_id,
                kind,
                display_name: "inactive".to_string(),
                active: false,
            })
            .await
            .unwrap();
    }

    /// Open a request with a 500.00 to 900.00 budget.
    pub async fn open_request(&self, client: Caller) -> Request {
        self.state
            .negotiation
            .create_request(client, request_draft())
            .await
            .unwrap()
    }

    pub async fn offer(&self, responder: Caller, request: &Request, cents: i64) -> Offer {
        self.state
            .negotiation
            .submit_offer(responder, request.id, offer_draft(cents))
            .await
            .unwrap()
    }

    /// A request with one offer from `responder`, accepted by `client`.
    pub async fn accepted_offer(&self, client: Caller, responder: Caller) -> Offer {
        let request = self.open_request(client).await;
        let offer = self.offer(responder, &request, 75_000).await;
        self.state
            .negotiation
            .change_offer_status(client, offer.id, OfferStatus::Accepted)
            .await
            .unwrap()
    }

    pub async fn notifications_for(&self, user: Caller) -> Vec<marketplace::types::Notification> {
        self.state.notifications.list(user, false).await.unwrap()
    }
}

pub fn client() -> Caller {
    Caller::new(UserId::new(), Role::Client)
}

pub fn request_draft() -> RequestDraft {
    RequestDraft {
        title: "Koi sleeve".to_string(),
        description: "Half sleeve, japanese style, colour".to_string(),
        style: "japanese".to_string(),
        size: "large".to_string(),
        placement: "left arm".to_string(),
        budget_min: Some(Money::from_cents(50_000)),
        budget_max: Some(Money::from_cents(90_000)),
        target: None,
        deadline: None,
    }
}

pub fn offer_draft(cents: i64) -> OfferDraft {
    OfferDraft {
        message: "I'd love to take this on".to_string(),
        price: Money::from_cents(cents),
        estimated_duration_minutes: 240,
        availability: None,
    }
}
