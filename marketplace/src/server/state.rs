//! Application state shared across all HTTP handlers.

use crate::aggregates::{NegotiationEnvironment, PaymentEnvironment, ScheduleEnvironment};
use crate::app::{NegotiationService, NotificationService, PaymentService, SchedulingService};
use crate::auth::IdentityGateway;
use crate::config::PaymentConfig;
use crate::processors::PaymentProcessors;
use crate::store::MarketplaceStore;
use axum::extract::FromRef;
use inkmatch_core::environment::Clock;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is a handle. Entity state is never cached
/// here: each operation re-reads it inside its own transaction.
#[derive(Clone)]
pub struct AppState {
    /// Persistence, used directly only by the readiness probe
    pub store: Arc<dyn MarketplaceStore>,
    /// Bearer token resolution
    pub identity: Arc<dyn IdentityGateway>,
    /// Requests and offers
    pub negotiation: NegotiationService,
    /// Appointments
    pub scheduling: SchedulingService,
    /// Payment intents and confirmations
    pub payments: PaymentService,
    /// Recorded notifications
    pub notifications: NotificationService,
}

impl AppState {
    /// Wire every service over one store and one clock.
    #[must_use]
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        identity: Arc<dyn IdentityGateway>,
        processors: PaymentProcessors,
        clock: Arc<dyn Clock>,
        payments: PaymentConfig,
    ) -> Self {
        Self {
            negotiation: NegotiationService::new(
                Arc::clone(&store),
                NegotiationEnvironment::new(Arc::clone(&clock)),
            ),
            scheduling: SchedulingService::new(
                Arc::clone(&store),
                ScheduleEnvironment::new(Arc::clone(&clock)),
            ),
            payments: PaymentService::new(
                Arc::clone(&store),
                processors,
                PaymentEnvironment::new(clock),
                payments,
            ),
            notifications: NotificationService::new(Arc::clone(&store)),
            store,
            identity,
        }
    }
}

// The `AuthenticatedCaller` extractor resolves tokens through this.
impl FromRef<AppState> for Arc<dyn IdentityGateway> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.identity)
    }
}
