//! Transaction engine for a tattoo marketplace.
//!
//! Clients post requests, artists and studios answer with offers, accepted
//! work is booked onto the responder's calendar and paid through an external
//! processor. This crate decides every state transition along that path:
//!
//! - **Negotiation**: request and offer lifecycle. Accepting one offer
//!   rejects its pending siblings and moves the request to `in_progress`
//!   in the same transaction.
//! - **Scheduling**: half-open interval conflict detection per profile,
//!   serialized by a per-profile schedule lock and backed by an exclusion
//!   constraint.
//! - **Payments**: intents are recorded before the processor is called, and
//!   confirmations are reconciled idempotently by external reference.
//! - **Notifications**: recorded inside the transaction that caused them.
//!
//! # Architecture
//!
//! ```text
//!   HTTP (axum)      api/       -> AppError mapping, AuthenticatedCaller
//!        │
//!   Services         app/       -> one transaction script per operation
//!        │
//!   Reducers         aggregates/ -> pure decisions over locked snapshots
//!        │
//!   Store            store/     -> PostgreSQL or in-memory
//! ```
//!
//! Reducers never perform I/O. A service loads and locks the rows a decision
//! depends on, runs the reducer, persists the diff, executes the returned
//! effects and commits. A rejection rolls everything back.

pub mod aggregates;
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod processors;
pub mod server;
pub mod store;
pub mod types;

pub use app::{
    NegotiationService, NotificationService, PaymentService, ReconcileReceipt, SchedulingService,
};
pub use config::Config;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use server::{build_router, AppState};
pub use store::{InMemoryStore, MarketplaceStore, PgMarketplaceStore, StoreError};
