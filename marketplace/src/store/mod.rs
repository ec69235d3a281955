//! Persistence store.
//!
//! The store is the single source of truth and the arbiter of conflicts.
//! Every mutating operation runs inside one [`StoreTransaction`]; the `lock_*`
//! methods read a row and hold it until commit or rollback, so a decision
//! made from their result cannot be invalidated by a concurrent writer.
//!
//! Dropping a transaction without committing rolls it back.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgMarketplaceStore;

use crate::types::{
    Appointment, AppointmentId, Discrepancy, Notification, NotificationId, Offer, OfferId,
    PaymentIntent, PaymentIntentId, Processor, Profile, Request, RequestId, UserId,
};
use async_trait::async_trait;

/// Store result
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
    /// The appointment overlap constraint rejected the write
    #[error("Exclusion constraint violated: {0}")]
    ExclusionViolation(String),
    /// A row the write depends on is missing
    #[error("{entity} {id} not found")]
    Missing {
        /// Entity name
        entity: &'static str,
        /// Identifier
        id: String,
    },
    /// A stored value could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    /// Any other database failure
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub(crate) fn missing(entity: &'static str, id: impl ToString) -> Self {
        Self::Missing {
            entity,
            id: id.to_string(),
        }
    }
}

/// Entry point to the store.
#[async_trait]
pub trait MarketplaceStore: Send + Sync {
    /// Open a transaction
    ///
    /// # Errors
    ///
    /// Returns error if no connection is available
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Check the store is reachable
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be reached
    async fn ping(&self) -> StoreResult<()>;

    /// Insert or replace a profile. Profiles are owned elsewhere; this seeds them.
    ///
    /// # Errors
    ///
    /// Returns error on database failure
    async fn upsert_profile(&self, profile: &Profile) -> StoreResult<()>;

    /// All recorded reconciliation discrepancies, newest first
    ///
    /// # Errors
    ///
    /// Returns error on database failure
    async fn discrepancies(&self) -> StoreResult<Vec<Discrepancy>>;
}

/// Operations available inside a transaction.
#[async_trait]
pub trait StoreTransaction: Send {
    // ----- profiles -----

    /// Read a profile
    async fn get_profile(&mut self, id: UserId) -> StoreResult<Option<Profile>>;

    // ----- requests -----

    /// Read a request without locking it
    async fn get_request(&mut self, id: RequestId) -> StoreResult<Option<Request>>;
    /// Read and lock a request
    async fn lock_request(&mut self, id: RequestId) -> StoreResult<Option<Request>>;
    /// Insert a request
    async fn insert_request(&mut self, request: &Request) -> StoreResult<()>;
    /// Overwrite a request
    async fn update_request(&mut self, request: &Request) -> StoreResult<()>;
    /// Hard-delete a request
    async fn delete_request(&mut self, id: RequestId) -> StoreResult<()>;

    // ----- offers -----

    /// Read an offer without locking it
    async fn get_offer(&mut self, id: OfferId) -> StoreResult<Option<Offer>>;
    /// Read and lock an offer
    async fn lock_offer(&mut self, id: OfferId) -> StoreResult<Option<Offer>>;
    /// Read and lock every offer on a request, oldest first
    async fn lock_offers_for_request(&mut self, request_id: RequestId) -> StoreResult<Vec<Offer>>;
    /// Read every offer on a request, oldest first
    async fn list_offers_for_request(&mut self, request_id: RequestId) -> StoreResult<Vec<Offer>>;
    /// Insert an offer; one per (request, responder)
    async fn insert_offer(&mut self, offer: &Offer) -> StoreResult<()>;
    /// Overwrite an offer
    async fn update_offer(&mut self, offer: &Offer) -> StoreResult<()>;
    /// Hard-delete an offer
    async fn delete_offer(&mut self, id: OfferId) -> StoreResult<()>;

    // ----- appointments -----

    /// Serialize bookings for a profile until the transaction ends
    async fn lock_profile_schedule(&mut self, profile_id: UserId) -> StoreResult<()>;
    /// Appointments on a profile that block a slot (pending or confirmed)
    async fn blocking_appointments(&mut self, profile_id: UserId) -> StoreResult<Vec<Appointment>>;
    /// Read an appointment without locking it
    async fn get_appointment(&mut self, id: AppointmentId) -> StoreResult<Option<Appointment>>;
    /// Read and lock an appointment
    async fn lock_appointment(&mut self, id: AppointmentId) -> StoreResult<Option<Appointment>>;
    /// Insert an appointment; overlapping blocking appointments are rejected
    async fn insert_appointment(&mut self, appointment: &Appointment) -> StoreResult<()>;
    /// Overwrite an appointment; overlapping blocking appointments are rejected
    async fn update_appointment(&mut self, appointment: &Appointment) -> StoreResult<()>;

    // ----- payment intents -----

    /// Read an intent without locking it
    async fn get_intent(&mut self, id: PaymentIntentId) -> StoreResult<Option<PaymentIntent>>;
    /// Read and lock an intent
    async fn lock_intent(&mut self, id: PaymentIntentId) -> StoreResult<Option<PaymentIntent>>;
    /// Read and lock the intent carrying an external reference
    async fn lock_intent_by_external_ref(
        &mut self,
        processor: Processor,
        external_ref: &str,
    ) -> StoreResult<Option<PaymentIntent>>;
    /// Every intent referencing an offer, oldest first
    async fn intents_for_offer(&mut self, offer_id: OfferId) -> StoreResult<Vec<PaymentIntent>>;
    /// Insert an intent; at most one pending or processing intent per offer
    async fn insert_intent(&mut self, intent: &PaymentIntent) -> StoreResult<()>;
    /// Overwrite an intent; one intent per (processor, external reference)
    /// and at most one pending or processing intent per offer
    async fn update_intent(&mut self, intent: &PaymentIntent) -> StoreResult<()>;

    // ----- notifications -----

    /// Record a notification
    async fn insert_notification(&mut self, notification: &Notification) -> StoreResult<()>;
    /// A recipient's notifications, newest first
    async fn list_notifications(
        &mut self,
        recipient_id: UserId,
        unread_only: bool,
    ) -> StoreResult<Vec<Notification>>;
    /// Read and lock a notification
    async fn lock_notification(&mut self, id: NotificationId) -> StoreResult<Option<Notification>>;
    /// Set the read flag
    async fn mark_notification_read(&mut self, id: NotificationId) -> StoreResult<()>;

    // ----- discrepancies -----

    /// Record a discrepancy
    async fn insert_discrepancy(&mut self, discrepancy: &Discrepancy) -> StoreResult<()>;

    // ----- lifecycle -----

    /// Make every write visible atomically
    async fn commit(self: Box<Self>) -> StoreResult<()>;
    /// Discard every write
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
