//! In-memory store for tests and local development.
//!
//! Transactions are serialized behind one async mutex: `begin` takes the
//! guard and works on a copy of the tables, `commit` swaps the copy in. The
//! database constraints the PostgreSQL schema enforces are emulated on write.

use super::{MarketplaceStore, StoreError, StoreResult, StoreTransaction};
use crate::aggregates::schedule::overlaps;
use crate::types::{
    Appointment, AppointmentId, Discrepancy, Notification, NotificationId, Offer, OfferId,
    OfferStatus, PaymentIntent, PaymentIntentId, Processor, Profile, Request, RequestId, UserId,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
struct Tables {
    profiles: HashMap<UserId, Profile>,
    requests: HashMap<RequestId, Request>,
    offers: HashMap<OfferId, Offer>,
    appointments: HashMap<AppointmentId, Appointment>,
    intents: HashMap<PaymentIntentId, PaymentIntent>,
    notifications: HashMap<NotificationId, Notification>,
    discrepancies: Vec<Discrepancy>,
}

impl Tables {
    fn offers_for(&self, request_id: RequestId) -> Vec<Offer> {
        let mut offers: Vec<Offer> = self
            .offers
            .values()
            .filter(|offer| offer.request_id == request_id)
            .cloned()
            .collect();
        offers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        offers
    }

    fn check_offer_constraints(&self, offer: &Offer) -> StoreResult<()> {
        let clash = |other: &Offer| other.id != offer.id && other.request_id == offer.request_id;
        if self
            .offers
            .values()
            .any(|other| clash(other) && other.responder.user_id == offer.responder.user_id)
        {
            return Err(StoreError::UniqueViolation(
                "offers_request_responder_key".to_string(),
            ));
        }
        if offer.status == OfferStatus::Accepted
            && self
                .offers
                .values()
                .any(|other| clash(other) && other.status == OfferStatus::Accepted)
        {
            return Err(StoreError::UniqueViolation(
                "offers_one_accepted_per_request".to_string(),
            ));
        }
        Ok(())
    }

    fn check_appointment_constraints(&self, appointment: &Appointment) -> StoreResult<()> {
        if !appointment.status.blocks_slot() {
            return Ok(());
        }
        let overlapping = self.appointments.values().any(|other| {
            other.id != appointment.id
                && other.profile_id == appointment.profile_id
                && other.status.blocks_slot()
                && overlaps(
                    other.start_at,
                    other.end_at,
                    appointment.start_at,
                    appointment.end_at,
                )
        });
        if overlapping {
            return Err(StoreError::ExclusionViolation(
                "appointments_no_overlap".to_string(),
            ));
        }
        Ok(())
    }

    fn check_intent_constraints(&self, intent: &PaymentIntent) -> StoreResult<()> {
        if let Some(offer_id) = intent.metadata.offer_id.filter(|_| intent.status.is_in_flight()) {
            if self.intents.values().any(|other| {
                other.id != intent.id
                    && other.metadata.offer_id == Some(offer_id)
                    && other.status.is_in_flight()
            }) {
                return Err(StoreError::UniqueViolation(
                    "payment_intents_one_in_flight_per_offer".to_string(),
                ));
            }
        }
        let Some(external_ref) = intent.external_ref.as_deref() else {
            return Ok(());
        };
        if self.intents.values().any(|other| {
            other.id != intent.id
                && other.processor == intent.processor
                && other.external_ref.as_deref() == Some(external_ref)
        }) {
            return Err(StoreError::UniqueViolation(
                "payment_intents_external_ref_key".to_string(),
            ));
        }
        Ok(())
    }
}

/// Scripted commit failures: let `skip` commits through, then fail `fail`.
#[derive(Debug, Default)]
struct CommitFaults {
    skip: usize,
    fail: usize,
}

impl CommitFaults {
    fn next_commit_fails(&mut self) -> bool {
        if self.skip > 0 {
            self.skip -= 1;
            false
        } else if self.fail > 0 {
            self.fail -= 1;
            true
        } else {
            false
        }
    }
}

/// In-memory [`MarketplaceStore`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<SyncMutex<CommitFaults>>,
}

impl InMemoryStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail, discarding their writes.
    pub fn fail_next_commits(&self, count: usize) {
        self.fail_commits_after(0, count);
    }

    /// Let `skip` commits succeed, then fail the following `count`.
    pub fn fail_commits_after(&self, skip: usize, count: usize) {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        *faults = CommitFaults { skip, fail: count };
    }

    /// Every committed payment intent, oldest first.
    pub async fn intents(&self) -> Vec<PaymentIntent> {
        let tables = self.tables.lock().await;
        let mut intents: Vec<PaymentIntent> = tables.intents.values().cloned().collect();
        intents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        intents
    }
}

#[async_trait]
impl MarketplaceStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            working,
            faults: Arc::clone(&self.faults),
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn upsert_profile(&self, profile: &Profile) -> StoreResult<()> {
        self.tables
            .lock()
            .await
            .profiles
            .insert(profile.id, profile.clone());
        Ok(())
    }

    async fn discrepancies(&self) -> StoreResult<Vec<Discrepancy>> {
        let mut all = self.tables.lock().await.discrepancies.clone();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    faults: Arc<SyncMutex<CommitFaults>>,
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn get_profile(&mut self, id: UserId) -> StoreResult<Option<Profile>> {
        Ok(self.working.profiles.get(&id).cloned())
    }

    async fn get_request(&mut self, id: RequestId) -> StoreResult<Option<Request>> {
        Ok(self.working.requests.get(&id).cloned())
    }

    async fn lock_request(&mut self, id: RequestId) -> StoreResult<Option<Request>> {
        self.get_request(id).await
    }

    async fn insert_request(&mut self, request: &Request) -> StoreResult<()> {
        if self.working.requests.contains_key(&request.id) {
            return Err(StoreError::UniqueViolation("requests_pkey".to_string()));
        }
        self.working.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn update_request(&mut self, request: &Request) -> StoreResult<()> {
        let row = self
            .working
            .requests
            .get_mut(&request.id)
            .ok_or_else(|| StoreError::missing("request", request.id))?;
        *row = request.clone();
        Ok(())
    }

    async fn delete_request(&mut self, id: RequestId) -> StoreResult<()> {
        if self.working.offers.values().any(|offer| offer.request_id == id) {
            return Err(StoreError::Database(
                "request is still referenced by offers".to_string(),
            ));
        }
        self.working.requests.remove(&id);
        Ok(())
    }

    async fn get_offer(&mut self, id: OfferId) -> StoreResult<Option<Offer>> {
        Ok(self.working.offers.get(&id).cloned())
    }

    async fn lock_offer(&mut self, id: OfferId) -> StoreResult<Option<Offer>> {
        self.get_offer(id).await
    }

    async fn lock_offers_for_request(&mut self, request_id: RequestId) -> StoreResult<Vec<Offer>> {
        Ok(self.working.offers_for(request_id))
    }

    async fn list_offers_for_request(&mut self, request_id: RequestId) -> StoreResult<Vec<Offer>> {
        Ok(self.working.offers_for(request_id))
    }

    async fn insert_offer(&mut self, offer: &Offer) -> StoreResult<()> {
        if !self.working.requests.contains_key(&offer.request_id) {
            return Err(StoreError::missing("request", offer.request_id));
        }
        self.working.check_offer_constraints(offer)?;
        self.working.offers.insert(offer.id, offer.clone());
        Ok(())
    }

    async fn update_offer(&mut self, offer: &Offer) -> StoreResult<()> {
        if !self.working.offers.contains_key(&offer.id) {
            return Err(StoreError::missing("offer", offer.id));
        }
        self.working.check_offer_constraints(offer)?;
        self.working.offers.insert(offer.id, offer.clone());
        Ok(())
    }

    async fn delete_offer(&mut self, id: OfferId) -> StoreResult<()> {
        self.working.offers.remove(&id);
        for appointment in self.working.appointments.values_mut() {
            if appointment.offer_id == Some(id) {
                appointment.offer_id = None;
            }
        }
        Ok(())
    }

    async fn lock_profile_schedule(&mut self, _profile_id: UserId) -> StoreResult<()> {
        // The store-wide guard already serializes every transaction.
        Ok(())
    }

    async fn blocking_appointments(&mut self, profile_id: UserId) -> StoreResult<Vec<Appointment>> {
        let mut appointments: Vec<Appointment> = self
            .working
            .appointments
            .values()
            .filter(|a| a.profile_id == profile_id && a.status.blocks_slot())
            .cloned()
            .collect();
        appointments.sort_by_key(|a| a.start_at);
        Ok(appointments)
    }

    async fn get_appointment(&mut self, id: AppointmentId) -> StoreResult<Option<Appointment>> {
        Ok(self.working.appointments.get(&id).cloned())
    }

    async fn lock_appointment(&mut self, id: AppointmentId) -> StoreResult<Option<Appointment>> {
        self.get_appointment(id).await
    }

    async fn insert_appointment(&mut self, appointment: &Appointment) -> StoreResult<()> {
        if !self.working.profiles.contains_key(&appointment.profile_id) {
            return Err(StoreError::missing("profile", appointment.profile_id));
        }
        self.working.check_appointment_constraints(appointment)?;
        self.working
            .appointments
            .insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn update_appointment(&mut self, appointment: &Appointment) -> StoreResult<()> {
        if !self.working.appointments.contains_key(&appointment.id) {
            return Err(StoreError::missing("appointment", appointment.id));
        }
        self.working.check_appointment_constraints(appointment)?;
        self.working
            .appointments
            .insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn get_intent(&mut self, id: PaymentIntentId) -> StoreResult<Option<PaymentIntent>> {
        Ok(self.working.intents.get(&id).cloned())
    }

    async fn lock_intent(&mut self, id: PaymentIntentId) -> StoreResult<Option<PaymentIntent>> {
        self.get_intent(id).await
    }

    async fn lock_intent_by_external_ref(
        &mut self,
        processor: Processor,
        external_ref: &str,
    ) -> StoreResult<Option<PaymentIntent>> {
        Ok(self
            .working
            .intents
            .values()
            .find(|intent| {
                intent.processor == processor
                    && intent.external_ref.as_deref() == Some(external_ref)
            })
            .cloned())
    }

    async fn intents_for_offer(&mut self, offer_id: OfferId) -> StoreResult<Vec<PaymentIntent>> {
        let mut intents: Vec<PaymentIntent> = self
            .working
            .intents
            .values()
            .filter(|intent| intent.metadata.offer_id == Some(offer_id))
            .cloned()
            .collect();
        intents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(intents)
    }

    async fn insert_intent(&mut self, intent: &PaymentIntent) -> StoreResult<()> {
        self.working.check_intent_constraints(intent)?;
        self.working.intents.insert(intent.id, intent.clone());
        Ok(())
    }

    async fn update_intent(&mut self, intent: &PaymentIntent) -> StoreResult<()> {
        let existing = self
            .working
            .intents
            .get(&intent.id)
            .ok_or_else(|| StoreError::missing("payment intent", intent.id))?;
        if existing.external_ref.is_some() && existing.external_ref != intent.external_ref {
            return Err(StoreError::Database(
                "external_ref is immutable once set".to_string(),
            ));
        }
        self.working.check_intent_constraints(intent)?;
        self.working.intents.insert(intent.id, intent.clone());
        Ok(())
    }

    async fn insert_notification(&mut self, notification: &Notification) -> StoreResult<()> {
        self.working
            .notifications
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn list_notifications(
        &mut self,
        recipient_id: UserId,
        unread_only: bool,
    ) -> StoreResult<Vec<Notification>> {
        let mut notifications: Vec<Notification> = self
            .working
            .notifications
            .values()
            .filter(|n| n.recipient_id == recipient_id && (!unread_only || !n.read))
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    async fn lock_notification(&mut self, id: NotificationId) -> StoreResult<Option<Notification>> {
        Ok(self.working.notifications.get(&id).cloned())
    }

    async fn mark_notification_read(&mut self, id: NotificationId) -> StoreResult<()> {
        let row = self
            .working
            .notifications
            .get_mut(&id)
            .ok_or_else(|| StoreError::missing("notification", id))?;
        row.read = true;
        Ok(())
    }

    async fn insert_discrepancy(&mut self, discrepancy: &Discrepancy) -> StoreResult<()> {
        self.working.discrepancies.push(discrepancy.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let Self {
            mut guard,
            working,
            faults,
        } = *self;
        let injected = faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_commit_fails();
        if injected {
            return Err(StoreError::Database("injected commit failure".to_string()));
        }
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
