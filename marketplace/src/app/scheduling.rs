//! Appointment booking and rescheduling.
//!
//! Writes to one profile's calendar are serialized by the profile schedule
//! lock, taken before the blocking appointments are read. The reducer's
//! overlap check therefore sees every committed booking, and the store's
//! exclusion constraint backs it up.

use super::{count_notifications, record_notification};
use crate::aggregates::schedule::{
    find_conflict, AppointmentChanges, BookingDraft, LinkedOffer,
};
use crate::aggregates::{
    ScheduleAction, ScheduleEffect, ScheduleEnvironment, ScheduleError, ScheduleReducer,
    ScheduleState,
};
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::store::{MarketplaceStore, StoreTransaction};
use crate::types::{Appointment, AppointmentId, Caller, UserId};
use chrono::{DateTime, Utc};
use inkmatch_core::environment::Clock;
use inkmatch_core::reducer::{Effects, Reducer};
use std::sync::Arc;

/// Booking operations over profile calendars.
#[derive(Clone)]
pub struct SchedulingService {
    store: Arc<dyn MarketplaceStore>,
    reducer: ScheduleReducer,
    env: ScheduleEnvironment,
}

impl SchedulingService {
    /// Creates a new `SchedulingService`
    #[must_use]
    pub fn new(store: Arc<dyn MarketplaceStore>, env: ScheduleEnvironment) -> Self {
        Self {
            store,
            reducer: ScheduleReducer::new(),
            env,
        }
    }

    /// Lock `profile_id`'s calendar and load the slot-blocking appointments.
    async fn load_schedule(
        tx: &mut dyn StoreTransaction,
        profile_id: UserId,
    ) -> EngineResult<ScheduleState> {
        let profile = tx
            .get_profile(profile_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Profile", profile_id))?;
        tx.lock_profile_schedule(profile_id).await?;
        let appointments = tx.blocking_appointments(profile_id).await?;
        Ok(ScheduleState::new(profile, appointments))
    }

    fn reduce(
        &self,
        state: &mut ScheduleState,
        action: ScheduleAction,
    ) -> EngineResult<Effects<ScheduleEffect>> {
        self.reducer
            .reduce(state, action, &self.env)
            .map_err(|error| {
                if let ScheduleError::Conflict { conflicting, .. } = &error {
                    metrics::scheduling_conflict();
                    tracing::info!(conflicting_appointment_id = %conflicting, "Scheduling conflict");
                }
                error.into()
            })
    }

    async fn finish(
        &self,
        mut tx: Box<dyn StoreTransaction>,
        effects: Effects<ScheduleEffect>,
    ) -> EngineResult<()> {
        let now = self.env.clock.now();
        let mut notified = Vec::new();
        for effect in effects {
            match effect {
                ScheduleEffect::Notify(draft) => {
                    notified.push(record_notification(tx.as_mut(), draft, now).await?);
                }
            }
        }
        tx.commit().await?;
        count_notifications(&notified);
        Ok(())
    }

    /// Whether `[start, end)` overlaps a slot-blocking appointment on the profile.
    ///
    /// Advisory only; booking re-checks under the schedule lock.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::InvalidDuration`] when `end <= start`,
    /// [`ScheduleError::StartInPast`] when `start` is not in the future, or a
    /// store failure.
    #[tracing::instrument(skip(self))]
    pub async fn has_conflict(
        &self,
        profile_id: UserId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<AppointmentId>,
    ) -> EngineResult<bool> {
        if end <= start {
            return Err(ScheduleError::InvalidDuration.into());
        }
        if start <= self.env.clock.now() {
            return Err(ScheduleError::StartInPast.into());
        }

        let mut tx = self.store.begin().await?;
        let appointments = tx.blocking_appointments(profile_id).await?;
        tx.rollback().await?;
        Ok(find_conflict(&appointments, start, end, exclude).is_some())
    }

    /// Book a slot, optionally fulfilling an accepted offer.
    ///
    /// # Errors
    ///
    /// Validation failures, an overlap with an existing booking, an unknown
    /// profile, or a store failure.
    #[tracing::instrument(
        skip(self, draft),
        fields(client_id = %caller.user_id, profile_id = %draft.profile_id)
    )]
    pub async fn book(&self, caller: Caller, draft: BookingDraft) -> EngineResult<Appointment> {
        if draft.start_at <= self.env.clock.now() {
            return Err(ScheduleError::StartInPast.into());
        }

        let mut tx = self.store.begin().await?;
        let mut state = Self::load_schedule(tx.as_mut(), draft.profile_id).await?;
        if let Some(offer_id) = draft.offer_id {
            if let Some(offer) = tx.lock_offer(offer_id).await? {
                let client_id = tx
                    .get_request(offer.request_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("Request", offer.request_id))?
                    .client_id;
                state = state.with_linked_offer(LinkedOffer { offer, client_id });
            }
        }

        let appointment_id = AppointmentId::new();
        let effects = self.reduce(
            &mut state,
            ScheduleAction::Book {
                appointment_id,
                caller,
                draft,
            },
        )?;
        let appointment = state
            .appointment(appointment_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Appointment", appointment_id))?;
        tx.insert_appointment(&appointment).await?;
        self.finish(tx, effects).await?;

        metrics::appointment_event("booked");
        tracing::info!(%appointment_id, start_at = %appointment.start_at, "Appointment booked");
        Ok(appointment)
    }

    /// Reschedule, change status, or edit an appointment's service fields.
    ///
    /// # Errors
    ///
    /// Permission or transition failures, an overlap, not found, or a store
    /// failure.
    #[tracing::instrument(skip(self, changes), fields(user_id = %caller.user_id))]
    pub async fn update(
        &self,
        caller: Caller,
        appointment_id: AppointmentId,
        changes: AppointmentChanges,
    ) -> EngineResult<Appointment> {
        let mut tx = self.store.begin().await?;
        let profile_id = tx
            .get_appointment(appointment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Appointment", appointment_id))?
            .profile_id;
        let mut state = Self::load_schedule(tx.as_mut(), profile_id).await?;
        let current = tx
            .lock_appointment(appointment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Appointment", appointment_id))?;
        // Terminal appointments are not in the blocking set.
        match state.appointments.iter_mut().find(|a| a.id == appointment_id) {
            Some(slot) => *slot = current.clone(),
            None => state.appointments.push(current.clone()),
        }

        let effects = self.reduce(
            &mut state,
            ScheduleAction::Update {
                appointment_id,
                caller,
                changes,
            },
        )?;
        let appointment = state
            .appointment(appointment_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Appointment", appointment_id))?;
        if appointment != current {
            tx.update_appointment(&appointment).await?;
        }
        self.finish(tx, effects).await?;

        metrics::appointment_event(if appointment.status == current.status {
            "updated"
        } else {
            appointment.status.as_str()
        });
        tracing::info!(%appointment_id, status = %appointment.status, "Appointment updated");
        Ok(appointment)
    }

    /// Read an appointment as its client or its profile owner.
    ///
    /// # Errors
    ///
    /// Not found, forbidden, or a store failure.
    #[tracing::instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_appointment(
        &self,
        caller: Caller,
        appointment_id: AppointmentId,
    ) -> EngineResult<Appointment> {
        let mut tx = self.store.begin().await?;
        let appointment = tx
            .get_appointment(appointment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Appointment", appointment_id))?;
        tx.rollback().await?;

        if caller.user_id == appointment.client_id || caller.user_id == appointment.profile_id {
            Ok(appointment)
        } else {
            Err(EngineError::Forbidden(
                "Only the client or the booked profile can view this appointment",
            ))
        }
    }
}
