//! Appointment scheduling and conflict detection.
//!
//! The state is one profile plus every appointment that currently blocks a
//! slot on it (and the appointment being updated, if any), loaded while the
//! profile's schedule lock is held. Intervals are half-open: an appointment
//! ending at 14:00 does not conflict with one starting at 14:00.

use crate::types::{
    Appointment, AppointmentId, AppointmentStatus, Caller, NotificationDraft, NotificationType,
    Offer, OfferId, OfferStatus, Profile, UserId,
};
use chrono::{DateTime, Duration, Utc};
use inkmatch_core::environment::Clock;
use inkmatch_core::reducer::{Effects, Reducer};
use inkmatch_core::smallvec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// Conflict checking
// ============================================================================

/// Half-open interval overlap: `[a_start, a_end)` and `[b_start, b_end)`.
#[must_use]
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// First slot-blocking appointment overlapping `[start, end)`, ignoring `exclude`.
pub fn find_conflict<'a, I>(
    appointments: I,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude: Option<AppointmentId>,
) -> Option<&'a Appointment>
where
    I: IntoIterator<Item = &'a Appointment>,
{
    appointments.into_iter().find(|existing| {
        existing.status.blocks_slot()
            && Some(existing.id) != exclude
            && overlaps(existing.start_at, existing.end_at, start, end)
    })
}

// ============================================================================
// Inputs
// ============================================================================

/// A booking request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDraft {
    /// Profile to book
    pub profile_id: UserId,
    /// Interval start
    pub start_at: DateTime<Utc>,
    /// Length in minutes; defaults to the linked offer's estimate
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    /// Accepted offer this booking fulfils
    #[serde(default)]
    pub offer_id: Option<OfferId>,
    /// Kind of service
    #[serde(default)]
    pub service_type: Option<String>,
    /// Free-text description
    #[serde(default)]
    pub description: Option<String>,
    /// Free-text notes
    #[serde(default)]
    pub notes: Option<String>,
}

/// Changes to an existing appointment. `None` keeps the value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentChanges {
    /// New start
    pub start_at: Option<DateTime<Utc>>,
    /// New length in minutes
    pub duration_minutes: Option<i32>,
    /// New status
    pub status: Option<AppointmentStatus>,
    /// New service type
    pub service_type: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New notes
    pub notes: Option<String>,
}

impl AppointmentChanges {
    const fn moves_interval(&self) -> bool {
        self.start_at.is_some() || self.duration_minutes.is_some()
    }

    const fn is_empty(&self) -> bool {
        !self.moves_interval()
            && self.status.is_none()
            && self.service_type.is_none()
            && self.description.is_none()
            && self.notes.is_none()
    }
}

/// An accepted offer a booking is derived from, with its request's client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkedOffer {
    /// The offer
    pub offer: Offer,
    /// Client owning the offer's request
    pub client_id: UserId,
}

// ============================================================================
// Errors
// ============================================================================

/// Rejections produced by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// A required field is missing
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    /// Non-positive duration
    #[error("Duration must be positive")]
    InvalidDuration,
    /// Proposed start is not in the future
    #[error("Appointment date must be in the future")]
    StartInPast,
    /// Profile is inactive
    #[error("This profile is not accepting bookings")]
    ProfileInactive,
    /// Booking one's own profile
    #[error("You cannot book an appointment with yourself")]
    SelfBooking,
    /// Slot overlaps an existing appointment
    #[error("The requested time overlaps an existing appointment ({start} - {end})")]
    Conflict {
        /// Conflicting appointment
        conflicting: AppointmentId,
        /// Its start
        start: DateTime<Utc>,
        /// Its end
        end: DateTime<Utc>,
    },
    /// Appointment transition outside the table
    #[error("Cannot change status from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: AppointmentStatus,
        /// Requested status
        to: AppointmentStatus,
    },
    /// Terminal appointments cannot be modified
    #[error("A {0} appointment can no longer be modified")]
    AppointmentClosed(AppointmentStatus),
    /// Caller is neither client nor profile owner
    #[error("Only the client or the booked profile can do this")]
    NotParticipant,
    /// Only the profile owner may make this change
    #[error("Only the booked profile can set status {0}")]
    NotProfileOwner(AppointmentStatus),
    /// Linked offer unusable for this booking
    #[error("Offer {0} is not an accepted offer from this profile")]
    OfferNotBookable(OfferId),
    /// Linked offer belongs to another client
    #[error("Only the client who accepted this offer can book it")]
    OfferClientMismatch,
    /// Appointment not in the loaded schedule
    #[error("Appointment {0} not found")]
    AppointmentNotFound(AppointmentId),
    /// Update carried no changes
    #[error("No changes supplied")]
    NoChanges,
}

// ============================================================================
// State, actions, effects
// ============================================================================

/// A profile's blocking appointments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleState {
    /// Booked profile
    pub profile: Profile,
    /// Appointments currently blocking a slot, plus any update target
    pub appointments: Vec<Appointment>,
    /// Offer referenced by a booking, if any
    pub linked_offer: Option<LinkedOffer>,
}

impl ScheduleState {
    /// Creates a state snapshot
    #[must_use]
    pub const fn new(profile: Profile, appointments: Vec<Appointment>) -> Self {
        Self {
            profile,
            appointments,
            linked_offer: None,
        }
    }

    /// Attach the offer a booking refers to
    #[must_use]
    pub fn with_linked_offer(mut self, linked: LinkedOffer) -> Self {
        self.linked_offer = Some(linked);
        self
    }

    /// Looks up an appointment by id
    #[must_use]
    pub fn appointment(&self, id: AppointmentId) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }
}

/// Scheduling commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScheduleAction {
    /// Book a new appointment
    Book {
        /// Id for the new appointment
        appointment_id: AppointmentId,
        /// Caller
        caller: Caller,
        /// Booking details
        draft: BookingDraft,
    },
    /// Reschedule, change status, or edit service fields
    Update {
        /// Appointment
        appointment_id: AppointmentId,
        /// Caller
        caller: Caller,
        /// Changes
        changes: AppointmentChanges,
    },
}

/// Work the shell performs inside the same transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum ScheduleEffect {
    /// Record a notification
    Notify(NotificationDraft),
}

/// Environment dependencies for scheduling
#[derive(Clone)]
pub struct ScheduleEnvironment {
    /// Clock for "in the future" checks and timestamps
    pub clock: Arc<dyn Clock>,
}

impl ScheduleEnvironment {
    /// Creates a new `ScheduleEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Reject intervals that are not strictly in the future or have no length.
///
/// # Errors
///
/// [`ScheduleError::InvalidDuration`] or [`ScheduleError::StartInPast`].
pub fn validate_interval(
    start: DateTime<Utc>,
    duration_minutes: i32,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    if duration_minutes <= 0 {
        return Err(ScheduleError::InvalidDuration);
    }
    if start <= now {
        return Err(ScheduleError::StartInPast);
    }
    Ok(start + Duration::minutes(i64::from(duration_minutes)))
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for appointment scheduling
#[derive(Clone, Debug, Default)]
pub struct ScheduleReducer;

impl ScheduleReducer {
    /// Creates a new `ScheduleReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn ensure_free(
        state: &ScheduleState,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<AppointmentId>,
    ) -> Result<(), ScheduleError> {
        match find_conflict(&state.appointments, start, end, exclude) {
            Some(existing) => Err(ScheduleError::Conflict {
                conflicting: existing.id,
                start: existing.start_at,
                end: existing.end_at,
            }),
            None => Ok(()),
        }
    }

    fn book(
        state: &mut ScheduleState,
        appointment_id: AppointmentId,
        caller: Caller,
        draft: BookingDraft,
        now: DateTime<Utc>,
    ) -> Result<Effects<ScheduleEffect>, ScheduleError> {
        if caller.user_id == state.profile.id {
            return Err(ScheduleError::SelfBooking);
        }
        if !state.profile.active {
            return Err(ScheduleError::ProfileInactive);
        }

        let linked = match draft.offer_id {
            Some(offer_id) => {
                let linked = state
                    .linked_offer
                    .as_ref()
                    .filter(|linked| linked.offer.id == offer_id)
                    .ok_or(ScheduleError::OfferNotBookable(offer_id))?;
                if linked.client_id != caller.user_id {
                    return Err(ScheduleError::OfferClientMismatch);
                }
                if linked.offer.status != OfferStatus::Accepted
                    || linked.offer.responder.user_id != state.profile.id
                {
                    return Err(ScheduleError::OfferNotBookable(offer_id));
                }
                Some(&linked.offer)
            }
            None => None,
        };

        let duration = draft
            .duration_minutes
            .or_else(|| linked.map(|offer| offer.estimated_duration_minutes))
            .ok_or(ScheduleError::MissingField("duration_minutes"))?;
        let end = validate_interval(draft.start_at, duration, now)?;
        Self::ensure_free(state, draft.start_at, end, None)?;

        let appointment = Appointment {
            id: appointment_id,
            profile_id: state.profile.id,
            client_id: caller.user_id,
            offer_id: draft.offer_id,
            start_at: draft.start_at,
            end_at: end,
            status: AppointmentStatus::Pending,
            service_type: draft.service_type,
            description: draft.description,
            notes: draft.notes,
            created_at: now,
            updated_at: now,
        };
        let effect = ScheduleEffect::Notify(NotificationDraft {
            recipient_id: state.profile.id,
            sender_id: Some(caller.user_id),
            kind: NotificationType::AppointmentBooked,
            payload: json!({
                "appointment_id": appointment.id,
                "start_at": appointment.start_at,
                "end_at": appointment.end_at,
            }),
        });
        state.appointments.push(appointment);
        Ok(smallvec![effect])
    }

    fn update(
        state: &mut ScheduleState,
        appointment_id: AppointmentId,
        caller: Caller,
        changes: AppointmentChanges,
        now: DateTime<Utc>,
    ) -> Result<Effects<ScheduleEffect>, ScheduleError> {
        let index = state
            .appointments
            .iter()
            .position(|a| a.id == appointment_id)
            .ok_or(ScheduleError::AppointmentNotFound(appointment_id))?;
        let current = &state.appointments[index];

        let is_owner = caller.user_id == current.profile_id;
        if !is_owner && caller.user_id != current.client_id {
            return Err(ScheduleError::NotParticipant);
        }
        if changes.is_empty() {
            return Err(ScheduleError::NoChanges);
        }

        let mut status = current.status;
        if let Some(to) = changes.status {
            if !current.status.can_transition_to(to) {
                return Err(ScheduleError::InvalidTransition {
                    from: current.status,
                    to,
                });
            }
            if to != AppointmentStatus::Cancelled && !is_owner {
                return Err(ScheduleError::NotProfileOwner(to));
            }
            status = to;
        } else if !current.status.blocks_slot() {
            return Err(ScheduleError::AppointmentClosed(current.status));
        }

        let (mut start, mut end) = (current.start_at, current.end_at);
        if changes.moves_interval() {
            if !current.status.blocks_slot() {
                return Err(ScheduleError::AppointmentClosed(current.status));
            }
            start = changes.start_at.unwrap_or(current.start_at);
            let minutes = match changes.duration_minutes {
                Some(minutes) => minutes,
                None => i32::try_from(current.duration().num_minutes())
                    .map_err(|_| ScheduleError::InvalidDuration)?,
            };
            end = validate_interval(start, minutes, now)?;
            if status.blocks_slot() {
                Self::ensure_free(state, start, end, Some(appointment_id))?;
            }
        }

        let appointment = &mut state.appointments[index];
        appointment.status = status;
        appointment.start_at = start;
        appointment.end_at = end;
        if changes.service_type.is_some() {
            appointment.service_type = changes.service_type;
        }
        if changes.description.is_some() {
            appointment.description = changes.description;
        }
        if changes.notes.is_some() {
            appointment.notes = changes.notes;
        }
        appointment.updated_at = now;

        Ok(smallvec![ScheduleEffect::Notify(NotificationDraft {
            recipient_id: appointment.counterpart_of(caller.user_id),
            sender_id: Some(caller.user_id),
            kind: NotificationType::AppointmentUpdated,
            payload: json!({
                "appointment_id": appointment.id,
                "status": appointment.status,
                "start_at": appointment.start_at,
                "end_at": appointment.end_at,
            }),
        })])
    }
}

impl Reducer for ScheduleReducer {
    type State = ScheduleState;
    type Action = ScheduleAction;
    type Environment = ScheduleEnvironment;
    type Effect = ScheduleEffect;
    type Error = ScheduleError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<Effects<Self::Effect>, Self::Error> {
        let now = env.clock.now();
        match action {
            ScheduleAction::Book {
                appointment_id,
                caller,
                draft,
            } => Self::book(state, appointment_id, caller, draft, now),
            ScheduleAction::Update {
                appointment_id,
                caller,
                changes,
            } => Self::update(state, appointment_id, caller, changes, now),
        }
    }
}
