//! Engine-level error aggregation.
//!
//! Every service operation returns [`EngineError`]. Reducer rejections keep
//! their typed variants; the API layer maps each one onto a status code and a
//! stable code string.

use crate::aggregates::{NegotiationError, PaymentError, ScheduleError};
use crate::store::StoreError;

/// Stable error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed, missing or out-of-range input
    Validation,
    /// Caller lacks the required relationship
    Authorization,
    /// Referenced entity does not exist
    NotFound,
    /// Overlap, duplicate or illegal transition
    Conflict,
    /// External processor failed or timed out
    ExternalDependency,
    /// Unexpected persistence failure
    Integrity,
}

impl ErrorKind {
    /// Label used in logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::ExternalDependency => "external_dependency",
            Self::Integrity => "integrity",
        }
    }
}

/// Result type for service operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by service operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Negotiation rejection
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    /// Scheduling rejection
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    /// Payment rejection or processor failure
    #[error(transparent)]
    Payment(#[from] PaymentError),
    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Referenced entity is missing
    #[error("{entity} with id {id} not found")]
    NotFound {
        /// Entity name
        entity: &'static str,
        /// Identifier
        id: String,
    },
    /// Caller may not see or touch the entity
    #[error("{0}")]
    Forbidden(&'static str),
    /// The external charge exists but could not be recorded locally
    #[error("Payment {intent_id} could not be recorded: {reason}")]
    Discrepancy {
        /// Intent involved
        intent_id: String,
        /// Underlying failure
        reason: String,
    },
}

impl EngineError {
    /// Construct a not-found error
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// The stable classification of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Negotiation(error) => negotiation_kind(error),
            Self::Schedule(error) => schedule_kind(error),
            Self::Payment(error) => payment_kind(error),
            Self::Store(error) => match error {
                StoreError::UniqueViolation(_) | StoreError::ExclusionViolation(_) => {
                    ErrorKind::Conflict
                }
                StoreError::Missing { .. } | StoreError::Corrupt(_) | StoreError::Database(_) => {
                    ErrorKind::Integrity
                }
            },
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Authorization,
            Self::Discrepancy { .. } => ErrorKind::Integrity,
        }
    }
}

const fn negotiation_kind(error: &NegotiationError) -> ErrorKind {
    use NegotiationError as E;
    match error {
        E::MissingField(_)
        | E::InvalidBudget
        | E::InvalidOffer(_)
        | E::RequestNotOpen
        | E::RequestInactive
        | E::SelfOffer
        | E::AmbiguousUpdate
        | E::StatusNotSettable(_) => ErrorKind::Validation,
        E::ClientsOnly
        | E::RespondersOnly
        | E::NotTargetedResponder
        | E::ClientMismatch
        | E::NotResponder
        | E::NotParticipant => ErrorKind::Authorization,
        E::DuplicateOffer
        | E::InvalidTransition { .. }
        | E::InvalidRequestTransition { .. }
        | E::RequestClosed(_)
        | E::OfferNotEditable => ErrorKind::Conflict,
        E::OfferNotFound(_) => ErrorKind::NotFound,
    }
}

const fn schedule_kind(error: &ScheduleError) -> ErrorKind {
    use ScheduleError as E;
    match error {
        E::MissingField(_)
        | E::InvalidDuration
        | E::StartInPast
        | E::ProfileInactive
        | E::SelfBooking
        | E::OfferNotBookable(_)
        | E::NoChanges => ErrorKind::Validation,
        E::NotParticipant | E::NotProfileOwner(_) | E::OfferClientMismatch => {
            ErrorKind::Authorization
        }
        E::Conflict { .. } | E::InvalidTransition { .. } | E::AppointmentClosed(_) => {
            ErrorKind::Conflict
        }
        E::AppointmentNotFound(_) => ErrorKind::NotFound,
    }
}

const fn payment_kind(error: &PaymentError) -> ErrorKind {
    use PaymentError as E;
    match error {
        E::AmountBelowMinimum { .. } | E::InvalidCurrency(_) | E::ResponderMismatch => {
            ErrorKind::Validation
        }
        E::ClientMismatch | E::InvalidSignature => ErrorKind::Authorization,
        E::OfferNotPayable(_)
        | E::PaymentInFlight { .. }
        | E::IntentNotPending(_)
        | E::ExternalRefAlreadySet => ErrorKind::Conflict,
        E::UnknownExternalRef { .. } => ErrorKind::NotFound,
        E::Processor(_) => ErrorKind::ExternalDependency,
    }
}
