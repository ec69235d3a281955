//! Negotiation state machine.
//!
//! Governs the request and offer lifecycle. The state is one request together
//! with every offer made against it, loaded under the request's row lock, so
//! the accept cascade (reject pending siblings, move the request to
//! `in_progress`, notify the responder) is decided and persisted as one unit.

use crate::types::{
    budget_is_valid, AvailabilityWindow, Caller, Money, NotificationDraft, NotificationType, Offer,
    OfferId, OfferStatus, Request, RequestId, RequestStatus, Responder, Role, UserId,
};
use chrono::{DateTime, Utc};
use inkmatch_core::environment::Clock;
use inkmatch_core::reducer::{Effects, Reducer};
use inkmatch_core::smallvec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// Inputs
// ============================================================================

/// Fields a client supplies when opening a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDraft {
    /// Short title
    pub title: String,
    /// Free-text description
    pub description: String,
    /// Tattoo style
    #[serde(default)]
    pub style: String,
    /// Size
    #[serde(default)]
    pub size: String,
    /// Body placement
    #[serde(default)]
    pub placement: String,
    /// Lower budget bound
    #[serde(default)]
    pub budget_min: Option<Money>,
    /// Upper budget bound
    #[serde(default)]
    pub budget_max: Option<Money>,
    /// Restrict responses to one artist or studio
    #[serde(default)]
    pub target: Option<Responder>,
    /// Optional deadline
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

/// Descriptive request fields a client may revise. `None` keeps the value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestChanges {
    /// New title
    pub title: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New style
    pub style: Option<String>,
    /// New size
    pub size: Option<String>,
    /// New placement
    pub placement: Option<String>,
    /// New lower bound
    pub budget_min: Option<Money>,
    /// New upper bound
    pub budget_max: Option<Money>,
    /// New deadline
    pub deadline: Option<DateTime<Utc>>,
}

/// Fields a responder supplies when offering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferDraft {
    /// Message to the client
    pub message: String,
    /// Proposed price
    pub price: Money,
    /// Proposed session length in minutes
    pub estimated_duration_minutes: i32,
    /// Optional availability window
    #[serde(default)]
    pub availability: Option<AvailabilityWindow>,
}

/// Offer content a responder may revise while the offer is pending.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferChanges {
    /// New message
    pub message: Option<String>,
    /// New price
    pub price: Option<Money>,
    /// New duration in minutes
    pub estimated_duration_minutes: Option<i32>,
    /// New availability window
    pub availability: Option<AvailabilityWindow>,
}

impl OfferChanges {
    /// No field set
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.message.is_none()
            && self.price.is_none()
            && self.estimated_duration_minutes.is_none()
            && self.availability.is_none()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Rejections produced by the negotiation state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// A required field is empty
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    /// `budget_min > budget_max`, or a negative bound
    #[error("Invalid budget range: budget_min must not exceed budget_max")]
    InvalidBudget,
    /// Offer content failed validation
    #[error("Invalid offer: {0}")]
    InvalidOffer(&'static str),
    /// Only clients open requests
    #[error("Only clients can create requests")]
    ClientsOnly,
    /// Only artists and studios respond
    #[error("Only artists and studios can submit offers")]
    RespondersOnly,
    /// The request is not open
    #[error("This request is no longer accepting offers")]
    RequestNotOpen,
    /// The request has been soft-deleted
    #[error("This request has been deleted")]
    RequestInactive,
    /// Responder owns the request
    #[error("You cannot make an offer on your own request")]
    SelfOffer,
    /// The request targets someone else
    #[error("This request is targeted at a different artist or studio")]
    NotTargetedResponder,
    /// The responder already offered
    #[error("You have already made an offer on this request")]
    DuplicateOffer,
    /// The caller is not the request's client
    #[error("Only the client who owns this request can do this")]
    ClientMismatch,
    /// The caller is not the offer's responder
    #[error("Only the responder who made this offer can do this")]
    NotResponder,
    /// The caller is neither the client nor the responder
    #[error("Only the client or the responder can do this")]
    NotParticipant,
    /// Offer transition outside the table
    #[error("Cannot change status from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: OfferStatus,
        /// Requested status
        to: OfferStatus,
    },
    /// Request transition outside its lifecycle
    #[error("Cannot change request status from {from} to {to}")]
    InvalidRequestTransition {
        /// Current status
        from: RequestStatus,
        /// Requested status
        to: RequestStatus,
    },
    /// Request no longer editable
    #[error("A {0} request can no longer be modified")]
    RequestClosed(RequestStatus),
    /// Offer content is frozen once the offer leaves pending
    #[error("Only pending offers can be modified or deleted")]
    OfferNotEditable,
    /// Offer not part of the loaded request
    #[error("Offer {0} not found")]
    OfferNotFound(OfferId),
    /// A status change and a content change in one update
    #[error("An offer update changes either its status or its content, not both")]
    AmbiguousUpdate,
    /// Request statuses other than cancelled follow the offer workflow
    #[error("Request status {0} cannot be set directly")]
    StatusNotSettable(RequestStatus),
}

// ============================================================================
// State, actions, effects
// ============================================================================

/// One request and all of its offers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiationState {
    /// The request
    pub request: Request,
    /// Every offer against it
    pub offers: Vec<Offer>,
}

impl NegotiationState {
    /// Creates a state snapshot
    #[must_use]
    pub const fn new(request: Request, offers: Vec<Offer>) -> Self {
        Self { request, offers }
    }

    /// Looks up an offer by id
    #[must_use]
    pub fn offer(&self, id: OfferId) -> Option<&Offer> {
        self.offers.iter().find(|offer| offer.id == id)
    }

    fn offer_index(&self, id: OfferId) -> Result<usize, NegotiationError> {
        self.offers
            .iter()
            .position(|offer| offer.id == id)
            .ok_or(NegotiationError::OfferNotFound(id))
    }

    /// The accepted offer, if any
    #[must_use]
    pub fn accepted_offer(&self) -> Option<&Offer> {
        self.offers
            .iter()
            .find(|offer| offer.status == OfferStatus::Accepted)
    }
}

/// Negotiation commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NegotiationAction {
    /// Revise descriptive request fields
    ReviseRequest {
        /// Caller
        caller: Caller,
        /// Changes
        changes: RequestChanges,
    },
    /// Cancel the request, closing its open offers
    CancelRequest {
        /// Caller
        caller: Caller,
    },
    /// Delete the request: hard delete without offers, soft delete otherwise
    RetireRequest {
        /// Caller
        caller: Caller,
    },
    /// Submit an offer
    SubmitOffer {
        /// Id for the new offer
        offer_id: OfferId,
        /// Caller
        caller: Caller,
        /// Offer content
        draft: OfferDraft,
    },
    /// Move an offer through its transition table
    ChangeOfferStatus {
        /// Offer
        offer_id: OfferId,
        /// Caller
        caller: Caller,
        /// Target status
        to: OfferStatus,
    },
    /// Revise a pending offer's content
    ReviseOffer {
        /// Offer
        offer_id: OfferId,
        /// Caller
        caller: Caller,
        /// Changes
        changes: OfferChanges,
    },
    /// Hard-delete a pending offer
    DeleteOffer {
        /// Offer
        offer_id: OfferId,
        /// Caller
        caller: Caller,
    },
}

/// Work the shell performs inside the same transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum NegotiationEffect {
    /// Record a notification
    Notify(NotificationDraft),
    /// Remove an offer row
    DeleteOffer(OfferId),
    /// Remove the request row
    DeleteRequest(RequestId),
}

/// Environment dependencies for negotiation
#[derive(Clone)]
pub struct NegotiationEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
}

impl NegotiationEnvironment {
    /// Creates a new `NegotiationEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

// ============================================================================
// Request creation
// ============================================================================

/// Validate a draft and build an open request owned by `caller`.
///
/// # Errors
///
/// [`NegotiationError::ClientsOnly`] for non-client callers,
/// [`NegotiationError::MissingField`] for an empty title or description, and
/// [`NegotiationError::InvalidBudget`] for an inverted or negative range.
pub fn open_request(
    id: RequestId,
    caller: Caller,
    draft: RequestDraft,
    now: DateTime<Utc>,
) -> Result<Request, NegotiationError> {
    if caller.role != Role::Client {
        return Err(NegotiationError::ClientsOnly);
    }
    if draft.title.trim().is_empty() {
        return Err(NegotiationError::MissingField("title"));
    }
    if draft.description.trim().is_empty() {
        return Err(NegotiationError::MissingField("description"));
    }
    validate_budget(draft.budget_min, draft.budget_max)?;

    Ok(Request {
        id,
        client_id: caller.user_id,
        target: draft.target,
        title: draft.title,
        description: draft.description,
        style: draft.style,
        size: draft.size,
        placement: draft.placement,
        budget_min: draft.budget_min,
        budget_max: draft.budget_max,
        deadline: draft.deadline,
        status: RequestStatus::Open,
        active: true,
        created_at: now,
        updated_at: now,
    })
}

fn validate_budget(min: Option<Money>, max: Option<Money>) -> Result<(), NegotiationError> {
    let negative = [min, max]
        .into_iter()
        .flatten()
        .any(|bound| bound.cents() < 0);
    if negative || !budget_is_valid(min, max) {
        return Err(NegotiationError::InvalidBudget);
    }
    Ok(())
}

fn validate_offer_content(
    message: &str,
    price: Money,
    duration_minutes: i32,
    availability: Option<&AvailabilityWindow>,
) -> Result<(), NegotiationError> {
    if message.trim().is_empty() {
        return Err(NegotiationError::MissingField("message"));
    }
    if !price.is_positive() {
        return Err(NegotiationError::InvalidOffer("price must be positive"));
    }
    if duration_minutes <= 0 {
        return Err(NegotiationError::InvalidOffer(
            "estimated duration must be positive",
        ));
    }
    if availability.is_some_and(|window| window.start >= window.end) {
        return Err(NegotiationError::InvalidOffer(
            "availability window must end after it starts",
        ));
    }
    Ok(())
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the negotiation state machine
#[derive(Clone, Debug, Default)]
pub struct NegotiationReducer;

impl NegotiationReducer {
    /// Creates a new `NegotiationReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn ensure_owner(request: &Request, caller: Caller) -> Result<(), NegotiationError> {
        if request.client_id == caller.user_id {
            Ok(())
        } else {
            Err(NegotiationError::ClientMismatch)
        }
    }

    fn ensure_active(request: &Request) -> Result<(), NegotiationError> {
        if request.active {
            Ok(())
        } else {
            Err(NegotiationError::RequestInactive)
        }
    }

    fn notify(
        recipient: UserId,
        sender: UserId,
        kind: NotificationType,
        request: &Request,
        offer: &Offer,
    ) -> NegotiationEffect {
        NegotiationEffect::Notify(NotificationDraft {
            recipient_id: recipient,
            sender_id: Some(sender),
            kind,
            payload: json!({
                "request_id": request.id,
                "request_title": request.title,
                "offer_id": offer.id,
                "price": offer.price,
            }),
        })
    }

    fn revise_request(
        state: &mut NegotiationState,
        caller: Caller,
        changes: RequestChanges,
        now: DateTime<Utc>,
    ) -> Result<Effects<NegotiationEffect>, NegotiationError> {
        let request = &mut state.request;
        Self::ensure_owner(request, caller)?;
        Self::ensure_active(request)?;
        if request.status.is_terminal() {
            return Err(NegotiationError::RequestClosed(request.status));
        }
        if changes.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(NegotiationError::MissingField("title"));
        }
        if changes
            .description
            .as_deref()
            .is_some_and(|d| d.trim().is_empty())
        {
            return Err(NegotiationError::MissingField("description"));
        }
        let budget_min = changes.budget_min.or(request.budget_min);
        let budget_max = changes.budget_max.or(request.budget_max);
        validate_budget(budget_min, budget_max)?;

        if let Some(title) = changes.title {
            request.title = title;
        }
        if let Some(description) = changes.description {
            request.description = description;
        }
        if let Some(style) = changes.style {
            request.style = style;
        }
        if let Some(size) = changes.size {
            request.size = size;
        }
        if let Some(placement) = changes.placement {
            request.placement = placement;
        }
        if changes.deadline.is_some() {
            request.deadline = changes.deadline;
        }
        request.budget_min = budget_min;
        request.budget_max = budget_max;
        request.updated_at = now;
        Ok(Effects::new())
    }

    fn cancel_request(
        state: &mut NegotiationState,
        caller: Caller,
        now: DateTime<Utc>,
    ) -> Result<Effects<NegotiationEffect>, NegotiationError> {
        Self::ensure_owner(&state.request, caller)?;
        Self::ensure_active(&state.request)?;
        if state.request.status.is_terminal() {
            return Err(NegotiationError::InvalidRequestTransition {
                from: state.request.status,
                to: RequestStatus::Cancelled,
            });
        }

        for offer in &mut state.offers {
            let closed = match offer.status {
                OfferStatus::Pending => OfferStatus::Rejected,
                OfferStatus::Accepted => OfferStatus::Cancelled,
                _ => continue,
            };
            offer.status = closed;
            offer.updated_at = now;
        }
        state.request.status = RequestStatus::Cancelled;
        state.request.updated_at = now;
        Ok(Effects::new())
    }

    fn retire_request(
        state: &mut NegotiationState,
        caller: Caller,
        now: DateTime<Utc>,
    ) -> Result<Effects<NegotiationEffect>, NegotiationError> {
        Self::ensure_owner(&state.request, caller)?;
        Self::ensure_active(&state.request)?;

        if state.offers.is_empty() {
            return Ok(smallvec![NegotiationEffect::DeleteRequest(state.request.id)]);
        }

        // Offers keep pointing at the row, so it stays as a tombstone.
        for offer in &mut state.offers {
            if offer.status == OfferStatus::Pending {
                offer.status = OfferStatus::Rejected;
                offer.updated_at = now;
            }
        }
        state.request.active = false;
        state.request.updated_at = now;
        Ok(Effects::new())
    }

    fn submit_offer(
        state: &mut NegotiationState,
        offer_id: OfferId,
        caller: Caller,
        draft: OfferDraft,
        now: DateTime<Utc>,
    ) -> Result<Effects<NegotiationEffect>, NegotiationError> {
        let responder = caller
            .as_responder()
            .ok_or(NegotiationError::RespondersOnly)?;
        let request = &state.request;

        if !request.active || request.status != RequestStatus::Open {
            return Err(NegotiationError::RequestNotOpen);
        }
        if responder.user_id == request.client_id {
            return Err(NegotiationError::SelfOffer);
        }
        if request.target.is_some_and(|target| target != responder) {
            return Err(NegotiationError::NotTargetedResponder);
        }
        if state
            .offers
            .iter()
            .any(|offer| offer.responder.user_id == responder.user_id)
        {
            return Err(NegotiationError::DuplicateOffer);
        }
        validate_offer_content(
            &draft.message,
            draft.price,
            draft.estimated_duration_minutes,
            draft.availability.as_ref(),
        )?;

        let offer = Offer {
            id: offer_id,
            request_id: request.id,
            responder,
            message: draft.message,
            price: draft.price,
            estimated_duration_minutes: draft.estimated_duration_minutes,
            availability: draft.availability,
            status: OfferStatus::Pending,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        let effect = Self::notify(
            request.client_id,
            responder.user_id,
            NotificationType::NewOffer,
            request,
            &offer,
        );
        state.offers.push(offer);
        Ok(smallvec![effect])
    }

    fn change_offer_status(
        state: &mut NegotiationState,
        offer_id: OfferId,
        caller: Caller,
        to: OfferStatus,
        now: DateTime<Utc>,
    ) -> Result<Effects<NegotiationEffect>, NegotiationError> {
        let index = state.offer_index(offer_id)?;
        let from = state.offers[index].status;

        // The table is checked before identity: an illegal move is illegal for everyone.
        if !from.can_transition_to(to) {
            return Err(NegotiationError::InvalidTransition { from, to });
        }

        let client_id = state.request.client_id;
        let responder_id = state.offers[index].responder.user_id;
        let is_client = caller.user_id == client_id;
        let is_responder = caller.user_id == responder_id;

        let mut effects = Effects::new();
        match to {
            OfferStatus::Accepted => {
                if !is_client {
                    return Err(NegotiationError::ClientMismatch);
                }
                Self::ensure_active(&state.request)?;
                if state.request.status != RequestStatus::Open
                    || state.accepted_offer().is_some()
                {
                    return Err(NegotiationError::RequestNotOpen);
                }

                for (position, sibling) in state.offers.iter_mut().enumerate() {
                    if position != index && sibling.status == OfferStatus::Pending {
                        sibling.status = OfferStatus::Rejected;
                        sibling.updated_at = now;
                    }
                }
                state.request.status = RequestStatus::InProgress;
                state.request.updated_at = now;
                effects.push(Self::notify(
                    responder_id,
                    client_id,
                    NotificationType::OfferAccepted,
                    &state.request,
                    &state.offers[index],
                ));
            }
            OfferStatus::Rejected => {
                if !is_client {
                    return Err(NegotiationError::ClientMismatch);
                }
                effects.push(Self::notify(
                    responder_id,
                    client_id,
                    NotificationType::OfferRejected,
                    &state.request,
                    &state.offers[index],
                ));
            }
            OfferStatus::Withdrawn => {
                if !is_responder {
                    return Err(NegotiationError::NotResponder);
                }
                effects.push(Self::notify(
                    client_id,
                    responder_id,
                    NotificationType::OfferWithdrawn,
                    &state.request,
                    &state.offers[index],
                ));
            }
            OfferStatus::Completed => {
                if !is_client && !is_responder {
                    return Err(NegotiationError::NotParticipant);
                }
                if state.request.status != RequestStatus::InProgress {
                    return Err(NegotiationError::InvalidRequestTransition {
                        from: state.request.status,
                        to: RequestStatus::Completed,
                    });
                }
                state.request.status = RequestStatus::Completed;
                state.request.updated_at = now;
            }
            OfferStatus::Cancelled => {
                if !is_client && !is_responder {
                    return Err(NegotiationError::NotParticipant);
                }
            }
            OfferStatus::Pending => {
                return Err(NegotiationError::InvalidTransition { from, to });
            }
        }

        let offer = &mut state.offers[index];
        offer.status = to;
        offer.updated_at = now;
        Ok(effects)
    }

    fn revise_offer(
        state: &mut NegotiationState,
        offer_id: OfferId,
        caller: Caller,
        changes: OfferChanges,
        now: DateTime<Utc>,
    ) -> Result<Effects<NegotiationEffect>, NegotiationError> {
        let index = state.offer_index(offer_id)?;
        let offer = &state.offers[index];
        if offer.responder.user_id != caller.user_id {
            return Err(NegotiationError::NotResponder);
        }
        if offer.status != OfferStatus::Pending {
            return Err(NegotiationError::OfferNotEditable);
        }

        let message = changes.message.unwrap_or_else(|| offer.message.clone());
        let price = changes.price.unwrap_or(offer.price);
        let duration = changes
            .estimated_duration_minutes
            .unwrap_or(offer.estimated_duration_minutes);
        let availability = changes.availability.or(offer.availability);
        validate_offer_content(&message, price, duration, availability.as_ref())?;

        let offer = &mut state.offers[index];
        offer.message = message;
        offer.price = price;
        offer.estimated_duration_minutes = duration;
        offer.availability = availability;
        offer.updated_at = now;
        Ok(Effects::new())
    }

    fn delete_offer(
        state: &mut NegotiationState,
        offer_id: OfferId,
        caller: Caller,
    ) -> Result<Effects<NegotiationEffect>, NegotiationError> {
        let index = state.offer_index(offer_id)?;
        let offer = &state.offers[index];
        if offer.responder.user_id != caller.user_id {
            return Err(NegotiationError::NotResponder);
        }
        if offer.status != OfferStatus::Pending {
            return Err(NegotiationError::OfferNotEditable);
        }
        state.offers.remove(index);
        Ok(smallvec![NegotiationEffect::DeleteOffer(offer_id)])
    }
}

impl Reducer for NegotiationReducer {
    type State = NegotiationState;
    type Action = NegotiationAction;
    type Environment = NegotiationEnvironment;
    type Effect = NegotiationEffect;
    type Error = NegotiationError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<Effects<Self::Effect>, Self::Error> {
        let now = env.clock.now();
        match action {
            NegotiationAction::ReviseRequest { caller, changes } => {
                Self::revise_request(state, caller, changes, now)
            }
            NegotiationAction::CancelRequest { caller } => Self::cancel_request(state, caller, now),
            NegotiationAction::RetireRequest { caller } => Self::retire_request(state, caller, now),
            NegotiationAction::SubmitOffer {
                offer_id,
                caller,
                draft,
            } => Self::submit_offer(state, offer_id, caller, draft, now),
            NegotiationAction::ChangeOfferStatus {
                offer_id,
                caller,
                to,
            } => Self::change_offer_status(state, offer_id, caller, to, now),
            NegotiationAction::ReviseOffer {
                offer_id,
                caller,
                changes,
            } => Self::revise_offer(state, offer_id, caller, changes, now),
            NegotiationAction::DeleteOffer { offer_id, caller } => {
                Self::delete_offer(state, offer_id, caller)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use inkmatch_core::environment::Clock;
    use inkmatch_testing::{assertions, test_clock, ReducerTest};

    fn env() -> NegotiationEnvironment {
        NegotiationEnvironment::new(Arc::new(test_clock()))
    }

    fn client() -> Caller {
        Caller::new(UserId::new(), Role::Client)
    }

    fn artist() -> Caller {
        Caller::new(UserId::new(), Role::Artist)
    }

    fn draft() -> RequestDraft {
        RequestDraft {
            title: "Koi sleeve".to_string(),
            description: "Full sleeve, japanese style".to_string(),
            style: "japanese".to_string(),
            budget_min: Some(Money::from_cents(50_000)),
            budget_max: Some(Money::from_cents(150_000)),
            ..RequestDraft::default()
        }
    }

    fn offer_draft() -> OfferDraft {
        OfferDraft {
            message: "Happy to do this".to_string(),
            price: Money::from_cents(90_000),
            estimated_duration_minutes: 240,
            availability: None,
        }
    }

    fn request_for(owner: Caller) -> Request {
        open_request(RequestId::new(), owner, draft(), test_clock().now()).unwrap()
    }

    fn pending_offer(request: &Request, responder: Caller) -> Offer {
        Offer {
            id: OfferId::new(),
            request_id: request.id,
            responder: responder.as_responder().unwrap(),
            message: "Offer".to_string(),
            price: Money::from_cents(80_000),
            estimated_duration_minutes: 180,
            availability: None,
            status: OfferStatus::Pending,
            paid_at: None,
            created_at: test_clock().now(),
            updated_at: test_clock().now(),
        }
    }

    #[test]
    fn test_inverted_budget_is_rejected() {
        let result = open_request(
            RequestId::new(),
            client(),
            RequestDraft {
                budget_min: Some(Money::from_cents(100)),
                budget_max: Some(Money::from_cents(50)),
                ..draft()
            },
            test_clock().now(),
        );
        assert_eq!(result, Err(NegotiationError::InvalidBudget));
    }

    #[test]
    fn test_only_clients_open_requests() {
        let result = open_request(RequestId::new(), artist(), draft(), test_clock().now());
        assert_eq!(result, Err(NegotiationError::ClientsOnly));
    }

    #[test]
    fn test_submit_offer_notifies_client() {
        let owner = client();
        let responder = artist();
        let request = request_for(owner);
        let offer_id = OfferId::new();

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, Vec::new()))
            .when_action(NegotiationAction::SubmitOffer {
                offer_id,
                caller: responder,
                draft: offer_draft(),
            })
            .then_state(move |state| {
                let offer = state.offer(offer_id).unwrap();
                assert_eq!(offer.status, OfferStatus::Pending);
                assert_eq!(offer.responder.user_id, responder.user_id);
            })
            .then_effects(move |effects| {
                assertions::assert_effects_count(effects, 1);
                match &effects[0] {
                    NegotiationEffect::Notify(draft) => {
                        assert_eq!(draft.recipient_id, owner.user_id);
                        assert_eq!(draft.kind, NotificationType::NewOffer);
                    }
                    other => panic!("unexpected effect {other:?}"),
                }
            })
            .run();
    }

    #[test]
    fn test_duplicate_offer_is_rejected() {
        let owner = client();
        let responder = artist();
        let request = request_for(owner);
        let existing = pending_offer(&request, responder);

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, vec![existing]))
            .when_action(NegotiationAction::SubmitOffer {
                offer_id: OfferId::new(),
                caller: responder,
                draft: offer_draft(),
            })
            .then_error(|error| assert_eq!(*error, NegotiationError::DuplicateOffer))
            .run();
    }

    #[test]
    fn test_self_offer_is_rejected() {
        let owner = Caller::new(UserId::new(), Role::Client);
        let same_user_as_artist = Caller::new(owner.user_id, Role::Artist);

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request_for(owner), Vec::new()))
            .when_action(NegotiationAction::SubmitOffer {
                offer_id: OfferId::new(),
                caller: same_user_as_artist,
                draft: offer_draft(),
            })
            .then_error(|error| assert_eq!(*error, NegotiationError::SelfOffer))
            .run();
    }

    #[test]
    fn test_targeted_request_rejects_other_responders() {
        let owner = client();
        let mut request = request_for(owner);
        request.target = Some(Responder::studio(UserId::new()));

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, Vec::new()))
            .when_action(NegotiationAction::SubmitOffer {
                offer_id: OfferId::new(),
                caller: artist(),
                draft: offer_draft(),
            })
            .then_error(|error| assert_eq!(*error, NegotiationError::NotTargetedResponder))
            .run();
    }

    #[test]
    fn test_offer_on_closed_request_is_rejected() {
        let owner = client();
        let mut request = request_for(owner);
        request.status = RequestStatus::InProgress;

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, Vec::new()))
            .when_action(NegotiationAction::SubmitOffer {
                offer_id: OfferId::new(),
                caller: artist(),
                draft: offer_draft(),
            })
            .then_error(|error| assert_eq!(*error, NegotiationError::RequestNotOpen))
            .run();
    }

    #[test]
    fn test_accept_cascades_to_siblings() {
        let owner = client();
        let first = artist();
        let second = artist();
        let request = request_for(owner);
        let o1 = pending_offer(&request, first);
        let o2 = pending_offer(&request, second);
        let (o1_id, o2_id) = (o1.id, o2.id);

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, vec![o1, o2]))
            .when_action(NegotiationAction::ChangeOfferStatus {
                offer_id: o1_id,
                caller: owner,
                to: OfferStatus::Accepted,
            })
            .then_state(move |state| {
                assert_eq!(state.offer(o1_id).unwrap().status, OfferStatus::Accepted);
                assert_eq!(state.offer(o2_id).unwrap().status, OfferStatus::Rejected);
                assert_eq!(state.request.status, RequestStatus::InProgress);
            })
            .then_effects(move |effects| {
                assertions::assert_effects_count(effects, 1);
                assert!(matches!(
                    &effects[0],
                    NegotiationEffect::Notify(draft)
                        if draft.recipient_id == first.user_id
                            && draft.kind == NotificationType::OfferAccepted
                ));
            })
            .run();
    }

    #[test]
    fn test_only_the_client_accepts() {
        let owner = client();
        let responder = artist();
        let request = request_for(owner);
        let offer = pending_offer(&request, responder);
        let offer_id = offer.id;

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, vec![offer]))
            .when_action(NegotiationAction::ChangeOfferStatus {
                offer_id,
                caller: responder,
                to: OfferStatus::Accepted,
            })
            .then_error(|error| assert_eq!(*error, NegotiationError::ClientMismatch))
            .run();
    }

    #[test]
    fn test_illegal_transition_is_rejected_even_for_the_owner() {
        let owner = client();
        let request = request_for(owner);
        let mut offer = pending_offer(&request, artist());
        offer.status = OfferStatus::Rejected;
        let offer_id = offer.id;

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, vec![offer]))
            .when_action(NegotiationAction::ChangeOfferStatus {
                offer_id,
                caller: owner,
                to: OfferStatus::Accepted,
            })
            .then_error(|error| {
                assert_eq!(error.to_string(), "Cannot change status from rejected to accepted");
            })
            .run();
    }

    #[test]
    fn test_complete_moves_request_to_completed() {
        let owner = client();
        let responder = artist();
        let mut request = request_for(owner);
        request.status = RequestStatus::InProgress;
        let mut offer = pending_offer(&request, responder);
        offer.status = OfferStatus::Accepted;
        let offer_id = offer.id;

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, vec![offer]))
            .when_action(NegotiationAction::ChangeOfferStatus {
                offer_id,
                caller: responder,
                to: OfferStatus::Completed,
            })
            .then_state(move |state| {
                assert_eq!(state.offer(offer_id).unwrap().status, OfferStatus::Completed);
                assert_eq!(state.request.status, RequestStatus::Completed);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_withdraw_is_responder_only() {
        let owner = client();
        let request = request_for(owner);
        let offer = pending_offer(&request, artist());
        let offer_id = offer.id;

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, vec![offer]))
            .when_action(NegotiationAction::ChangeOfferStatus {
                offer_id,
                caller: owner,
                to: OfferStatus::Withdrawn,
            })
            .then_error(|error| assert_eq!(*error, NegotiationError::NotResponder))
            .run();
    }

    #[test]
    fn test_cancel_request_closes_open_offers() {
        let owner = client();
        let mut request = request_for(owner);
        request.status = RequestStatus::InProgress;
        let mut accepted = pending_offer(&request, artist());
        accepted.status = OfferStatus::Accepted;
        let withdrawn = {
            let mut offer = pending_offer(&request, artist());
            offer.status = OfferStatus::Withdrawn;
            offer
        };
        let (accepted_id, withdrawn_id) = (accepted.id, withdrawn.id);

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, vec![accepted, withdrawn]))
            .when_action(NegotiationAction::CancelRequest { caller: owner })
            .then_state(move |state| {
                assert_eq!(state.request.status, RequestStatus::Cancelled);
                assert_eq!(state.offer(accepted_id).unwrap().status, OfferStatus::Cancelled);
                assert_eq!(state.offer(withdrawn_id).unwrap().status, OfferStatus::Withdrawn);
            })
            .run();
    }

    #[test]
    fn test_retire_request_without_offers_hard_deletes() {
        let owner = client();
        let request = request_for(owner);
        let request_id = request.id;

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, Vec::new()))
            .when_action(NegotiationAction::RetireRequest { caller: owner })
            .then_effects(move |effects| {
                assert_eq!(effects, &[NegotiationEffect::DeleteRequest(request_id)]);
            })
            .run();
    }

    #[test]
    fn test_retire_request_with_offers_soft_deletes() {
        let owner = client();
        let request = request_for(owner);
        let offer = pending_offer(&request, artist());

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, vec![offer]))
            .when_action(NegotiationAction::RetireRequest { caller: owner })
            .then_state(|state| {
                assert!(!state.request.active);
                assert_eq!(state.offers[0].status, OfferStatus::Rejected);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_revise_request_rejects_inverted_budget() {
        let owner = client();

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request_for(owner), Vec::new()))
            .when_action(NegotiationAction::ReviseRequest {
                caller: owner,
                changes: RequestChanges {
                    budget_min: Some(Money::from_cents(200_000)),
                    ..RequestChanges::default()
                },
            })
            .then_error(|error| assert_eq!(*error, NegotiationError::InvalidBudget))
            .run();
    }

    #[test]
    fn test_delete_offer_only_while_pending() {
        let owner = client();
        let responder = artist();
        let request = request_for(owner);
        let mut offer = pending_offer(&request, responder);
        offer.status = OfferStatus::Withdrawn;
        let offer_id = offer.id;

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, vec![offer]))
            .when_action(NegotiationAction::DeleteOffer {
                offer_id,
                caller: responder,
            })
            .then_error(|error| assert_eq!(*error, NegotiationError::OfferNotEditable))
            .run();
    }

    #[test]
    fn test_revise_pending_offer() {
        let owner = client();
        let responder = artist();
        let request = request_for(owner);
        let offer = pending_offer(&request, responder);
        let offer_id = offer.id;

        ReducerTest::new(NegotiationReducer::new())
            .with_env(env())
            .given_state(NegotiationState::new(request, vec![offer]))
            .when_action(NegotiationAction::ReviseOffer {
                offer_id,
                caller: responder,
                changes: OfferChanges {
                    price: Some(Money::from_cents(70_000)),
                    ..OfferChanges::default()
                },
            })
            .then_state(move |state| {
                assert_eq!(state.offer(offer_id).unwrap().price, Money::from_cents(70_000));
            })
            .run();
    }
}
