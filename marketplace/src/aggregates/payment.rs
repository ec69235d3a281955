//! Payment intents and reconciliation.
//!
//! An intent moves `pending -> processing` when the processor accepts it (or
//! `pending -> failed` when it does not), then settles when a confirmation
//! arrives. Confirmations are keyed on the processor's external reference and
//! may be delivered any number of times: [`classify`] decides, from the current
//! status and the reported outcome alone, whether a delivery applies, is a
//! duplicate, or is ignored.

use crate::processors::ProcessorError;
use crate::types::{
    Caller, DiscrepancyKind, Money, NotificationDraft, NotificationType, Offer, PaymentIntent,
    PaymentIntentId, PaymentMetadata, PaymentStatus, Processor, ProcessorOutcome,
};
use chrono::{DateTime, Utc};
use inkmatch_core::environment::Clock;
use inkmatch_core::reducer::{Effects, Reducer};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// Errors
// ============================================================================

/// Rejections produced by the payment engine.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// Amount under the configured floor
    #[error("Amount {amount} is below the minimum of {minimum}")]
    AmountBelowMinimum {
        /// Requested amount
        amount: Money,
        /// Configured floor
        minimum: Money,
    },
    /// Currency code is not three ASCII letters
    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),
    /// `metadata.client_id` is not the caller
    #[error("Payment metadata client does not match the authenticated user")]
    ClientMismatch,
    /// `metadata.responder_id` disagrees with the linked offer
    #[error("Payment metadata responder does not match the linked offer")]
    ResponderMismatch,
    /// Linked offer is not accepted or completed
    #[error("Offer {0} cannot be paid in its current state")]
    OfferNotPayable(crate::types::OfferId),
    /// Another intent for the offer is in flight or already completed
    #[error("Offer {offer_id} already has payment intent {intent_id} ({status})")]
    PaymentInFlight {
        /// Offer being paid
        offer_id: crate::types::OfferId,
        /// The live intent
        intent_id: PaymentIntentId,
        /// Its status
        status: PaymentStatus,
    },
    /// Intent already left `pending`
    #[error("Payment intent is {0}, expected pending")]
    IntentNotPending(PaymentStatus),
    /// External reference is immutable once set
    #[error("Payment intent already has an external reference")]
    ExternalRefAlreadySet,
    /// Webhook signature missing or wrong
    #[error("Invalid webhook signature")]
    InvalidSignature,
    /// No intent carries this external reference
    #[error("No payment intent for {processor} reference {external_ref}")]
    UnknownExternalRef {
        /// Rail
        processor: Processor,
        /// Reference
        external_ref: String,
    },
    /// The processor call failed
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

// ============================================================================
// Intent creation
// ============================================================================

/// Caller input for a new payment intent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRequest {
    /// Amount in minor units
    pub amount: Money,
    /// ISO currency code; the configured default when absent
    #[serde(default)]
    pub currency: Option<String>,
    /// Rail to use
    pub processor: Processor,
    /// Back-references
    pub metadata: PaymentMetadata,
}

/// Validate an intent request and normalise its currency.
///
/// The amount floor is checked first so an undersized payment never reaches
/// the processor.
///
/// # Errors
///
/// [`PaymentError::AmountBelowMinimum`], [`PaymentError::InvalidCurrency`] or
/// [`PaymentError::ClientMismatch`].
pub fn validate_intent(
    caller: Caller,
    request: &IntentRequest,
    minimum: Money,
    default_currency: &str,
) -> Result<String, PaymentError> {
    if request.amount < minimum {
        return Err(PaymentError::AmountBelowMinimum {
            amount: request.amount,
            minimum,
        });
    }
    let currency = request
        .currency
        .as_deref()
        .unwrap_or(default_currency)
        .to_ascii_lowercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(PaymentError::InvalidCurrency(currency));
    }
    if request.metadata.client_id != caller.user_id {
        return Err(PaymentError::ClientMismatch);
    }
    Ok(currency)
}

/// Build the pending intent recorded before the processor is called.
#[must_use]
pub fn new_intent(
    id: PaymentIntentId,
    request: IntentRequest,
    currency: String,
    now: DateTime<Utc>,
) -> PaymentIntent {
    PaymentIntent {
        id,
        amount: request.amount,
        currency,
        processor: request.processor,
        status: PaymentStatus::Pending,
        external_ref: None,
        metadata: request.metadata,
        failure_reason: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    }
}

// ============================================================================
// Reconciliation classification
// ============================================================================

/// What a confirmation delivery does to an intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "status", rename_all = "snake_case")]
pub enum ReconcileDisposition {
    /// The intent moved to this status
    Applied(PaymentStatus),
    /// Same outcome already recorded
    Duplicate,
    /// Outcome contradicts a settled state and is not applied
    Ignored,
    /// Processor still reports the payment in flight
    StillPending,
}

impl ReconcileDisposition {
    /// Label used in logs and metrics
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
            Self::StillPending => "still_pending",
        }
    }
}

/// Decide the effect of `outcome` on an intent currently in `current`.
///
/// Completed never reverts. Failed and cancelled intents may still complete on
/// a success confirmation for the same reference.
#[must_use]
pub const fn classify(current: PaymentStatus, outcome: ProcessorOutcome) -> ReconcileDisposition {
    use PaymentStatus as S;
    use ProcessorOutcome as O;
    match (current, outcome) {
        (_, O::Pending) => ReconcileDisposition::StillPending,
        (S::Completed, O::Success) | (S::Failed, O::Failure) | (S::Cancelled, O::Cancelled) => {
            ReconcileDisposition::Duplicate
        }
        (S::Completed, O::Failure | O::Cancelled)
        | (S::Failed, O::Cancelled)
        | (S::Cancelled, O::Failure) => ReconcileDisposition::Ignored,
        (S::Pending | S::Processing | S::Failed | S::Cancelled, O::Success) => {
            ReconcileDisposition::Applied(S::Completed)
        }
        (S::Pending | S::Processing, O::Failure) => ReconcileDisposition::Applied(S::Failed),
        (S::Pending | S::Processing, O::Cancelled) => ReconcileDisposition::Applied(S::Cancelled),
    }
}

// ============================================================================
// State, actions, effects
// ============================================================================

/// One intent and, when linked, its offer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentState {
    /// The intent
    pub intent: PaymentIntent,
    /// Offer referenced by `metadata.offer_id`
    pub offer: Option<Offer>,
}

impl PaymentState {
    /// Creates a state snapshot
    #[must_use]
    pub const fn new(intent: PaymentIntent, offer: Option<Offer>) -> Self {
        Self { intent, offer }
    }
}

/// Payment commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentAction {
    /// Processor accepted the intent
    ProcessorAccepted {
        /// Processor's reference
        external_ref: String,
    },
    /// Processor rejected or did not answer in time
    ProcessorFailed {
        /// Reason recorded on the intent
        reason: String,
    },
    /// A confirmation event arrived
    Reconcile {
        /// Translated outcome
        outcome: ProcessorOutcome,
    },
}

/// Work the shell performs inside the same transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum PaymentEffect {
    /// Record a notification
    Notify(NotificationDraft),
    /// Record a discrepancy for manual repair
    FlagDiscrepancy {
        /// Kind
        kind: DiscrepancyKind,
        /// Detail
        detail: String,
    },
}

/// Environment dependencies for payments
#[derive(Clone)]
pub struct PaymentEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
}

impl PaymentEnvironment {
    /// Creates a new `PaymentEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for payment intents
#[derive(Clone, Debug, Default)]
pub struct PaymentReducer;

impl PaymentReducer {
    /// Creates a new `PaymentReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn payload(intent: &PaymentIntent) -> serde_json::Value {
        json!({
            "payment_intent_id": intent.id,
            "amount": intent.amount,
            "currency": intent.currency,
            "offer_id": intent.metadata.offer_id,
            "appointment_id": intent.metadata.appointment_id,
        })
    }

    fn complete(state: &mut PaymentState, now: DateTime<Utc>) -> Effects<PaymentEffect> {
        let mut effects = Effects::new();
        let intent = &mut state.intent;
        intent.status = PaymentStatus::Completed;
        intent.completed_at = Some(now);
        intent.updated_at = now;

        if intent.metadata.offer_id.is_none() {
            return effects;
        }

        let mut responder = intent.metadata.responder_id;
        match state.offer.as_mut() {
            Some(offer) if offer.status.is_payable() && offer.paid_at.is_none() => {
                offer.paid_at = Some(now);
                offer.updated_at = now;
                responder = responder.or(Some(offer.responder.user_id));
            }
            Some(offer) if offer.is_paid() => {
                // The responder was already credited for this offer.
                effects.push(PaymentEffect::FlagDiscrepancy {
                    kind: DiscrepancyKind::OfferNotPayable,
                    detail: format!("offer {} was already paid", offer.id),
                });
                return effects;
            }
            Some(offer) => {
                responder = responder.or(Some(offer.responder.user_id));
                effects.push(PaymentEffect::FlagDiscrepancy {
                    kind: DiscrepancyKind::OfferNotPayable,
                    detail: format!("offer {} is {} and cannot be marked paid", offer.id, offer.status),
                });
            }
            None => {
                effects.push(PaymentEffect::FlagDiscrepancy {
                    kind: DiscrepancyKind::OfferNotPayable,
                    detail: "linked offer no longer exists".to_string(),
                });
            }
        }

        if let Some(recipient_id) = responder {
            effects.push(PaymentEffect::Notify(NotificationDraft {
                recipient_id,
                sender_id: Some(intent.metadata.client_id),
                kind: NotificationType::PaymentReceived,
                payload: Self::payload(intent),
            }));
        }
        effects
    }

    fn settle_unsuccessfully(
        state: &mut PaymentState,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Effects<PaymentEffect> {
        let intent = &mut state.intent;
        intent.status = status;
        intent.updated_at = now;

        let mut effects = Effects::new();
        if intent.metadata.offer_id.is_some() {
            effects.push(PaymentEffect::Notify(NotificationDraft {
                recipient_id: intent.metadata.client_id,
                sender_id: None,
                kind: NotificationType::PaymentCancelled,
                payload: Self::payload(intent),
            }));
        }
        effects
    }
}

impl Reducer for PaymentReducer {
    type State = PaymentState;
    type Action = PaymentAction;
    type Environment = PaymentEnvironment;
    type Effect = PaymentEffect;
    type Error = PaymentError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<Effects<Self::Effect>, Self::Error> {
        let now = env.clock.now();
        match action {
            PaymentAction::ProcessorAccepted { external_ref } => {
                if state.intent.external_ref.is_some() {
                    return Err(PaymentError::ExternalRefAlreadySet);
                }
                if state.intent.status != PaymentStatus::Pending {
                    return Err(PaymentError::IntentNotPending(state.intent.status));
                }
                state.intent.external_ref = Some(external_ref);
                state.intent.status = PaymentStatus::Processing;
                state.intent.updated_at = now;
                Ok(Effects::new())
            }
            PaymentAction::ProcessorFailed { reason } => {
                if state.intent.status != PaymentStatus::Pending {
                    return Err(PaymentError::IntentNotPending(state.intent.status));
                }
                state.intent.status = PaymentStatus::Failed;
                state.intent.failure_reason = Some(reason);
                state.intent.updated_at = now;
                Ok(Effects::new())
            }
            PaymentAction::Reconcile { outcome } => {
                match classify(state.intent.status, outcome) {
                    ReconcileDisposition::Applied(PaymentStatus::Completed) => {
                        Ok(Self::complete(state, now))
                    }
                    ReconcileDisposition::Applied(status) => {
                        Ok(Self::settle_unsuccessfully(state, status, now))
                    }
                    ReconcileDisposition::Ignored
                        if state.intent.status == PaymentStatus::Completed =>
                    {
                        let mut effects = Effects::new();
                        effects.push(PaymentEffect::FlagDiscrepancy {
                            kind: DiscrepancyKind::ReversalIgnored,
                            detail: format!("{outcome:?} reported for a completed payment"),
                        });
                        Ok(effects)
                    }
                    ReconcileDisposition::Ignored
                    | ReconcileDisposition::Duplicate
                    | ReconcileDisposition::StillPending => Ok(Effects::new()),
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::{OfferId, OfferStatus, RequestId, Responder, Role, UserId};
    use inkmatch_testing::{assertions, test_clock, ReducerTest};

    fn env() -> PaymentEnvironment {
        PaymentEnvironment::new(Arc::new(test_clock()))
    }

    fn offer(status: OfferStatus) -> Offer {
        Offer {
            id: OfferId::new(),
            request_id: RequestId::new(),
            responder: Responder::artist(UserId::new()),
            message: "Deal".to_string(),
            price: Money::from_cents(20_000),
            estimated_duration_minutes: 120,
            availability: None,
            status,
            paid_at: None,
            created_at: test_clock().now(),
            updated_at: test_clock().now(),
        }
    }

    fn processing_intent(offer: Option<&Offer>) -> PaymentIntent {
        let mut intent = new_intent(
            PaymentIntentId::new(),
            IntentRequest {
                amount: Money::from_cents(20_000),
                currency: None,
                processor: Processor::ProcessorA,
                metadata: PaymentMetadata {
                    client_id: UserId::new(),
                    responder_id: offer.map(|o| o.responder.user_id),
                    offer_id: offer.map(|o| o.id),
                    appointment_id: None,
                },
            },
            "usd".to_string(),
            test_clock().now(),
        );
        intent.status = PaymentStatus::Processing;
        intent.external_ref = Some("ext_123".to_string());
        intent
    }

    #[test]
    fn test_below_floor_is_rejected() {
        let caller = Caller::new(UserId::new(), Role::Client);
        let request = IntentRequest {
            amount: Money::from_cents(10),
            currency: Some("usd".to_string()),
            processor: Processor::ProcessorA,
            metadata: PaymentMetadata {
                client_id: caller.user_id,
                responder_id: None,
                offer_id: None,
                appointment_id: None,
            },
        };
        let result = validate_intent(caller, &request, Money::from_cents(50), "usd");
        assert!(matches!(result, Err(PaymentError::AmountBelowMinimum { .. })));
    }

    #[test]
    fn test_metadata_client_must_be_caller() {
        let caller = Caller::new(UserId::new(), Role::Client);
        let request = IntentRequest {
            amount: Money::from_cents(5_000),
            currency: Some("EUR".to_string()),
            processor: Processor::ProcessorB,
            metadata: PaymentMetadata {
                client_id: UserId::new(),
                responder_id: None,
                offer_id: None,
                appointment_id: None,
            },
        };
        let result = validate_intent(caller, &request, Money::from_cents(50), "usd");
        assert!(matches!(result, Err(PaymentError::ClientMismatch)));
    }

    #[test]
    fn test_classify_never_reverts_completed() {
        assert_eq!(
            classify(PaymentStatus::Completed, ProcessorOutcome::Failure),
            ReconcileDisposition::Ignored
        );
        assert_eq!(
            classify(PaymentStatus::Completed, ProcessorOutcome::Success),
            ReconcileDisposition::Duplicate
        );
        assert_eq!(
            classify(PaymentStatus::Failed, ProcessorOutcome::Success),
            ReconcileDisposition::Applied(PaymentStatus::Completed)
        );
        assert_eq!(
            classify(PaymentStatus::Processing, ProcessorOutcome::Pending),
            ReconcileDisposition::StillPending
        );
    }

    #[test]
    fn test_success_marks_offer_paid_and_notifies_responder() {
        let linked = offer(OfferStatus::Accepted);
        let responder = linked.responder.user_id;
        let intent = processing_intent(Some(&linked));

        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(PaymentState::new(intent, Some(linked)))
            .when_action(PaymentAction::Reconcile {
                outcome: ProcessorOutcome::Success,
            })
            .then_state(|state| {
                assert_eq!(state.intent.status, PaymentStatus::Completed);
                assert_eq!(state.intent.completed_at, Some(test_clock().now()));
                let offer = state.offer.as_ref().unwrap();
                assert!(offer.is_paid());
                assert_eq!(offer.status, OfferStatus::Accepted);
            })
            .then_effects(move |effects| {
                assertions::assert_effects_count(effects, 1);
                match &effects[0] {
                    PaymentEffect::Notify(draft) => {
                        assert_eq!(draft.recipient_id, responder);
                        assert_eq!(draft.kind, NotificationType::PaymentReceived);
                    }
                    other => panic!("unexpected effect {other:?}"),
                }
            })
            .run();
    }

    #[test]
    fn test_duplicate_success_is_a_no_op() {
        let mut linked = offer(OfferStatus::Accepted);
        linked.paid_at = Some(test_clock().now());
        let mut intent = processing_intent(Some(&linked));
        intent.status = PaymentStatus::Completed;
        intent.completed_at = Some(test_clock().now());

        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(PaymentState::new(intent, Some(linked)))
            .when_action(PaymentAction::Reconcile {
                outcome: ProcessorOutcome::Success,
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_failure_leaves_offer_and_notifies_client() {
        let linked = offer(OfferStatus::Accepted);
        let intent = processing_intent(Some(&linked));
        let client = intent.metadata.client_id;

        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(PaymentState::new(intent, Some(linked)))
            .when_action(PaymentAction::Reconcile {
                outcome: ProcessorOutcome::Cancelled,
            })
            .then_state(|state| {
                assert_eq!(state.intent.status, PaymentStatus::Cancelled);
                let offer = state.offer.as_ref().unwrap();
                assert!(!offer.is_paid());
                assert_eq!(offer.status, OfferStatus::Accepted);
            })
            .then_effects(move |effects| {
                assert!(matches!(
                    &effects[0],
                    PaymentEffect::Notify(draft)
                        if draft.recipient_id == client && draft.kind == NotificationType::PaymentCancelled
                ));
            })
            .run();
    }

    #[test]
    fn test_success_for_rejected_offer_is_flagged() {
        let linked = offer(OfferStatus::Rejected);
        let intent = processing_intent(Some(&linked));

        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(PaymentState::new(intent, Some(linked)))
            .when_action(PaymentAction::Reconcile {
                outcome: ProcessorOutcome::Success,
            })
            .then_state(|state| {
                assert_eq!(state.intent.status, PaymentStatus::Completed);
                assert!(!state.offer.as_ref().unwrap().is_paid());
            })
            .then_effects(|effects| {
                assert!(effects.iter().any(|effect| matches!(
                    effect,
                    PaymentEffect::FlagDiscrepancy { kind: DiscrepancyKind::OfferNotPayable, .. }
                )));
            })
            .run();
    }

    /// A late success on a second intent for a paid offer completes the
    /// intent but credits nobody again.
    #[test]
    fn test_success_for_paid_offer_flags_without_notifying() {
        let mut linked = offer(OfferStatus::Accepted);
        let paid_at = test_clock().now() - chrono::Duration::hours(1);
        linked.paid_at = Some(paid_at);
        let intent = processing_intent(Some(&linked));

        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(PaymentState::new(intent, Some(linked)))
            .when_action(PaymentAction::Reconcile {
                outcome: ProcessorOutcome::Success,
            })
            .then_state(move |state| {
                assert_eq!(state.intent.status, PaymentStatus::Completed);
                assert_eq!(state.offer.as_ref().unwrap().paid_at, Some(paid_at));
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assert!(matches!(
                    &effects[0],
                    PaymentEffect::FlagDiscrepancy { kind: DiscrepancyKind::OfferNotPayable, .. }
                ));
            })
            .run();
    }

    #[test]
    fn test_external_ref_is_immutable() {
        let intent = processing_intent(None);

        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(PaymentState::new(intent, None))
            .when_action(PaymentAction::ProcessorAccepted {
                external_ref: "ext_other".to_string(),
            })
            .then_error(|error| assert!(matches!(error, PaymentError::ExternalRefAlreadySet)))
            .run();
    }

    #[test]
    fn test_processor_failure_marks_failed() {
        let mut intent = processing_intent(None);
        intent.status = PaymentStatus::Pending;
        intent.external_ref = None;

        ReducerTest::new(PaymentReducer::new())
            .with_env(env())
            .given_state(PaymentState::new(intent, None))
            .when_action(PaymentAction::ProcessorFailed {
                reason: "timeout".to_string(),
            })
            .then_state(|state| {
                assert_eq!(state.intent.status, PaymentStatus::Failed);
                assert_eq!(state.intent.failure_reason.as_deref(), Some("timeout"));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }
}
