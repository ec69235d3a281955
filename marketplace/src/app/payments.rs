//! Payment intents, processor calls and reconciliation.
//!
//! Creating an intent spans two transactions with the processor call between
//! them, so no row lock is held while waiting on the network:
//!
//! 1. record the intent as `pending` and commit
//! 2. call the processor, bounded by the configured timeout
//! 3. record `processing` with the external reference, or `failed`
//!
//! If step 3 cannot be written after the processor accepted, the charge exists
//! externally without a local record of it. That case is surfaced as
//! [`EngineError::Discrepancy`] and recorded for repair; the intent stays
//! `pending` and a later confirmation cannot match it.
//!
//! An offer is charged by at most one live intent. Step 1 locks the offer and
//! refuses a new intent while another is pending, processing or completed;
//! failed and cancelled intents leave the offer open for a retry.
//!
//! Confirmations are matched on `(processor, external_ref)` and applied under
//! the intent's row lock, so concurrent deliveries of the same event serialize
//! and the second one classifies as a duplicate.

use super::{count_notifications, record_notification};
use crate::aggregates::payment::{classify, new_intent, validate_intent, IntentRequest};
use crate::aggregates::{
    PaymentAction, PaymentEffect, PaymentEnvironment, PaymentError, PaymentReducer, PaymentState,
    ReconcileDisposition,
};
use crate::config::PaymentConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::processors::PaymentProcessors;
use crate::store::{MarketplaceStore, StoreError, StoreResult};
use crate::types::{
    Caller, Discrepancy, DiscrepancyId, DiscrepancyKind, Money, PaymentIntent, PaymentIntentId,
    Processor, ProcessorOutcome,
};
use inkmatch_core::environment::Clock;
use inkmatch_core::reducer::Reducer;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Result of applying one confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconcileReceipt {
    /// The intent after the confirmation
    pub intent: PaymentIntent,
    /// What the confirmation did
    pub disposition: ReconcileDisposition,
}

/// Payment operations.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn MarketplaceStore>,
    processors: PaymentProcessors,
    reducer: PaymentReducer,
    env: PaymentEnvironment,
    config: PaymentConfig,
}

impl PaymentService {
    /// Creates a new `PaymentService`
    #[must_use]
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        processors: PaymentProcessors,
        env: PaymentEnvironment,
        config: PaymentConfig,
    ) -> Self {
        Self {
            store,
            processors,
            reducer: PaymentReducer::new(),
            env,
            config,
        }
    }

    /// Create an intent and hand it to its processor.
    ///
    /// Returns the intent in `processing` when the processor accepted it.
    ///
    /// # Errors
    ///
    /// - Validation and ownership failures before anything is recorded
    /// - [`PaymentError::PaymentInFlight`] when another intent for the linked
    ///   offer is pending, processing or completed
    /// - [`PaymentError::Processor`] when the processor declined or timed
    ///   out; the intent is recorded as `failed`
    /// - [`EngineError::Discrepancy`] when the processor accepted but the
    ///   result could not be recorded
    #[tracing::instrument(
        skip(self, request),
        fields(client_id = %caller.user_id, processor = %request.processor, intent_id)
    )]
    pub async fn create_intent(
        &self,
        caller: Caller,
        mut request: IntentRequest,
    ) -> EngineResult<PaymentIntent> {
        let currency = validate_intent(
            caller,
            &request,
            Money::from_cents(self.config.min_amount),
            &self.config.default_currency,
        )?;

        let mut tx = self.store.begin().await?;
        if let Some(offer_id) = request.metadata.offer_id {
            let offer = tx
                .lock_offer(offer_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Offer", offer_id))?;
            let request_row = tx
                .get_request(offer.request_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Request", offer.request_id))?;
            if request_row.client_id != caller.user_id {
                return Err(PaymentError::ClientMismatch.into());
            }
            if !offer.status.is_payable() || offer.is_paid() {
                return Err(PaymentError::OfferNotPayable(offer_id).into());
            }
            let intents = tx.intents_for_offer(offer_id).await?;
            if let Some(live) = intents.iter().find(|intent| intent.status.holds_offer()) {
                return Err(PaymentError::PaymentInFlight {
                    offer_id,
                    intent_id: live.id,
                    status: live.status,
                }
                .into());
            }
            match request.metadata.responder_id {
                None => request.metadata.responder_id = Some(offer.responder.user_id),
                Some(responder) if responder == offer.responder.user_id => {}
                Some(_) => return Err(PaymentError::ResponderMismatch.into()),
            }
        }
        if let Some(appointment_id) = request.metadata.appointment_id {
            let appointment = tx
                .get_appointment(appointment_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Appointment", appointment_id))?;
            if appointment.client_id != caller.user_id {
                return Err(PaymentError::ClientMismatch.into());
            }
        }

        let intent = new_intent(PaymentIntentId::new(), request, currency, self.env.clock.now());
        tx.insert_intent(&intent).await?;
        tx.commit().await?;
        tracing::Span::current().record("intent_id", tracing::field::display(intent.id));
        tracing::info!(amount = %intent.amount, currency = %intent.currency, "Payment intent recorded");

        let started = Instant::now();
        let processed = self.processors.create_payment(&intent).await;
        metrics::processor_call(intent.processor.as_str(), started.elapsed());

        let action = match &processed {
            Ok(payment) => PaymentAction::ProcessorAccepted {
                external_ref: payment.external_ref.clone(),
            },
            Err(error) => PaymentAction::ProcessorFailed {
                reason: error.to_string(),
            },
        };

        match (processed, self.apply_processor_result(intent.id, action).await) {
            (Ok(_), Ok(intent)) => {
                metrics::payment_intent("processing");
                tracing::info!(external_ref = ?intent.external_ref, "Payment accepted by processor");
                Ok(intent)
            }
            (Err(error), Ok(_)) => {
                metrics::payment_intent("failed");
                tracing::warn!(error = %error, "Payment failed at processor");
                Err(PaymentError::Processor(error).into())
            }
            (Ok(payment), Err(error)) => {
                Err(self
                    .flag_local_write_failure(&intent, &payment.external_ref, &error)
                    .await)
            }
            (Err(processor_error), Err(error)) => {
                tracing::error!(
                    processor_error = %processor_error,
                    error = %error,
                    "Could not record processor failure; intent left pending"
                );
                Err(error)
            }
        }
    }

    async fn apply_processor_result(
        &self,
        intent_id: PaymentIntentId,
        action: PaymentAction,
    ) -> EngineResult<PaymentIntent> {
        let mut tx = self.store.begin().await?;
        let intent = tx
            .lock_intent(intent_id)
            .await?
            .ok_or_else(|| EngineError::not_found("PaymentIntent", intent_id))?;
        let mut state = PaymentState::new(intent, None);
        self.reducer.reduce(&mut state, action, &self.env)?;
        tx.update_intent(&state.intent).await?;
        tx.commit().await?;
        Ok(state.intent)
    }

    async fn flag_local_write_failure(
        &self,
        intent: &PaymentIntent,
        external_ref: &str,
        error: &EngineError,
    ) -> EngineError {
        tracing::error!(
            intent_id = %intent.id,
            processor = %intent.processor,
            external_ref,
            error = %error,
            "Processor accepted payment but the local record failed"
        );
        metrics::discrepancy();

        let discrepancy = Discrepancy {
            id: DiscrepancyId::new(),
            intent_id: intent.id,
            processor: intent.processor,
            external_ref: Some(external_ref.to_string()),
            kind: DiscrepancyKind::LocalWriteFailed,
            detail: error.to_string(),
            created_at: self.env.clock.now(),
        };
        if let Err(record_error) = self.record_discrepancy(&discrepancy).await {
            tracing::error!(error = %record_error, "Could not record payment discrepancy");
        }

        EngineError::Discrepancy {
            intent_id: intent.id.to_string(),
            reason: error.to_string(),
        }
    }

    async fn record_discrepancy(&self, discrepancy: &Discrepancy) -> StoreResult<()> {
        let mut tx = self.store.begin().await?;
        tx.insert_discrepancy(discrepancy).await?;
        tx.commit().await
    }

    /// Apply a confirmation for `(processor, external_ref)`.
    ///
    /// Idempotent: redelivering an outcome already applied returns
    /// [`ReconcileDisposition::Duplicate`] and changes nothing.
    ///
    /// # Errors
    ///
    /// [`PaymentError::UnknownExternalRef`] when no intent carries the
    /// reference, or a store failure.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(
        &self,
        processor: Processor,
        external_ref: &str,
        outcome: ProcessorOutcome,
    ) -> EngineResult<ReconcileReceipt> {
        let mut tx = self.store.begin().await?;
        let intent = tx
            .lock_intent_by_external_ref(processor, external_ref)
            .await?
            .ok_or_else(|| PaymentError::UnknownExternalRef {
                processor,
                external_ref: external_ref.to_string(),
            })?;
        let offer = match intent.metadata.offer_id {
            Some(offer_id) => tx.lock_offer(offer_id).await?,
            None => None,
        };

        let before = PaymentState::new(intent, offer);
        let disposition = classify(before.intent.status, outcome);
        let mut state = before.clone();
        let effects = self
            .reducer
            .reduce(&mut state, PaymentAction::Reconcile { outcome }, &self.env)?;

        if state.intent != before.intent {
            tx.update_intent(&state.intent).await?;
        }
        if let Some(offer) = state.offer.as_ref().filter(|offer| Some(*offer) != before.offer.as_ref()) {
            tx.update_offer(offer).await?;
        }

        let now = self.env.clock.now();
        let mut notified = Vec::new();
        let mut flagged = 0_usize;
        for effect in effects {
            match effect {
                PaymentEffect::Notify(draft) => {
                    notified.push(record_notification(tx.as_mut(), draft, now).await?);
                }
                PaymentEffect::FlagDiscrepancy { kind, detail } => {
                    tracing::warn!(intent_id = %state.intent.id, %kind, %detail, "Payment discrepancy");
                    tx.insert_discrepancy(&Discrepancy {
                        id: DiscrepancyId::new(),
                        intent_id: state.intent.id,
                        processor,
                        external_ref: Some(external_ref.to_string()),
                        kind,
                        detail,
                        created_at: now,
                    })
                    .await?;
                    flagged += 1;
                }
            }
        }
        tx.commit().await?;

        count_notifications(&notified);
        for _ in 0..flagged {
            metrics::discrepancy();
        }
        metrics::reconciliation(disposition.as_str());
        tracing::info!(
            intent_id = %state.intent.id,
            disposition = disposition.as_str(),
            status = %state.intent.status,
            "Confirmation reconciled"
        );
        Ok(ReconcileReceipt {
            intent: state.intent,
            disposition,
        })
    }

    /// Capture a processing payment at its processor, then reconcile the outcome.
    ///
    /// # Errors
    ///
    /// Unknown reference, a caller who is neither the paying client nor the
    /// credited responder, a processor failure, or a store failure.
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id))]
    pub async fn capture(
        &self,
        caller: Caller,
        processor: Processor,
        external_ref: &str,
    ) -> EngineResult<ReconcileReceipt> {
        let mut tx = self.store.begin().await?;
        let intent = tx
            .lock_intent_by_external_ref(processor, external_ref)
            .await?
            .ok_or_else(|| PaymentError::UnknownExternalRef {
                processor,
                external_ref: external_ref.to_string(),
            })?;
        tx.rollback().await?;

        let metadata = &intent.metadata;
        if caller.user_id != metadata.client_id && Some(caller.user_id) != metadata.responder_id {
            return Err(EngineError::Forbidden(
                "Only the paying client or the credited responder can capture this payment",
            ));
        }

        let started = Instant::now();
        let outcome = self
            .processors
            .capture_payment(processor, external_ref)
            .await;
        metrics::processor_call(processor.as_str(), started.elapsed());
        let outcome = outcome.map_err(PaymentError::Processor)?;

        self.reconcile(processor, external_ref, outcome).await
    }

    /// Check a webhook's shared-secret signature.
    ///
    /// Accepts everything when no secret is configured.
    ///
    /// # Errors
    ///
    /// [`PaymentError::InvalidSignature`] when the header is missing or wrong.
    pub fn verify_webhook_signature(&self, signature: Option<&str>) -> EngineResult<()> {
        let Some(secret) = self.config.webhook_secret.as_deref() else {
            return Ok(());
        };
        match signature {
            Some(given) if constant_time_eq::constant_time_eq(given.as_bytes(), secret.as_bytes()) => {
                Ok(())
            }
            _ => {
                tracing::warn!("Rejected webhook with invalid signature");
                Err(PaymentError::InvalidSignature.into())
            }
        }
    }

    /// Read an intent as its paying client.
    ///
    /// # Errors
    ///
    /// Not found, forbidden, or a store failure.
    #[tracing::instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_intent(
        &self,
        caller: Caller,
        intent_id: PaymentIntentId,
    ) -> EngineResult<PaymentIntent> {
        let mut tx = self.store.begin().await?;
        let intent = tx
            .get_intent(intent_id)
            .await?
            .ok_or_else(|| EngineError::not_found("PaymentIntent", intent_id))?;
        tx.rollback().await?;

        if intent.metadata.client_id == caller.user_id {
            Ok(intent)
        } else {
            Err(EngineError::Forbidden("Only the paying client can view this payment"))
        }
    }

    /// Every recorded discrepancy, newest first.
    ///
    /// # Errors
    ///
    /// Store failure.
    pub async fn discrepancies(&self) -> Result<Vec<Discrepancy>, StoreError> {
        self.store.discrepancies().await
    }
}
