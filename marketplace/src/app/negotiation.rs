//! Request and offer operations.
//!
//! Lock order is always the request row first, then its offers. Actions
//! addressed by offer id read the offer unlocked only to find its request;
//! the reducer re-validates the offer against the locked snapshot.

use super::{count_notifications, record_notification};
use crate::aggregates::negotiation::{
    open_request, OfferChanges, OfferDraft, RequestChanges, RequestDraft,
};
use crate::aggregates::{
    NegotiationAction, NegotiationEffect, NegotiationEnvironment, NegotiationError,
    NegotiationReducer, NegotiationState,
};
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::store::{MarketplaceStore, StoreError, StoreResult, StoreTransaction};
use crate::types::{Caller, Offer, OfferId, OfferStatus, Request, RequestId, RequestStatus};
use inkmatch_core::environment::Clock;
use inkmatch_core::reducer::Reducer;
use std::sync::Arc;

#[derive(Clone, Copy, Debug)]
enum Locate {
    Request(RequestId),
    Offer(OfferId),
}

/// Outcome of deleting a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retirement {
    /// The request had no offers and was removed
    Deleted,
    /// Offers reference the request; it was deactivated
    Deactivated,
}

async fn persist(
    tx: &mut dyn StoreTransaction,
    before: &NegotiationState,
    after: &NegotiationState,
) -> StoreResult<()> {
    if before.request != after.request {
        tx.update_request(&after.request).await?;
    }
    for offer in &after.offers {
        match before.offer(offer.id) {
            None => tx.insert_offer(offer).await?,
            Some(previous) if previous != offer => tx.update_offer(offer).await?,
            Some(_) => {}
        }
    }
    Ok(())
}

fn duplicate_offer(error: StoreError) -> EngineError {
    match error {
        StoreError::UniqueViolation(constraint) if constraint.contains("responder") => {
            NegotiationError::DuplicateOffer.into()
        }
        other => other.into(),
    }
}

/// Negotiation operations over requests and offers.
#[derive(Clone)]
pub struct NegotiationService {
    store: Arc<dyn MarketplaceStore>,
    reducer: NegotiationReducer,
    env: NegotiationEnvironment,
}

impl NegotiationService {
    /// Creates a new `NegotiationService`
    #[must_use]
    pub fn new(store: Arc<dyn MarketplaceStore>, env: NegotiationEnvironment) -> Self {
        Self {
            store,
            reducer: NegotiationReducer::new(),
            env,
        }
    }

    async fn run(
        &self,
        locate: Locate,
        actions: Vec<NegotiationAction>,
    ) -> EngineResult<NegotiationState> {
        let mut tx = self.store.begin().await?;
        let request_id = match locate {
            Locate::Request(id) => id,
            Locate::Offer(id) => {
                tx.get_offer(id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("Offer", id))?
                    .request_id
            }
        };
        let request = tx
            .lock_request(request_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Request", request_id))?;
        let offers = tx.lock_offers_for_request(request_id).await?;

        let before = NegotiationState::new(request, offers);
        let mut state = before.clone();
        let mut effects = Vec::new();
        for action in actions {
            effects.extend(self.reducer.reduce(&mut state, action, &self.env)?);
        }

        persist(tx.as_mut(), &before, &state)
            .await
            .map_err(duplicate_offer)?;

        let now = self.env.clock.now();
        let mut notified = Vec::new();
        for effect in effects {
            match effect {
                NegotiationEffect::Notify(draft) => {
                    notified.push(record_notification(tx.as_mut(), draft, now).await?);
                }
                NegotiationEffect::DeleteOffer(id) => tx.delete_offer(id).await?,
                NegotiationEffect::DeleteRequest(id) => tx.delete_request(id).await?,
            }
        }

        tx.commit().await?;
        count_notifications(&notified);
        Ok(state)
    }

    async fn run_on_offer(
        &self,
        offer_id: OfferId,
        action: NegotiationAction,
    ) -> EngineResult<Offer> {
        let state = self.run(Locate::Offer(offer_id), vec![action]).await?;
        state
            .offer(offer_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Offer", offer_id))
    }

    /// Open a request owned by `caller`.
    ///
    /// # Errors
    ///
    /// Validation failures, an unknown target profile, or a store failure.
    #[tracing::instrument(skip(self, draft), fields(client_id = %caller.user_id))]
    pub async fn create_request(&self, caller: Caller, draft: RequestDraft) -> EngineResult<Request> {
        let request = open_request(RequestId::new(), caller, draft, self.env.clock.now())?;

        let mut tx = self.store.begin().await?;
        if let Some(target) = request.target {
            let profile = tx.get_profile(target.user_id).await?;
            if !profile.is_some_and(|profile| profile.kind == target.kind) {
                return Err(EngineError::not_found("Profile", target.user_id));
            }
        }
        tx.insert_request(&request).await?;
        tx.commit().await?;

        metrics::request_event("created");
        tracing::info!(request_id = %request.id, "Request created");
        Ok(request)
    }

    /// Read a request. Deactivated requests are visible to their client only.
    ///
    /// # Errors
    ///
    /// Not found, or a store failure.
    #[tracing::instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_request(&self, caller: Caller, request_id: RequestId) -> EngineResult<Request> {
        let mut tx = self.store.begin().await?;
        let request = tx.get_request(request_id).await?;
        tx.rollback().await?;
        request
            .filter(|request| request.active || request.client_id == caller.user_id)
            .ok_or_else(|| EngineError::not_found("Request", request_id))
    }

    /// Revise descriptive fields and optionally cancel, in one transaction.
    ///
    /// Only `cancelled` may be requested as a status; every other request
    /// status follows from the offer workflow.
    ///
    /// # Errors
    ///
    /// Ownership, validation or transition failures, or a store failure.
    #[tracing::instrument(skip(self, changes), fields(user_id = %caller.user_id))]
    pub async fn update_request(
        &self,
        caller: Caller,
        request_id: RequestId,
        changes: RequestChanges,
        status: Option<RequestStatus>,
    ) -> EngineResult<Request> {
        let mut actions = Vec::new();
        if changes != RequestChanges::default() || status.is_none() {
            actions.push(NegotiationAction::ReviseRequest { caller, changes });
        }
        match status {
            None => {}
            Some(RequestStatus::Cancelled) => actions.push(NegotiationAction::CancelRequest { caller }),
            Some(other) => return Err(NegotiationError::StatusNotSettable(other).into()),
        }
        let cancelling = status.is_some();

        let state = self.run(Locate::Request(request_id), actions).await?;
        if cancelling {
            metrics::request_event("cancelled");
            tracing::info!(%request_id, "Request cancelled");
        } else {
            metrics::request_event("revised");
        }
        Ok(state.request)
    }

    /// Delete a request: removed outright without offers, deactivated otherwise.
    ///
    /// # Errors
    ///
    /// Ownership failures, not found, or a store failure.
    #[tracing::instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn retire_request(
        &self,
        caller: Caller,
        request_id: RequestId,
    ) -> EngineResult<Retirement> {
        let state = self
            .run(
                Locate::Request(request_id),
                vec![NegotiationAction::RetireRequest { caller }],
            )
            .await?;
        let retirement = if state.request.active {
            Retirement::Deleted
        } else {
            Retirement::Deactivated
        };
        metrics::request_event(match retirement {
            Retirement::Deleted => "deleted",
            Retirement::Deactivated => "deactivated",
        });
        Ok(retirement)
    }

    /// Offers on a request: all of them for its client, only their own for a responder.
    ///
    /// # Errors
    ///
    /// Not found, forbidden for other clients, or a store failure.
    #[tracing::instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn list_offers(&self, caller: Caller, request_id: RequestId) -> EngineResult<Vec<Offer>> {
        let mut tx = self.store.begin().await?;
        let request = tx
            .get_request(request_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Request", request_id))?;
        let offers = tx.list_offers_for_request(request_id).await?;
        tx.rollback().await?;

        if request.client_id == caller.user_id {
            return Ok(offers);
        }
        if caller.as_responder().is_none() {
            return Err(EngineError::Forbidden(
                "Only the request's client or a responder can list its offers",
            ));
        }
        Ok(offers
            .into_iter()
            .filter(|offer| offer.responder.user_id == caller.user_id)
            .collect())
    }

    /// Submit an offer on an open request.
    ///
    /// # Errors
    ///
    /// Not found, the submission rules, or a store failure.
    #[tracing::instrument(skip(self, draft), fields(responder_id = %caller.user_id))]
    pub async fn submit_offer(
        &self,
        caller: Caller,
        request_id: RequestId,
        draft: OfferDraft,
    ) -> EngineResult<Offer> {
        let offer_id = OfferId::new();
        let state = self
            .run(
                Locate::Request(request_id),
                vec![NegotiationAction::SubmitOffer {
                    offer_id,
                    caller,
                    draft,
                }],
            )
            .await?;
        let offer = state
            .offer(offer_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Offer", offer_id))?;
        metrics::offer_event("submitted");
        tracing::info!(%offer_id, %request_id, "Offer submitted");
        Ok(offer)
    }

    /// Read an offer as its request's client or its responder.
    ///
    /// # Errors
    ///
    /// Not found, forbidden, or a store failure.
    #[tracing::instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn get_offer(&self, caller: Caller, offer_id: OfferId) -> EngineResult<Offer> {
        let mut tx = self.store.begin().await?;
        let offer = tx
            .get_offer(offer_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Offer", offer_id))?;
        let request = tx.get_request(offer.request_id).await?;
        tx.rollback().await?;

        let is_client = request.is_some_and(|request| request.client_id == caller.user_id);
        if is_client || offer.responder.user_id == caller.user_id {
            Ok(offer)
        } else {
            Err(EngineError::Forbidden(
                "Only the request's client or the responder can view this offer",
            ))
        }
    }

    /// Move an offer through its transition table.
    ///
    /// Accepting rejects every pending sibling and moves the request to
    /// `in_progress`; completing moves the request to `completed`.
    ///
    /// # Errors
    ///
    /// Transition or permission failures, not found, or a store failure.
    #[tracing::instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn change_offer_status(
        &self,
        caller: Caller,
        offer_id: OfferId,
        to: OfferStatus,
    ) -> EngineResult<Offer> {
        let offer = self
            .run_on_offer(
                offer_id,
                NegotiationAction::ChangeOfferStatus {
                    offer_id,
                    caller,
                    to,
                },
            )
            .await?;
        metrics::offer_event(to.as_str());
        tracing::info!(%offer_id, request_id = %offer.request_id, status = %to, "Offer status changed");
        Ok(offer)
    }

    /// Revise a pending offer's content.
    ///
    /// # Errors
    ///
    /// Permission or validation failures, not found, or a store failure.
    #[tracing::instrument(skip(self, changes), fields(user_id = %caller.user_id))]
    pub async fn revise_offer(
        &self,
        caller: Caller,
        offer_id: OfferId,
        changes: OfferChanges,
    ) -> EngineResult<Offer> {
        let offer = self
            .run_on_offer(
                offer_id,
                NegotiationAction::ReviseOffer {
                    offer_id,
                    caller,
                    changes,
                },
            )
            .await?;
        metrics::offer_event("revised");
        Ok(offer)
    }

    /// Hard-delete a pending offer.
    ///
    /// # Errors
    ///
    /// Permission failures, not found, or a store failure.
    #[tracing::instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn delete_offer(&self, caller: Caller, offer_id: OfferId) -> EngineResult<()> {
        self.run(
            Locate::Offer(offer_id),
            vec![NegotiationAction::DeleteOffer { offer_id, caller }],
        )
        .await?;
        metrics::offer_event("deleted");
        tracing::info!(%offer_id, "Offer deleted");
        Ok(())
    }
}
