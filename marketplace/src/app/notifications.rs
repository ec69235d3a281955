use crate::error::{EngineError, EngineResult};
use crate::store::MarketplaceStore;
use crate::types::{Caller, Notification, NotificationId};
use std::sync::Arc;

/// Recipient-side access to recorded notifications.
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn MarketplaceStore>,
}

impl NotificationService {
    /// Creates a new `NotificationService`
    #[must_use]
    pub fn new(store: Arc<dyn MarketplaceStore>) -> Self {
        Self { store }
    }

    /// The caller's notifications, newest first
    ///
    /// # Errors
    ///
    /// Store failure.
    #[tracing::instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn list(&self, caller: Caller, unread_only: bool) -> EngineResult<Vec<Notification>> {
        let mut tx = self.store.begin().await?;
        let notifications = tx.list_notifications(caller.user_id, unread_only).await?;
        tx.rollback().await?;
        Ok(notifications)
    }

    /// Mark one of the caller's notifications as read
    ///
    /// # Errors
    ///
    /// Not found, forbidden for anyone but the recipient, or a store failure.
    #[tracing::instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn mark_read(
        &self,
        caller: Caller,
        notification_id: NotificationId,
    ) -> EngineResult<Notification> {
        let mut tx = self.store.begin().await?;
        let mut notification = tx
            .lock_notification(notification_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Notification", notification_id))?;
        if notification.recipient_id != caller.user_id {
            return Err(EngineError::Forbidden(
                "Only the recipient can mark a notification as read",
            ));
        }
        if !notification.read {
            tx.mark_notification_read(notification_id).await?;
            notification.read = true;
        }
        tx.commit().await?;
        Ok(notification)
    }
}
