//! Services: the imperative shell around the reducers.
//!
//! Every mutating operation is one transaction script:
//!
//! 1. begin a store transaction
//! 2. lock and load the rows the decision depends on
//! 3. run the reducer over the snapshot
//! 4. persist the rows the reducer changed
//! 5. execute the returned effects inside the same transaction
//! 6. commit
//!
//! A reducer rejection or a store failure drops the transaction, which rolls
//! it back; no partial transition is ever committed. No in-process lock is
//! held across an await, and no service caches entity state between calls.

pub mod negotiation;
pub mod notifications;
pub mod payments;
pub mod scheduling;

pub use negotiation::NegotiationService;
pub use notifications::NotificationService;
pub use payments::{PaymentService, ReconcileReceipt};
pub use scheduling::SchedulingService;

use crate::metrics;
use crate::store::{StoreResult, StoreTransaction};
use crate::types::{Notification, NotificationDraft, NotificationType};
use chrono::{DateTime, Utc};

/// Record a notification draft inside `tx`.
async fn record_notification(
    tx: &mut dyn StoreTransaction,
    draft: NotificationDraft,
    now: DateTime<Utc>,
) -> StoreResult<NotificationType> {
    let notification = Notification::from_draft(draft, now);
    tx.insert_notification(&notification).await?;
    tracing::debug!(
        notification_id = %notification.id,
        recipient_id = %notification.recipient_id,
        kind = %notification.kind,
        "Notification recorded"
    );
    Ok(notification.kind)
}

/// Count notifications once their transaction committed.
fn count_notifications(kinds: &[NotificationType]) {
    for kind in kinds {
        metrics::notification(kind.as_str());
    }
}
