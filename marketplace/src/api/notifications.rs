//! Notification endpoints:
//! - GET /notifications?unread_only=true - The caller's notifications
//! - PUT /notifications/:id/read - Mark one as read

use crate::auth::AuthenticatedCaller;
use crate::server::state::AppState;
use crate::types::{Notification, NotificationId};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use inkmatch_web::AppError;
use serde::Deserialize;

/// Query of `GET /notifications`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Only unread notifications
    #[serde(default)]
    pub unread_only: bool,
}

/// The caller's notifications, newest first.
pub async fn list_notifications(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Notification>>, AppError> {
    Ok(Json(
        state
            .notifications
            .list(caller, query.unread_only)
            .await?,
    ))
}

/// Mark a notification as read.
pub async fn mark_read(
    AuthenticatedCaller(caller): AuthenticatedCaller,
    State(state): State<AppState>,
    Path(notification_id): Path<NotificationId>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(
        state
            .notifications
            .mark_read(caller, notification_id)
            .await?,
    ))
}
