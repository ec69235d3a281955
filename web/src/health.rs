//! Health check endpoints.

use axum::{http::StatusCode, Json};
use serde::Serialize;

/// Liveness probe. Does not touch dependencies.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness report for a single dependency.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReadinessReport {
    /// Component that was probed (e.g. `store`).
    pub component: &'static str,
    /// `ready` or `unavailable`.
    pub status: &'static str,
    /// Failure detail, omitted when ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ReadinessReport {
    /// Build a report from a probe result. 503 when the probe failed.
    #[must_use]
    pub fn from_probe<E: std::fmt::Display>(
        component: &'static str,
        probe: Result<(), E>,
    ) -> (StatusCode, Json<Self>) {
        match probe {
            Ok(()) => (
                StatusCode::OK,
                Json(Self {
                    component,
                    status: "ready",
                    message: None,
                }),
            ),
            Err(error) => {
                tracing::warn!(component, error = %error, "Readiness probe failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(Self {
                        component,
                        status: "unavailable",
                        message: Some(error.to_string()),
                    }),
                )
            }
        }
    }
}
