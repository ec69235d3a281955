use super::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use inkmatch_web::ReadinessReport;

/// Readiness probe: 200 once the store answers, 503 otherwise.
///
/// ```bash
/// curl http://localhost:8080/ready
/// # {"component":"store","status":"ready"}
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessReport>) {
    ReadinessReport::from_probe("store", state.store.ping().await)
}
