//! HTTP server: shared state, router and the readiness probe.

pub mod health;
pub mod routes;
pub mod state;

pub use health::readiness_check;
pub use routes::build_router;
pub use state::AppState;
