//! Axum integration for the Inkmatch transaction engine.
//!
//! Handlers stay thin: they authenticate the caller, build an action, hand it
//! to a service that runs the reducer inside a store transaction, and map the
//! typed outcome onto an HTTP response.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Imperative Shell (Axum)         │  ← HTTP, JSON, auth
//! │  - Request parsing                      │  ← Correlation, logging
//! │  - Store transactions                   │  ← Effects execution
//! ├─────────────────────────────────────────┤
//! │         Functional Core                 │
//! │  - Reducers over state snapshots        │  ← No I/O
//! │  - Effect descriptions (values)         │
//! └─────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod correlation;
pub mod error;
pub mod health;

pub use correlation::{propagate_correlation_id, CorrelationId, CORRELATION_ID_HEADER};
pub use error::AppError;
pub use health::{health_check, ReadinessReport};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
