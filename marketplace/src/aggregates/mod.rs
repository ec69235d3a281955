//! Reducers for the marketplace transaction engine.
//!
//! Each reducer decides one family of transitions over a state snapshot that
//! the service layer loaded and locked inside a store transaction:
//! - Negotiation: request and offer lifecycle, including the accept cascade
//! - Schedule: appointment booking, rescheduling and conflict detection
//! - Payment: payment-intent progress and idempotent reconciliation
//!
//! Reducers never perform I/O. They mutate the snapshot and return effect
//! descriptions (notifications to record, rows to delete, discrepancies to
//! log); the shell persists the snapshot diff and executes the effects before
//! committing.

pub mod negotiation;
pub mod payment;
pub mod schedule;

pub use negotiation::{
    NegotiationAction, NegotiationEffect, NegotiationEnvironment, NegotiationError,
    NegotiationReducer, NegotiationState,
};
pub use payment::{
    PaymentAction, PaymentEffect, PaymentEnvironment, PaymentError, PaymentReducer, PaymentState,
    ReconcileDisposition,
};
pub use schedule::{
    ScheduleAction, ScheduleEffect, ScheduleEnvironment, ScheduleError, ScheduleReducer,
    ScheduleState,
};
