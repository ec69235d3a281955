//! # Inkmatch Core
//!
//! Core traits for the Inkmatch negotiation and scheduling engine.
//!
//! The engine follows a "Functional Core, Imperative Shell" split:
//!
//! - **State**: a snapshot of the rows a single operation touches, loaded (and
//!   locked) inside one store transaction
//! - **Action**: a command against that snapshot (accept an offer, book a slot,
//!   apply a payment confirmation)
//! - **Reducer**: pure function `(State, Action, Environment) → Result<Effects>`
//! - **Effect**: description of a side effect the shell performs inside the
//!   same transaction (emit a notification, delete a row)
//! - **Environment**: injected dependencies such as the clock
//!
//! The shell loads the state, runs the reducer, persists whatever the reducer
//! changed, executes the effects and commits. A reducer that returns `Err`
//! leaves the state untouched and the shell rolls the transaction back.
//!
//! ## Example
//!
//! ```
//! use inkmatch_core::{reducer::Reducer, SmallVec};
//!
//! struct Counter;
//!
//! impl Reducer for Counter {
//!     type State = u32;
//!     type Action = u32;
//!     type Environment = ();
//!     type Effect = ();
//!     type Error = &'static str;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut u32,
//!         action: u32,
//!         _env: &(),
//!     ) -> Result<SmallVec<[(); 4]>, &'static str> {
//!         *state = state.checked_add(action).ok_or("overflow")?;
//!         Ok(SmallVec::new())
//!     }
//! }
//!
//! let mut state = 1;
//! assert!(Counter.reduce(&mut state, 2, &()).is_ok());
//! assert_eq!(state, 3);
//! ```

pub use chrono::{DateTime, Utc};
pub use smallvec::{smallvec, SmallVec};

/// Reducer module - the core trait for business decisions
///
/// Reducers contain all transition rules and are deterministic and testable
/// without a database.
pub mod reducer {
    use smallvec::SmallVec;

    /// Effects returned by a single reduction. Most transitions emit one or
    /// two notifications, so four inline slots avoid heap allocation.
    pub type Effects<E> = SmallVec<[E; 4]>;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The snapshot this reducer operates on
    /// - `Action`: The commands this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Effect`: Side effect descriptions executed by the shell
    /// - `Error`: Typed rejection returned when an action is not allowed
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// The effect descriptions this reducer returns
        type Effect;

        /// The rejection type for invalid actions
        type Error;

        /// Reduce an action into state changes and effects
        ///
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is not permitted. The state
        /// must not have been modified in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<Effects<Self::Effect>, Self::Error>;
    }
}

/// Environment module - Dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use inkmatch_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
