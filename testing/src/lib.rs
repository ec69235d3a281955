//! # Inkmatch Testing
//!
//! Testing utilities and helpers for the Inkmatch transaction engine.
//!
//! This crate provides:
//! - Deterministic clocks (`FixedClock`, `ManualClock`)
//! - A Given-When-Then harness for reducers (`ReducerTest`)
//! - Effect assertion helpers
//! - Opt-in tracing output for tests
//!
//! ## Example
//!
//! ```ignore
//! use inkmatch_testing::{test_clock, ReducerTest};
//!
//! ReducerTest::new(NegotiationReducer::new())
//!     .with_env(NegotiationEnvironment::new(Arc::new(test_clock())))
//!     .given_state(state)
//!     .when_action(NegotiationAction::ChangeOfferStatus { offer_id, caller, to: OfferStatus::Accepted })
//!     .then_state(|state| assert_eq!(state.request.status, RequestStatus::InProgress))
//!     .run();
//! ```


use chrono::{DateTime, Duration, Utc};
use inkmatch_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use inkmatch_testing::mocks::FixedClock;
    /// use inkmatch_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that tests move forward explicitly.
    ///
    /// Used where a scenario spans "before" and "after" a booking starts.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock positioned at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward by `by`
        pub fn advance(&self, by: Duration) {
            if let Ok(mut time) = self.time.lock() {
                *time += by;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time.lock().map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a test subscriber once per process.
///
/// Honours `RUST_LOG`; output is captured by the test harness unless
/// `--nocapture` is passed.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use reducer_test::{assertions, ReducerTest};
