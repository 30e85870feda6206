//! # Inflight Core
//!
//! Core types for the inflight admission-control layer.
//!
//! inflight sits in front of an HTTP client and decides, for each named
//! request channel, whether a newly triggered request runs now, replaces
//! the live one, waits behind it, or is dropped.
//!
//! ## Core Concepts
//!
//! - **Channel**: Named logical endpoint; all its requests share one overlap policy
//! - **Overlap Policy**: `SendAll`, `Ignore`, `SendLatest`, `CancelPending`
//! - **Resolver**: Pure function `(policy, live count) → action`
//! - **Notification**: `Started`, `Succeeded`, `Errored`, `Canceled`, delivered to an [`EventSink`](notification::EventSink)
//! - **Transport**: Injected capability `{send, is_cancellation, make_cancel_handle}`
//! - **Request Builder**: Turns a trigger event into parameters and URLs
//!
//! The ledger, dispatcher and cancellation path live in `inflight-runtime`.
//!
//! ## Example
//!
//! ```
//! use inflight_core::policy::{OverlapAction, OverlapPolicy};
//!
//! assert_eq!(OverlapPolicy::SendLatest.decide(0), OverlapAction::Admit);
//! assert_eq!(OverlapPolicy::SendLatest.decide(1), OverlapAction::StoreAndSkip);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde_json::Value;

/// Channel names
pub mod channel;

/// Channel and endpoint configuration
pub mod config;

/// Error taxonomy
pub mod error;

/// Notifications and event sinks
pub mod notification;

/// Overlap policies and the resolver
pub mod policy;

/// Request descriptors and builders
pub mod request;

/// Transition tracing hook
pub mod trace;

/// Transport capability and cancel handles
pub mod transport;

pub use channel::ChannelName;
pub use error::{ConfigurationError, DispatchError, LedgerError, TransportError};
pub use notification::{EventSink, Notification};
pub use outcome::DispatchOutcome;
pub use policy::{OverlapAction, OverlapPolicy};
pub use request::{PreparedRequest, RequestBuilder};
pub use transport::{CancelHandle, RawResult, Response, Transport};

/// Outcome module - What a dispatch call resolves to
///
/// Dispatch never fails across its boundary. Failures travel through the
/// event sink; the caller only learns which category the call ended in.
pub mod outcome {
    use serde_json::Value;

    /// Result of one dispatch call.
    #[derive(Debug, Clone, PartialEq)]
    pub enum DispatchOutcome {
        /// The request (or the request that superseded it) produced data
        Data(Value),
        /// The request failed; the error was reported through the sink
        NoData,
        /// The request was canceled; nothing was reported as an error
        Canceled,
        /// The trigger was not run: dropped (`Ignore`) or stored to run later (`SendLatest`)
        Skipped,
    }

    impl DispatchOutcome {
        /// The data, if any
        #[must_use]
        pub const fn data(&self) -> Option<&Value> {
            match self {
                Self::Data(value) => Some(value),
                _ => None,
            }
        }

        /// Consume the outcome, keeping only data
        #[must_use]
        pub fn into_data(self) -> Option<Value> {
            match self {
                Self::Data(value) => Some(value),
                _ => None,
            }
        }

        /// Whether the call ended canceled
        #[must_use]
        pub const fn is_canceled(&self) -> bool {
            matches!(self, Self::Canceled)
        }

        /// Whether the trigger was absorbed without running
        #[must_use]
        pub const fn is_skipped(&self) -> bool {
            matches!(self, Self::Skipped)
        }
    }
}

/// Environment module - Injected time source
///
/// All external dependencies are abstracted behind traits so tests can
/// substitute deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
