//! # Inflight Runtime
//!
//! Admission control and overlap resolution in front of an HTTP client.
//!
//! Every request is tagged with a logical channel. Before a request runs,
//! the channel's overlap policy is consulted against the ledger of requests
//! already in flight on that channel:
//!
//! - **`SendAll`**: no admission control
//! - **`Ignore`**: drop the new trigger while one is in flight
//! - **`SendLatest`**: remember only the newest trigger and re-issue it when
//!   the current request completes
//! - **`CancelPending`** (default): cancel what is in flight, then run
//!
//! ## Core Components
//!
//! - [`RequestLedger`]: per-channel in-flight records and pending supersede records
//! - [`Dispatcher`]: policy resolution, transport calls, fan-out, notifications,
//!   re-issue and explicit cancellation
//! - [`Gateway`]: builds requests from configuration and routes triggers
//! - [`HttpTransport`]: the reqwest-backed transport
//!
//! ## Example
//!
//! ```ignore
//! use inflight_core::config::ChannelSettings;
//! use inflight_core::{OverlapPolicy, PreparedRequest};
//! use inflight_runtime::{Dispatcher, HttpTransport};
//!
//! let dispatcher = Dispatcher::new(Arc::new(HttpTransport::new()), sink)
//!     .with_channel(ChannelSettings::new("search").with_policy(OverlapPolicy::SendLatest));
//!
//! let outcome = dispatcher
//!     .dispatch(&"search".into(), PreparedRequest::single(trigger, params, url))
//!     .await;
//! ```

/// Request ledger: in-flight and pending supersede records per channel
pub mod ledger;

/// Dispatch coordinator and cancellation path
pub mod dispatcher;

/// Trailing-edge debouncing of triggers
pub mod debounce;

/// Configuration-driven trigger routing
pub mod gateway;

/// reqwest transport
pub mod http;

/// Prometheus metrics for observability
pub mod metrics;

/// `tracing`-backed trace sink
pub mod trace;

pub use debounce::{Debouncer, PendingTriggers};
pub use dispatcher::{Dispatcher, Transform};
pub use gateway::Gateway;
pub use http::HttpTransport;
pub use ledger::{InFlightRecord, PendingSupersede, RecordId, RequestLedger};
pub use trace::LogTraceSink;
