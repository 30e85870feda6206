//! Error taxonomy for request admission and dispatch.
//!
//! Errors never cross the dispatch boundary as `Err`. They are delivered to
//! the event sink inside [`Notification::Errored`](crate::notification::Notification::Errored)
//! and the dispatch call resolves to a [`DispatchOutcome`](crate::DispatchOutcome).
//!
//! | Error | Origin | Surfaced as |
//! |---|---|---|
//! | [`ConfigurationError`] | request builder, config loading | `Errored` (if the channel notifies errors) |
//! | [`TransportError`] | HTTP transport | `Errored`, except cancellation |
//! | [`LedgerError`] | ledger invariant violation | `error!` log only |

use crate::channel::ChannelName;
use thiserror::Error;

/// A trigger could not be turned into a valid request, or a configuration
/// document could not be loaded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A `{name}` placeholder had no value in the trigger or the state
    #[error("Missing required parameter '{name}'")]
    MissingParameter {
        /// Placeholder name
        name: String,
    },

    /// A URL template is malformed
    #[error("Invalid URL template '{template}': {reason}")]
    InvalidTemplate {
        /// The offending template
        template: String,
        /// What is wrong with it
        reason: String,
    },

    /// The endpoint resolved to zero URLs
    #[error("Endpoint has no URLs")]
    NoUrls,

    /// A configuration document failed to parse
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// A configuration document parsed but is inconsistent
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// The underlying call failed.
///
/// `Canceled` is a terminal state rather than a failure. The dispatcher
/// checks [`TransportError::is_cancellation`] (and the transport's own
/// predicate) before treating anything as an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The call was aborted through its cancel handle
    #[error("Request canceled{}", reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Canceled {
        /// Optional cancellation reason
        reason: Option<String>,
    },

    /// The server answered with a non-success status
    #[error("Request to {url} failed with status {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The request could not be sent or the connection failed
    #[error("Network error for {url}: {message}")]
    Network {
        /// Requested URL
        url: String,
        /// Underlying error message
        message: String,
    },

    /// The response body could not be decoded
    #[error("Failed to decode response from {url}: {message}")]
    Decode {
        /// Requested URL
        url: String,
        /// Underlying error message
        message: String,
    },
}

impl TransportError {
    /// Whether this error is the cancellation marker.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }
}

/// Payload of an error notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The trigger could not be built into a request
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The transport call failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Ledger invariant violations.
///
/// These indicate a bookkeeping bug: the resolver was bypassed before a
/// ledger mutation. They are never user-recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A second live record was registered on a channel whose policy allows one
    #[error("Channel '{channel}' already has a live request")]
    DuplicateEntry {
        /// The channel in question
        channel: ChannelName,
    },
}
