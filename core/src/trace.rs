//! Diagnostic hook for request state transitions.
//!
//! Each dispatched trigger moves through:
//!
//! ```text
//! Resolving ──► Admitted ──► Running ──► Succeeded ─┐
//!     │                         │    └─► Failed ────┼─► Superseding ──► Running ...
//!     ├──► Skipped              └──────► Canceled   │
//!     └──► Stored                                   └─► Retired
//! ```
//!
//! Tracing has no effect on behavior.

use crate::channel::ChannelName;
use std::fmt;

/// One state transition of a dispatched trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The overlap resolver is consulted
    Resolving,
    /// A record was registered in the ledger
    Admitted,
    /// Live records were canceled to make room (`CancelPending`)
    CanceledPrevious,
    /// The trigger was dropped (`Ignore`)
    Skipped,
    /// The trigger became the channel's pending supersede record (`SendLatest`)
    Stored,
    /// The transport call is in flight
    Running,
    /// The call completed with data
    Succeeded,
    /// The call failed
    Failed,
    /// The call settled as canceled
    Canceled,
    /// A pending supersede record is being promoted and re-issued
    Superseding,
    /// The record was removed from the ledger
    Retired,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::Admitted => "admitted",
            Self::CanceledPrevious => "canceled_previous",
            Self::Skipped => "skipped",
            Self::Stored => "stored",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Superseding => "superseding",
            Self::Retired => "retired",
        };
        f.write_str(name)
    }
}

/// Receives transitions when tracing is enabled.
pub trait TraceSink: Send + Sync {
    /// Report one transition
    fn transition(&self, channel: &ChannelName, transition: Transition);
}
