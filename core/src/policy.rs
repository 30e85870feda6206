//! Overlap policies and the overlap resolver.
//!
//! The resolver is a pure function of the channel's configured policy and
//! the number of live requests on that channel:
//!
//! | Policy | no live request | live request present |
//! |---|---|---|
//! | [`OverlapPolicy::SendAll`] | `Admit` | `Admit` |
//! | [`OverlapPolicy::Ignore`] | `Admit` | `Skip` |
//! | [`OverlapPolicy::SendLatest`] | `Admit` | `StoreAndSkip` |
//! | [`OverlapPolicy::CancelPending`] | `Admit` | `CancelThenAdmit` |

use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens when a trigger arrives while a request for the same channel
/// is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Run every trigger concurrently
    SendAll,
    /// Drop the new trigger silently
    Ignore,
    /// Remember the newest trigger and run it once the live request settles
    SendLatest,
    /// Cancel whatever is live, then run the new trigger
    #[default]
    CancelPending,
}

/// Resolver decision for one incoming trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapAction {
    /// Register and run the request now
    Admit,
    /// Save the trigger as the channel's pending supersede record; do not run now
    StoreAndSkip,
    /// Cancel the live request, then register and run the new one
    CancelThenAdmit,
    /// Drop the trigger
    Skip,
}

impl OverlapPolicy {
    /// Decide what to do with a trigger given the channel's live request count.
    ///
    /// Evaluated once per trigger. `CancelThenAdmit` cancels whatever is
    /// live, not specifically the oldest or newest record.
    #[must_use]
    pub const fn decide(self, live_count: usize) -> OverlapAction {
        if live_count == 0 {
            return OverlapAction::Admit;
        }

        match self {
            Self::SendAll => OverlapAction::Admit,
            Self::Ignore => OverlapAction::Skip,
            Self::SendLatest => OverlapAction::StoreAndSkip,
            Self::CancelPending => OverlapAction::CancelThenAdmit,
        }
    }

    /// Whether several live records may coexist on one channel.
    #[must_use]
    pub const fn allows_concurrent(self) -> bool {
        matches!(self, Self::SendAll)
    }
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendAll => write!(f, "send_all"),
            Self::Ignore => write!(f, "ignore"),
            Self::SendLatest => write!(f, "send_latest"),
            Self::CancelPending => write!(f, "cancel_pending"),
        }
    }
}
