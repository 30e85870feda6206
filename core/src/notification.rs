//! Notifications announced to the event sink.
//!
//! For a single channel, notifications are emitted in the order events
//! actually occur. A superseding re-issue's `Started` always follows the
//! original request's terminal notification.

use crate::channel::ChannelName;
use crate::error::DispatchError;
use crate::transport::RawResult;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// A request lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A request was admitted and is about to run
    Started {
        /// Channel of the request
        channel: ChannelName,
        /// The trigger event that caused it
        trigger: Value,
    },

    /// The request completed with data
    Succeeded {
        /// Channel of the request
        channel: ChannelName,
        /// Transformed result
        data: Value,
        /// Untransformed response(s)
        raw: RawResult,
    },

    /// The request (or its construction) failed
    Errored {
        /// Channel of the request
        channel: ChannelName,
        /// What went wrong
        error: DispatchError,
    },

    /// An explicit cancel found and canceled a live request
    Canceled {
        /// Channel of the canceled request
        channel: ChannelName,
        /// Reason supplied by the caller
        reason: Option<String>,
    },
}

impl Notification {
    /// The channel this notification belongs to
    #[must_use]
    pub const fn channel(&self) -> &ChannelName {
        match self {
            Self::Started { channel, .. }
            | Self::Succeeded { channel, .. }
            | Self::Errored { channel, .. }
            | Self::Canceled { channel, .. } => channel,
        }
    }

    /// Whether this ends a request's lifecycle
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started { .. })
    }

    /// Short lowercase name, for logs and metrics labels
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Succeeded { .. } => "succeeded",
            Self::Errored { .. } => "errored",
            Self::Canceled { .. } => "canceled",
        }
    }
}

/// Observer receiving request lifecycle notifications (a store, a dispatcher, a UI).
///
/// `notify` is synchronous and must not block for long: the dispatcher calls
/// it inline to preserve per-channel ordering.
pub trait EventSink: Send + Sync {
    /// Deliver one notification
    fn notify(&self, notification: Notification);
}

impl<F> EventSink for F
where
    F: Fn(Notification) + Send + Sync,
{
    fn notify(&self, notification: Notification) {
        self(notification);
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _notification: Notification) {}
}

/// Sink that forwards to several sinks in registration order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Arc<Mutex<Vec<Arc<dyn EventSink>>>>,
}

impl FanoutSink {
    /// Create an empty fan-out sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a downstream sink
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.push(sink);
        }
    }
}

impl EventSink for FanoutSink {
    fn notify(&self, notification: Notification) {
        let sinks = match self.sinks.lock() {
            Ok(sinks) => sinks.clone(),
            Err(_) => return,
        };
        for sink in sinks {
            sink.notify(notification.clone());
        }
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.sinks.lock().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("FanoutSink").field("sinks", &count).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_sink_and_fanout() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let closure_sink = move |_n: Notification| {
            counter.fetch_add(1, Ordering::SeqCst);
        };

        let fanout = FanoutSink::new();
        fanout.subscribe(Arc::new(closure_sink));
        fanout.subscribe(Arc::new(NullSink));

        fanout.notify(Notification::Started {
            channel: ChannelName::new("users"),
            trigger: json!({"id": 1}),
        });

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_kind_and_terminal() {
        let started = Notification::Started {
            channel: ChannelName::new("users"),
            trigger: Value::Null,
        };
        let canceled = Notification::Canceled {
            channel: ChannelName::new("users"),
            reason: None,
        };
        assert_eq!(started.kind(), "started");
        assert!(!started.is_terminal());
        assert!(canceled.is_terminal());
        assert_eq!(canceled.channel().as_str(), "users");
    }
}
