//! Trace sink forwarding request transitions to `tracing`.

use inflight_core::ChannelName;
use inflight_core::trace::{TraceSink, Transition};

/// Emits each transition as a `trace`-level event.
///
/// Enable with `RUST_LOG=inflight_runtime=trace`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn transition(&self, channel: &ChannelName, transition: Transition) {
        tracing::trace!(channel = %channel, %transition, "request transition");
    }
}
