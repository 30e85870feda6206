//! Prometheus metrics for request admission and dispatch.
//!
//! Every metric carries a `channel` label.
//!
//! # Example
//!
//! ```rust,no_run
//! use inflight_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // Serve this from the application's own scrape endpoint
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use inflight_core::ChannelName;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder handle.
///
/// Installs the global recorder. Serving [`render`](Self::render) output is
/// left to the embedding application.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that is not yet installed.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. An
    /// already-installed recorder (common in tests) is not an error.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "inflight_requests_admitted_total",
        "Requests admitted to run"
    );
    describe_counter!(
        "inflight_requests_skipped_total",
        "Triggers dropped because the channel was busy (ignore policy)"
    );
    describe_counter!(
        "inflight_requests_superseded_total",
        "Triggers stored as the pending supersede record (send_latest policy)"
    );
    describe_counter!(
        "inflight_requests_reissued_total",
        "Pending supersede records promoted and re-issued"
    );
    describe_counter!(
        "inflight_requests_canceled_total",
        "Requests that settled as canceled"
    );
    describe_counter!(
        "inflight_requests_succeeded_total",
        "Requests that completed with data"
    );
    describe_counter!(
        "inflight_requests_failed_total",
        "Requests that failed for a non-cancellation reason"
    );
    describe_histogram!(
        "inflight_request_duration_seconds",
        "Time from transport call start to settlement"
    );
}

/// Dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    fn bump(name: &'static str, channel: &ChannelName) {
        counter!(name, "channel" => channel.to_string()).increment(1);
    }

    /// Record an admitted request.
    pub fn record_admitted(channel: &ChannelName) {
        Self::bump("inflight_requests_admitted_total", channel);
    }

    /// Record a dropped trigger.
    pub fn record_skipped(channel: &ChannelName) {
        Self::bump("inflight_requests_skipped_total", channel);
    }

    /// Record a trigger stored for later.
    pub fn record_superseded(channel: &ChannelName) {
        Self::bump("inflight_requests_superseded_total", channel);
    }

    /// Record a re-issue.
    pub fn record_reissued(channel: &ChannelName) {
        Self::bump("inflight_requests_reissued_total", channel);
    }

    /// Record a cancellation.
    pub fn record_canceled(channel: &ChannelName, duration: Duration) {
        Self::bump("inflight_requests_canceled_total", channel);
        Self::record_duration(channel, duration);
    }

    /// Record a success.
    pub fn record_succeeded(channel: &ChannelName, duration: Duration) {
        Self::bump("inflight_requests_succeeded_total", channel);
        Self::record_duration(channel, duration);
    }

    /// Record a failure.
    pub fn record_failed(channel: &ChannelName, duration: Duration) {
        Self::bump("inflight_requests_failed_total", channel);
        Self::record_duration(channel, duration);
    }

    fn record_duration(channel: &ChannelName, duration: Duration) {
        histogram!("inflight_request_duration_seconds", "channel" => channel.to_string())
            .record(duration.as_secs_f64());
    }
}
