//! Declarative configuration for channels and endpoints.
//!
//! Configuration is loaded once, at (re)configuration time. Policies are
//! fixed per channel from then on.
//!
//! # Example
//!
//! ```
//! use inflight_core::config::DispatcherConfig;
//! use inflight_core::policy::OverlapPolicy;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DispatcherConfig::from_toml_str(r#"
//!     trace = true
//!
//!     [[endpoints]]
//!     base_url = "https://api.example.com"
//!     urls = ["/users/{id}"]
//!     params = ["id"]
//!
//!     [endpoints.channel]
//!     name = "user"
//!     policy = "send_latest"
//!     notify_canceled = true
//! "#)?;
//!
//! assert!(config.trace);
//! assert_eq!(config.endpoints[0].channel.policy, OverlapPolicy::SendLatest);
//! # Ok(())
//! # }
//! ```

use crate::channel::ChannelName;
use crate::error::ConfigurationError;
use crate::policy::OverlapPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

const fn default_true() -> bool {
    true
}

/// Per-channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Channel name
    pub name: ChannelName,

    /// Overlap policy
    #[serde(default)]
    pub policy: OverlapPolicy,

    /// Whether failures are reported as `Errored` notifications.
    ///
    /// When false, failures are dropped silently (logged only).
    #[serde(default = "default_true")]
    pub notify_errors: bool,

    /// Whether explicit cancellation emits a `Canceled` notification
    #[serde(default)]
    pub notify_canceled: bool,

    /// Trailing-edge debounce window for debounced triggers, in milliseconds
    #[serde(default)]
    pub debounce_ms: Option<u64>,
}

impl ChannelSettings {
    /// Settings with the default policy (`CancelPending`), error notifications
    /// on, cancel notifications off and no debounce.
    #[must_use]
    pub fn new(name: impl Into<ChannelName>) -> Self {
        Self {
            name: name.into(),
            policy: OverlapPolicy::default(),
            notify_errors: true,
            notify_canceled: false,
            debounce_ms: None,
        }
    }

    /// Set the overlap policy
    #[must_use]
    pub const fn with_policy(mut self, policy: OverlapPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable or disable error notifications
    #[must_use]
    pub const fn with_notify_errors(mut self, enabled: bool) -> Self {
        self.notify_errors = enabled;
        self
    }

    /// Enable or disable cancel notifications
    #[must_use]
    pub const fn with_notify_canceled(mut self, enabled: bool) -> Self {
        self.notify_canceled = enabled;
        self
    }

    /// Set the debounce window
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // windows beyond u64 millis are not meaningful
    pub const fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce_ms = Some(window.as_millis() as u64);
        self
    }

    /// Debounce window, if configured
    #[must_use]
    pub const fn debounce(&self) -> Option<Duration> {
        match self.debounce_ms {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        }
    }
}

/// One endpoint: a channel plus how to build its requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Channel settings
    pub channel: ChannelSettings,

    /// Prefix for relative URL templates
    #[serde(default)]
    pub base_url: Option<String>,

    /// URL templates with `{name}` placeholders; more than one means fan-out
    pub urls: Vec<String>,

    /// Trigger/state fields copied into the request parameters
    #[serde(default)]
    pub params: Vec<String>,
}

impl EndpointConfig {
    /// Endpoint with a single URL template
    #[must_use]
    pub fn new(channel: ChannelSettings, url: impl Into<String>) -> Self {
        Self {
            channel,
            base_url: None,
            urls: vec![url.into()],
            params: Vec::new(),
        }
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Add another URL template (fan-out)
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    /// Declare a parameter field
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>) -> Self {
        self.params.push(name.into());
        self
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Report every state transition to the trace sink
    #[serde(default)]
    pub trace: bool,

    /// Configured endpoints
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl DispatcherConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Parse`] if the document is not valid TOML
    /// for this schema, or [`ConfigurationError::Validation`] if it is
    /// inconsistent (see [`validate`](Self::validate)).
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigurationError> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Enable or disable transition tracing
    #[must_use]
    pub const fn with_trace(mut self, enabled: bool) -> Self {
        self.trace = enabled;
        self
    }

    /// Add an endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Check channel names are unique and every endpoint has a URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Validation`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            let name = &endpoint.channel.name;
            if name.as_str().is_empty() {
                return Err(ConfigurationError::Validation(
                    "channel name must not be empty".to_string(),
                ));
            }
            if !seen.insert(name.clone()) {
                return Err(ConfigurationError::Validation(format!(
                    "duplicate channel '{name}'"
                )));
            }
            if endpoint.urls.is_empty() {
                return Err(ConfigurationError::Validation(format!(
                    "channel '{name}' has no URLs"
                )));
            }
        }
        Ok(())
    }
}
