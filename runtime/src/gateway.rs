//! Trigger front door: builds requests from endpoint configuration and
//! hands them to the [`Dispatcher`].
//!
//! # Example
//!
//! ```rust,no_run
//! use inflight_core::config::DispatcherConfig;
//! use inflight_core::notification::NullSink;
//! use inflight_runtime::{Gateway, HttpTransport};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DispatcherConfig::from_toml_str(
//!     r#"
//!     [[endpoints]]
//!     urls = ["https://api.example.com/search?q={query}"]
//!
//!     [endpoints.channel]
//!     name = "search"
//!     policy = "send_latest"
//!     "#,
//! )?;
//!
//! let gateway = Gateway::from_config(&config, Arc::new(HttpTransport::new()), Arc::new(NullSink))?;
//! let outcome = gateway
//!     .trigger(&"search".into(), json!({"query": "rust"}), &json!({}))
//!     .await;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

use crate::debounce::{Debouncer, PendingTriggers};
use crate::dispatcher::Dispatcher;
use inflight_core::config::{ChannelSettings, DispatcherConfig, EndpointConfig};
use inflight_core::request::TemplateRequestBuilder;
use inflight_core::{
    ChannelName, ConfigurationError, DispatchOutcome, EventSink, RequestBuilder, Transport, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone)]
struct Endpoint {
    settings: ChannelSettings,
    builder: Arc<dyn RequestBuilder>,
    debouncer: Option<Debouncer>,
}

/// Routes triggers by channel name to their endpoint's request builder.
#[derive(Clone)]
pub struct Gateway {
    dispatcher: Dispatcher,
    endpoints: Arc<HashMap<ChannelName, Endpoint>>,
}

impl Gateway {
    /// Wrap a dispatcher with no endpoints
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            endpoints: Arc::new(HashMap::new()),
        }
    }

    /// Build a gateway and its dispatcher from configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error in `config`.
    pub fn from_config(
        config: &DispatcherConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let mut dispatcher = Dispatcher::new(transport, sink);
        if config.trace {
            dispatcher = dispatcher.with_tracing();
        }

        let mut gateway = Self::new(dispatcher);
        for endpoint in &config.endpoints {
            gateway = gateway.with_endpoint(endpoint);
        }

        tracing::info!(endpoints = config.endpoints.len(), trace = config.trace, "gateway configured");
        Ok(gateway)
    }

    /// Add an endpoint using the template request builder
    #[must_use]
    pub fn with_endpoint(self, endpoint: &EndpointConfig) -> Self {
        let builder = Arc::new(TemplateRequestBuilder::new(endpoint));
        self.with_builder(endpoint.channel.clone(), builder)
    }

    /// Add an endpoint with a custom request builder.
    ///
    /// Registers the channel on the dispatcher and, when the settings carry
    /// a debounce window, a [`Debouncer`] as the channel's pending hook.
    #[must_use]
    pub fn with_builder(mut self, settings: ChannelSettings, builder: Arc<dyn RequestBuilder>) -> Self {
        self.dispatcher.register(settings.clone());

        let debouncer = settings.debounce().map(|window| {
            let debouncer = Debouncer::new(window);
            let hook: Arc<dyn PendingTriggers> = Arc::new(debouncer.clone());
            self.dispatcher.add_pending_hook(&settings.name, hook);
            debouncer
        });

        let mut endpoints = HashMap::clone(&self.endpoints);
        endpoints.insert(
            settings.name.clone(),
            Endpoint {
                settings,
                builder,
                debouncer,
            },
        );
        self.endpoints = Arc::new(endpoints);
        self
    }

    /// The underlying dispatcher
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Build and dispatch a request for `trigger`.
    ///
    /// A request that cannot be built creates no ledger entry; the error is
    /// reported as `Errored` if the channel notifies errors and dropped
    /// otherwise. Either way the outcome is `NoData`.
    pub async fn trigger(&self, channel: &ChannelName, trigger: Value, state: &Value) -> DispatchOutcome {
        let Some(endpoint) = self.endpoints.get(channel) else {
            tracing::warn!(%channel, "trigger for unknown channel ignored");
            return DispatchOutcome::NoData;
        };

        match endpoint.builder.build(&trigger, state) {
            Ok(request) => self.dispatcher.dispatch(channel, request).await,
            Err(error) => {
                tracing::debug!(%channel, %error, "request could not be built");
                self.dispatcher.report_error(&endpoint.settings, error);
                DispatchOutcome::NoData
            },
        }
    }

    /// Trigger through the channel's debouncer.
    ///
    /// Only the last call within the debounce window dispatches; the
    /// returned task resolves to `true` if this call's trigger ran.
    /// Channels without a window dispatch immediately.
    pub fn trigger_debounced(&self, channel: &ChannelName, trigger: Value, state: Value) -> JoinHandle<bool> {
        let gateway = self.clone();
        let owned = channel.clone();
        let invocation = async move {
            let _ = gateway.trigger(&owned, trigger, &state).await;
        };

        match self.endpoints.get(channel).and_then(|e| e.debouncer.as_ref()) {
            Some(debouncer) => debouncer.schedule(invocation),
            None => tokio::spawn(async move {
                invocation.await;
                true
            }),
        }
    }

    /// Cancel the channel's live requests and pending debounced triggers.
    pub fn cancel(&self, channel: &ChannelName, reason: Option<&str>) -> bool {
        self.dispatcher.cancel(channel, reason)
    }

    /// Reset the dispatcher.
    pub fn reset_all(&self) {
        self.dispatcher.reset_all();
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("dispatcher", &self.dispatcher)
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .finish()
    }
}
