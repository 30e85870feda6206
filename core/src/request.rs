//! Turning trigger events into transport-level requests.
//!
//! A [`RequestBuilder`] resolves a trigger (plus ambient state) into a
//! [`PreparedRequest`]: the resolved parameters and the URL list. Building
//! fails only for malformed or unresolvable input, with a
//! [`ConfigurationError`]; such a trigger never reaches the ledger.

use crate::config::EndpointConfig;
use crate::error::ConfigurationError;
use crate::transport::CancelHandle;
use serde_json::{Map, Value};

/// A request ready for dispatch.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// The trigger event, kept for re-dispatch and notifications
    pub trigger: Value,
    /// Resolved parameters, compared structurally for supersede decisions
    pub params: Value,
    /// One URL, or several for fan-out
    pub urls: Vec<String>,
    /// Caller-supplied cancel handle; the transport mints one when absent
    pub cancel: Option<CancelHandle>,
}

impl PreparedRequest {
    /// Create a request for one or more URLs
    #[must_use]
    pub fn new(trigger: Value, params: Value, urls: Vec<String>) -> Self {
        Self {
            trigger,
            params,
            urls,
            cancel: None,
        }
    }

    /// Create a single-URL request
    #[must_use]
    pub fn single(trigger: Value, params: Value, url: impl Into<String>) -> Self {
        Self::new(trigger, params, vec![url.into()])
    }

    /// Attach a caller-owned cancel handle
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Whether this request fans out to several URLs
    #[must_use]
    pub fn is_fan_out(&self) -> bool {
        self.urls.len() > 1
    }
}

/// Builds requests from trigger events.
pub trait RequestBuilder: Send + Sync {
    /// Resolve `trigger` against `state` into a request.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when a required value is missing or a
    /// template is malformed.
    fn build(&self, trigger: &Value, state: &Value) -> Result<PreparedRequest, ConfigurationError>;
}

/// Builder driven by an [`EndpointConfig`]'s URL templates.
///
/// Placeholders (`{name}`) are resolved from the trigger object first, then
/// the state object. Strings are percent-encoded; other scalars use their
/// JSON text. Only the endpoint's declared `params` become request
/// parameters; placeholder values travel in the URL alone.
#[derive(Debug, Clone)]
pub struct TemplateRequestBuilder {
    base_url: Option<String>,
    urls: Vec<String>,
    params: Vec<String>,
}

impl TemplateRequestBuilder {
    /// Create a builder for an endpoint
    #[must_use]
    pub fn new(endpoint: &EndpointConfig) -> Self {
        Self {
            base_url: endpoint.base_url.clone(),
            urls: endpoint.urls.clone(),
            params: endpoint.params.clone(),
        }
    }

    fn join(&self, path: String) -> String {
        match &self.base_url {
            Some(base) if !is_absolute(&path) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            _ => path,
        }
    }
}

impl RequestBuilder for TemplateRequestBuilder {
    fn build(&self, trigger: &Value, state: &Value) -> Result<PreparedRequest, ConfigurationError> {
        if self.urls.is_empty() {
            return Err(ConfigurationError::NoUrls);
        }

        let urls = self
            .urls
            .iter()
            .map(|template| render(template, trigger, state).map(|path| self.join(path)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut params = Map::new();

        for name in &self.params {
            if let Some(value) = lookup(name, trigger, state) {
                params.insert(name.clone(), value.clone());
            }
        }

        Ok(PreparedRequest::new(
            trigger.clone(),
            Value::Object(params),
            urls,
        ))
    }
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn lookup<'a>(name: &str, trigger: &'a Value, state: &'a Value) -> Option<&'a Value> {
    trigger
        .get(name)
        .filter(|v| !v.is_null())
        .or_else(|| state.get(name).filter(|v| !v.is_null()))
}

/// Substitute every `{name}` in `template`.
fn render(template: &str, trigger: &Value, state: &Value) -> Result<String, ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidTemplate {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| invalid("unterminated placeholder"))?;
        let name = after[..close].trim();
        if name.is_empty() {
            return Err(invalid("empty placeholder"));
        }

        let value = lookup(name, trigger, state).ok_or_else(|| {
            ConfigurationError::MissingParameter {
                name: name.to_string(),
            }
        })?;
        match value {
            Value::String(s) => out.push_str(&urlencoding::encode(s)),
            Value::Number(_) | Value::Bool(_) => out.push_str(&value.to_string()),
            _ => return Err(invalid(&format!("'{name}' is not a scalar"))),
        }

        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(invalid("unmatched '}'"));
    }
    out.push_str(rest);
    Ok(out)
}
