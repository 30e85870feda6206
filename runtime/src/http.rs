//! reqwest-backed [`Transport`].
//!
//! - `GET`/`DELETE`/`HEAD`: the parameters object is sent as query pairs.
//! - Other methods: the parameters are sent as a JSON body.
//!
//! Cancellation needs no support here: the dispatcher drops the send future
//! when the request's cancel handle fires, which aborts the reqwest call.

use inflight_core::transport::TransportFuture;
use inflight_core::{CancelHandle, Response, Transport, TransportError, Value};
use reqwest::{Client, Method, RequestBuilder};

/// HTTP transport over a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    method: Method,
}

impl HttpTransport {
    /// GET transport with a default client
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// GET transport with a caller-configured client (timeouts, TLS, headers)
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            method: Method::GET,
        }
    }

    /// Use `method` for every request
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    fn sends_query(&self) -> bool {
        matches!(self.method, Method::GET | Method::DELETE | Method::HEAD)
    }

    fn prepare(&self, url: &str, params: &Value) -> RequestBuilder {
        let request = self.client.request(self.method.clone(), url);
        if self.sends_query() {
            request.query(&query_pairs(params))
        } else {
            request.json(params)
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten a parameters object into query pairs; nulls are omitted.
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Some(object) = params.as_object() else {
        return Vec::new();
    };
    object
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

/// Decode a body as JSON, falling back to a JSON string; empty bodies are null.
fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        url: &'a str,
        params: &'a Value,
        _cancel: &'a CancelHandle,
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            let response = self.prepare(url, params).send().await.map_err(|e| TransportError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let text = response.text().await.map_err(|e| TransportError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })?;

            Ok(Response::new(url, status.as_u16(), decode_body(&text)))
        })
    }
}
