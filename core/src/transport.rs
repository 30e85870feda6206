//! Transport capability consumed by the dispatcher.
//!
//! The dispatcher has no compile-time dependency on a concrete HTTP client.
//! It is handed an `Arc<dyn Transport>` providing three capabilities:
//! sending, classifying cancellation, and minting cancel handles.
//!
//! Cancellation is cooperative. A [`CancelHandle`] wraps a
//! [`CancellationToken`]; the dispatcher races every send against it, and a
//! transport may additionally observe the token itself.

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Cancellation capability tied to one transport call (or one fan-out batch).
///
/// Clones share the same underlying token.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelHandle {
    /// Create a fresh, uncanceled handle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the call. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel the call, recording a reason if none was recorded before.
    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    /// Whether cancellation has been requested
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason given to [`cancel_with_reason`](Self::cancel_with_reason), if any
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Completes once the handle is canceled
    pub async fn canceled(&self) {
        self.token.cancelled().await;
    }

    /// The error a call aborted through this handle settles with
    #[must_use]
    pub fn to_error(&self) -> TransportError {
        TransportError::Canceled {
            reason: self.reason().map(str::to_string),
        }
    }

    /// The underlying token, for transports that want to observe it directly
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// One decoded response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// URL that produced this response
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Decoded body
    pub body: Value,
}

impl Response {
    /// Create a response
    #[must_use]
    pub fn new(url: impl Into<String>, status: u16, body: Value) -> Self {
        Self {
            url: url.into(),
            status,
            body,
        }
    }
}

/// Raw result of one logical request.
///
/// A single-URL request yields `Single`; a fan-out yields `Batch` with one
/// response per URL, in URL-list order regardless of completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawResult {
    /// One URL, one response
    Single(Response),
    /// Fan-out responses in URL-list order
    Batch(Vec<Response>),
}

impl RawResult {
    /// Default data extraction: the body, or an array of bodies for a batch.
    #[must_use]
    pub fn to_data(&self) -> Value {
        match self {
            Self::Single(response) => response.body.clone(),
            Self::Batch(responses) => {
                Value::Array(responses.iter().map(|r| r.body.clone()).collect())
            },
        }
    }

    /// Responses as a slice, for either shape
    #[must_use]
    pub fn responses(&self) -> &[Response] {
        match self {
            Self::Single(response) => std::slice::from_ref(response),
            Self::Batch(responses) => responses,
        }
    }
}

/// Future returned by [`Transport::send`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Response, TransportError>> + Send + 'a>>;

/// Transport capability: send a request, classify cancellation, mint cancel handles.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; fan-out issues several sends
/// concurrently on the same instance.
pub trait Transport: Send + Sync {
    /// Send one request.
    ///
    /// `cancel` is the handle of the logical request this call belongs to.
    /// Implementations may observe it; the dispatcher also drops the
    /// returned future when the handle is canceled.
    fn send<'a>(
        &'a self,
        url: &'a str,
        params: &'a Value,
        cancel: &'a CancelHandle,
    ) -> TransportFuture<'a>;

    /// Whether `err` signals cancellation rather than failure.
    fn is_cancellation(&self, err: &TransportError) -> bool {
        err.is_cancellation()
    }

    /// Create the cancel handle for a new logical request.
    fn make_cancel_handle(&self) -> CancelHandle {
        CancelHandle::new()
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send<'a>(
        &'a self,
        url: &'a str,
        params: &'a Value,
        cancel: &'a CancelHandle,
    ) -> TransportFuture<'a> {
        (**self).send(url, params, cancel)
    }

    fn is_cancellation(&self, err: &TransportError) -> bool {
        (**self).is_cancellation(err)
    }

    fn make_cancel_handle(&self) -> CancelHandle {
        (**self).make_cancel_handle()
    }
}
