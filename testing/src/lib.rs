//! # Inflight Testing
//!
//! Testing utilities for the inflight dispatcher.
//!
//! This crate provides:
//! - [`mocks::MockTransport`]: a scripted transport whose calls can be held
//!   open and released in any order
//! - [`mocks::RecordingSink`] and [`mocks::RecordingTrace`]: capture
//!   notifications and transitions for assertions
//! - [`mocks::FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use inflight_testing::mocks::{MockTransport, RecordingSink};
//!
//! #[tokio::test]
//! async fn test_latest_wins() {
//!     let transport = Arc::new(MockTransport::new());
//!     let sink = Arc::new(RecordingSink::new());
//!     let gate = transport.gate("/search");
//!
//!     let dispatcher = Dispatcher::new(transport.clone(), sink.clone());
//!     // ...
//!     gate.succeed(json!({"hits": []}));
//!     assert_eq!(sink.kinds(), vec!["started", "succeeded"]);
//! }
//! ```

use chrono::{DateTime, Utc};
use inflight_core::environment::Clock;

/// Install a `fmt` subscriber writing through the test harness.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use inflight_core::trace::{TraceSink, Transition};
    use inflight_core::transport::TransportFuture;
    use inflight_core::{
        CancelHandle, ChannelName, EventSink, Notification, Response, Transport, TransportError,
    };
    use serde_json::{Value, json};
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;
    use tokio::sync::{Notify, oneshot};

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use inflight_testing::mocks::FixedClock;
    /// use inflight_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Event sink recording every notification in delivery order.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        notifications: Mutex<Vec<Notification>>,
    }

    impl RecordingSink {
        /// Create an empty sink
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything received so far
        #[must_use]
        pub fn notifications(&self) -> Vec<Notification> {
            lock(&self.notifications).clone()
        }

        /// Notifications for one channel
        #[must_use]
        pub fn for_channel(&self, channel: &ChannelName) -> Vec<Notification> {
            lock(&self.notifications)
                .iter()
                .filter(|n| n.channel() == channel)
                .cloned()
                .collect()
        }

        /// Kinds (`started`, `succeeded`, ...) in delivery order
        #[must_use]
        pub fn kinds(&self) -> Vec<&'static str> {
            lock(&self.notifications).iter().map(Notification::kind).collect()
        }

        /// Number of notifications received
        #[must_use]
        pub fn len(&self) -> usize {
            lock(&self.notifications).len()
        }

        /// Whether nothing was received
        #[must_use]
        pub fn is_empty(&self) -> bool {
            lock(&self.notifications).is_empty()
        }

        /// Forget everything received so far
        pub fn clear(&self) {
            lock(&self.notifications).clear();
        }
    }

    impl EventSink for RecordingSink {
        fn notify(&self, notification: Notification) {
            lock(&self.notifications).push(notification);
        }
    }

    /// Trace sink recording transitions in order.
    #[derive(Debug, Default)]
    pub struct RecordingTrace {
        transitions: Mutex<Vec<(ChannelName, Transition)>>,
    }

    impl RecordingTrace {
        /// Create an empty trace
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Transitions recorded for `channel`
        #[must_use]
        pub fn transitions(&self, channel: &ChannelName) -> Vec<Transition> {
            lock(&self.transitions)
                .iter()
                .filter(|(c, _)| c == channel)
                .map(|(_, t)| *t)
                .collect()
        }
    }

    impl TraceSink for RecordingTrace {
        fn transition(&self, channel: &ChannelName, transition: Transition) {
            lock(&self.transitions).push((channel.clone(), transition));
        }
    }

    /// One call observed by [`MockTransport`].
    #[derive(Debug, Clone)]
    pub struct Call {
        /// URL requested
        pub url: String,
        /// Parameters sent
        pub params: Value,
        /// Cancel handle the call was made under
        pub cancel: CancelHandle,
    }

    enum Script {
        Ready(Result<Value, TransportError>),
        Gated(oneshot::Receiver<Result<Value, TransportError>>),
    }

    /// Releases one gated call.
    ///
    /// Dropping the gate without releasing fails the call with a network error.
    #[derive(Debug)]
    pub struct Gate {
        sender: oneshot::Sender<Result<Value, TransportError>>,
    }

    impl Gate {
        /// Complete the call with `body`
        pub fn succeed(self, body: Value) {
            let _ = self.sender.send(Ok(body));
        }

        /// Fail the call with `error`
        pub fn fail(self, error: TransportError) {
            let _ = self.sender.send(Err(error));
        }
    }

    /// Scripted transport.
    ///
    /// Each URL has a queue of scripted replies consumed one per call. A call
    /// with nothing scripted answers immediately with
    /// `{"url": .., "params": ..}`. Gated replies hold the call open until
    /// the [`Gate`] is released, so tests control completion order.
    #[derive(Default)]
    pub struct MockTransport {
        scripts: Mutex<HashMap<String, VecDeque<Script>>>,
        calls: Mutex<Vec<Call>>,
        called: Notify,
        observe_cancel: bool,
    }

    impl MockTransport {
        /// Create a transport with nothing scripted
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make sends observe their cancel handle and fail with
        /// [`TransportError::Canceled`], like a transport with native abort.
        #[must_use]
        pub const fn observing_cancel(mut self) -> Self {
            self.observe_cancel = true;
            self
        }

        fn push(&self, url: &str, script: Script) {
            lock(&self.scripts)
                .entry(url.to_string())
                .or_default()
                .push_back(script);
        }

        /// Queue an immediate success for `url`
        pub fn respond(&self, url: &str, body: Value) {
            self.push(url, Script::Ready(Ok(body)));
        }

        /// Queue an immediate failure for `url`
        pub fn fail(&self, url: &str, error: TransportError) {
            self.push(url, Script::Ready(Err(error)));
        }

        /// Queue a reply for `url` that waits for the returned gate
        #[must_use]
        pub fn gate(&self, url: &str) -> Gate {
            let (sender, receiver) = oneshot::channel();
            self.push(url, Script::Gated(receiver));
            Gate { sender }
        }

        /// Calls made so far, in order
        #[must_use]
        pub fn calls(&self) -> Vec<Call> {
            lock(&self.calls).clone()
        }

        /// Number of calls made so far
        #[must_use]
        pub fn call_count(&self) -> usize {
            lock(&self.calls).len()
        }

        /// Wait until at least `count` calls were made.
        ///
        /// Returns `false` if that does not happen within five seconds.
        pub async fn wait_for_calls(&self, count: usize) -> bool {
            let wait = async {
                loop {
                    let notified = self.called.notified();
                    if self.call_count() >= count {
                        return;
                    }
                    notified.await;
                }
            };
            tokio::time::timeout(Duration::from_secs(5), wait).await.is_ok()
        }

        async fn reply(&self, url: &str, params: &Value) -> Result<Value, TransportError> {
            let script = lock(&self.scripts).get_mut(url).and_then(VecDeque::pop_front);
            match script {
                None => Ok(json!({"url": url, "params": params})),
                Some(Script::Ready(result)) => result,
                Some(Script::Gated(receiver)) => {
                    receiver.await.unwrap_or_else(|_| {
                        Err(TransportError::Network {
                            url: url.to_string(),
                            message: "gate dropped".to_string(),
                        })
                    })
                },
            }
        }
    }

    impl Transport for MockTransport {
        fn send<'a>(
            &'a self,
            url: &'a str,
            params: &'a Value,
            cancel: &'a CancelHandle,
        ) -> TransportFuture<'a> {
            Box::pin(async move {
                lock(&self.calls).push(Call {
                    url: url.to_string(),
                    params: params.clone(),
                    cancel: cancel.clone(),
                });
                self.called.notify_waiters();

                let body = if self.observe_cancel {
                    tokio::select! {
                        () = cancel.canceled() => Err(cancel.to_error()),
                        result = self.reply(url, params) => result,
                    }
                } else {
                    self.reply(url, params).await
                }?;

                Ok(Response::new(url, 200, body))
            })
        }
    }

    impl std::fmt::Debug for MockTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockTransport")
                .field("calls", &self.call_count())
                .field("observe_cancel", &self.observe_cancel)
                .finish_non_exhaustive()
        }
    }
}
