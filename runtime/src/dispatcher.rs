//! Dispatch coordinator and cancellation path.
//!
//! [`Dispatcher::dispatch`] drives one logical request:
//!
//! 1. Resolve the overlap policy against the ledger (atomically with the
//!    resulting ledger update).
//! 2. Emit `Started` and run the transport call: one URL, or a concurrent
//!    fan-out whose results keep URL-list order.
//! 3. Emit `Succeeded` or `Errored`. A cancellation is never an error and is
//!    not reported at all.
//! 4. Under `SendLatest`, promote a differing pending supersede record and
//!    loop back to step 2; otherwise retire the record.
//!
//! [`Dispatcher::cancel`] is the explicit cancellation path. It cancels live
//! records through their handles and leaves retirement to the dispatch that
//! owns them.

use crate::debounce::PendingTriggers;
use crate::ledger::{
    Admission, Completion, InFlightRecord, RecordId, RequestLedger, Settlement, Submission,
};
use crate::metrics::DispatchMetrics;
use crate::trace::LogTraceSink;
use inflight_core::config::ChannelSettings;
use inflight_core::trace::{TraceSink, Transition};
use inflight_core::{
    ChannelName, ConfigurationError, DispatchError, DispatchOutcome, EventSink, Notification,
    PreparedRequest, RawResult, Transport, TransportError, Value,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// Maps a request's raw result to the data carried by `Succeeded`.
///
/// For fan-out the raw result is a [`RawResult::Batch`] in URL-list order.
pub type Transform = Arc<dyn Fn(&RawResult) -> Value + Send + Sync>;

#[derive(Clone)]
struct ChannelEntry {
    settings: ChannelSettings,
    transform: Option<Transform>,
    hooks: Vec<Arc<dyn PendingTriggers>>,
}

impl ChannelEntry {
    fn new(settings: ChannelSettings) -> Self {
        Self {
            settings,
            transform: None,
            hooks: Vec::new(),
        }
    }
}

struct Inner {
    ledger: Arc<RequestLedger>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    trace: Option<Arc<dyn TraceSink>>,
    channels: RwLock<HashMap<ChannelName, ChannelEntry>>,
}

/// The dispatch coordinator.
///
/// Cheap to clone; clones share the ledger, transport, sink and channel
/// registry.
///
/// # Example
///
/// ```ignore
/// let dispatcher = Dispatcher::new(Arc::new(HttpTransport::new()), Arc::new(store_sink))
///     .with_channel(ChannelSettings::new("search").with_policy(OverlapPolicy::SendLatest));
///
/// let outcome = dispatcher
///     .dispatch(&"search".into(), PreparedRequest::single(trigger, params, url))
///     .await;
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher with a fresh ledger and no tracing
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, sink: Arc<dyn EventSink>) -> Self {
        Self::with_ledger(Arc::new(RequestLedger::new()), transport, sink)
    }

    /// Create a dispatcher over an existing ledger
    #[must_use]
    pub fn with_ledger(
        ledger: Arc<RequestLedger>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger,
                transport,
                sink,
                trace: None,
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Report every transition to `trace`.
    ///
    /// Must be called before the dispatcher is cloned; later clones share it.
    #[must_use]
    pub fn with_trace_sink(self, trace: Arc<dyn TraceSink>) -> Self {
        self.map_inner(|inner| inner.trace = Some(trace))
    }

    /// Report every transition to `tracing` at trace level.
    #[must_use]
    pub fn with_tracing(self) -> Self {
        self.with_trace_sink(Arc::new(LogTraceSink))
    }

    /// Register a channel (builder form of [`register`](Self::register))
    #[must_use]
    pub fn with_channel(self, settings: ChannelSettings) -> Self {
        self.register(settings);
        self
    }

    fn map_inner(self, f: impl FnOnce(&mut Inner)) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                f(&mut inner);
                Self {
                    inner: Arc::new(inner),
                }
            },
            Err(shared) => {
                tracing::warn!("dispatcher already shared; configuration change ignored");
                Self { inner: shared }
            },
        }
    }

    /// Register or replace a channel's settings.
    ///
    /// Replacing keeps the channel's transform and hooks.
    pub fn register(&self, settings: ChannelSettings) {
        let mut channels = self.channels_mut();
        match channels.get_mut(&settings.name) {
            Some(entry) => entry.settings = settings,
            None => {
                channels.insert(settings.name.clone(), ChannelEntry::new(settings));
            },
        }
    }

    /// Set the result transform for a channel.
    pub fn set_transform(&self, channel: &ChannelName, transform: Transform) {
        let mut channels = self.channels_mut();
        channels
            .entry(channel.clone())
            .or_insert_with(|| ChannelEntry::new(ChannelSettings::new(channel.clone())))
            .transform = Some(transform);
    }

    /// Register a deferred-trigger holder to be flushed when the channel is canceled.
    pub fn add_pending_hook(&self, channel: &ChannelName, hook: Arc<dyn PendingTriggers>) {
        let mut channels = self.channels_mut();
        channels
            .entry(channel.clone())
            .or_insert_with(|| ChannelEntry::new(ChannelSettings::new(channel.clone())))
            .hooks
            .push(hook);
    }

    /// The ledger backing this dispatcher
    #[must_use]
    pub fn ledger(&self) -> &Arc<RequestLedger> {
        &self.inner.ledger
    }

    /// Settings for a channel; unregistered channels get the defaults.
    #[must_use]
    pub fn settings(&self, channel: &ChannelName) -> ChannelSettings {
        self.entry(channel).settings
    }

    /// Snapshot of the channel's live records.
    #[must_use]
    pub fn in_flight(&self, channel: &ChannelName) -> Vec<InFlightRecord> {
        self.inner.ledger.live_records(channel)
    }

    fn channels_mut(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<ChannelName, ChannelEntry>> {
        self.inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, channel: &ChannelName) -> ChannelEntry {
        let channels = self
            .inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        channels.get(channel).cloned().unwrap_or_else(|| {
            tracing::debug!(%channel, "unregistered channel, using default settings");
            ChannelEntry::new(ChannelSettings::new(channel.clone()))
        })
    }

    fn trace(&self, channel: &ChannelName, transition: Transition) {
        if let Some(trace) = &self.inner.trace {
            trace.transition(channel, transition);
        }
    }

    fn notify(&self, notification: Notification) {
        self.inner.sink.notify(notification);
    }

    /// Report a failure through the sink, or drop it if the channel has no
    /// error notification.
    pub(crate) fn report_error(
        &self,
        settings: &ChannelSettings,
        error: impl Into<DispatchError>,
    ) {
        let error = error.into();
        if settings.notify_errors {
            self.notify(Notification::Errored {
                channel: settings.name.clone(),
                error,
            });
        } else {
            tracing::warn!(channel = %settings.name, %error, "request failed; error notifications disabled");
        }
    }

    /// Dispatch one logical request on `channel`.
    ///
    /// Never fails: errors are reported through the event sink and the call
    /// resolves to [`DispatchOutcome::Data`], [`NoData`](DispatchOutcome::NoData),
    /// [`Canceled`](DispatchOutcome::Canceled) or, when the trigger was
    /// absorbed by the overlap policy, [`Skipped`](DispatchOutcome::Skipped).
    #[tracing::instrument(skip_all, fields(channel = %channel))]
    pub async fn dispatch(&self, channel: &ChannelName, request: PreparedRequest) -> DispatchOutcome {
        let entry = self.entry(channel);
        let settings = &entry.settings;
        self.trace(channel, Transition::Resolving);

        if request.urls.is_empty() {
            self.report_error(settings, ConfigurationError::NoUrls);
            return DispatchOutcome::NoData;
        }

        let cancel = request
            .cancel
            .unwrap_or_else(|| self.inner.transport.make_cancel_handle());
        let submission = Submission {
            trigger: request.trigger,
            params: request.params,
            urls: request.urls,
            cancel,
        };

        let mut record = match self.inner.ledger.admit(channel, settings.policy, submission) {
            Admission::Skipped => {
                tracing::debug!(policy = %settings.policy, "channel busy, trigger dropped");
                DispatchMetrics::record_skipped(channel);
                self.trace(channel, Transition::Skipped);
                return DispatchOutcome::Skipped;
            },
            Admission::Stored { replaced } => {
                tracing::debug!(replaced, "channel busy, trigger stored as latest");
                DispatchMetrics::record_superseded(channel);
                self.trace(channel, Transition::Stored);
                return DispatchOutcome::Skipped;
            },
            Admission::Admitted { record, canceled } => {
                if canceled > 0 {
                    tracing::debug!(canceled, "canceled live request(s) before admitting");
                    self.trace(channel, Transition::CanceledPrevious);
                }
                tracing::debug!(record = record.id, "request admitted");
                DispatchMetrics::record_admitted(channel);
                self.trace(channel, Transition::Admitted);
                record
            },
        };

        loop {
            self.notify(Notification::Started {
                channel: channel.clone(),
                trigger: record.trigger.clone(),
            });
            self.trace(channel, Transition::Running);

            let started = Instant::now();
            let outcome = match self.execute(&record).await {
                Ok(raw) => {
                    let data = entry
                        .transform
                        .as_ref()
                        .map_or_else(|| raw.to_data(), |transform| transform(&raw));
                    DispatchMetrics::record_succeeded(channel, started.elapsed());
                    self.trace(channel, Transition::Succeeded);
                    self.notify(Notification::Succeeded {
                        channel: channel.clone(),
                        data: data.clone(),
                        raw,
                    });
                    DispatchOutcome::Data(data)
                },
                Err(err) if self.is_cancellation(&err, &record) => {
                    tracing::debug!(record = record.id, %err, "request canceled");
                    DispatchMetrics::record_canceled(channel, started.elapsed());
                    self.trace(channel, Transition::Canceled);
                    self.retire(channel, record.id, Completion::Canceled);
                    return DispatchOutcome::Canceled;
                },
                Err(err) => {
                    tracing::debug!(record = record.id, %err, "request failed");
                    DispatchMetrics::record_failed(channel, started.elapsed());
                    self.trace(channel, Transition::Failed);
                    self.report_error(settings, err);
                    DispatchOutcome::NoData
                },
            };

            let transport = &self.inner.transport;
            match self.inner.ledger.settle(channel, record.id, Completion::Finished, || {
                transport.make_cancel_handle()
            }) {
                Settlement::Promoted(next) => {
                    tracing::debug!(from = record.id, to = next.id, "re-issuing latest trigger");
                    DispatchMetrics::record_reissued(channel);
                    self.trace(channel, Transition::Superseding);
                    record = next;
                },
                Settlement::Retired => {
                    self.trace(channel, Transition::Retired);
                    return outcome;
                },
            }
        }
    }

    fn retire(&self, channel: &ChannelName, id: RecordId, completion: Completion) {
        let transport = &self.inner.transport;
        // A canceled settlement never promotes, so the handle factory is unused
        let _ = self
            .inner
            .ledger
            .settle(channel, id, completion, || transport.make_cancel_handle());
        self.trace(channel, Transition::Retired);
    }

    /// A failure is a cancellation if the transport says so or if the
    /// record's handle was canceled, even when the error carries no marker.
    fn is_cancellation(&self, err: &TransportError, record: &InFlightRecord) -> bool {
        self.inner.transport.is_cancellation(err) || record.cancel.is_canceled()
    }

    /// Run the transport call(s) for a record, racing them against its cancel handle.
    async fn execute(&self, record: &InFlightRecord) -> Result<RawResult, TransportError> {
        let transport = &*self.inner.transport;
        let cancel = &record.cancel;
        let params = &record.params;

        let call = async {
            if let [url] = record.urls.as_slice() {
                transport.send(url, params, cancel).await.map(RawResult::Single)
            } else {
                let calls = record
                    .urls
                    .iter()
                    .map(|url| transport.send(url, params, cancel));
                futures::future::try_join_all(calls)
                    .await
                    .map(RawResult::Batch)
            }
        };

        tokio::select! {
            biased;
            () = cancel.canceled() => Err(cancel.to_error()),
            result = call => result,
        }
    }

    /// Cancel every live request on `channel`.
    ///
    /// Also drops deferred (debounced) invocations registered for the
    /// channel. Returns `true` only if a live request was found and
    /// canceled; in that case, and if the channel declares cancel
    /// notifications, exactly one `Canceled` notification is emitted.
    pub fn cancel(&self, channel: &ChannelName, reason: Option<&str>) -> bool {
        self.cancel_matching(channel, None, reason)
    }

    /// Cancel one live request identified by its record id.
    ///
    /// Same contract as [`cancel`](Self::cancel), restricted to that record.
    pub fn cancel_record(&self, channel: &ChannelName, id: RecordId, reason: Option<&str>) -> bool {
        self.cancel_matching(channel, Some(id), reason)
    }

    fn cancel_matching(
        &self,
        channel: &ChannelName,
        target: Option<RecordId>,
        reason: Option<&str>,
    ) -> bool {
        let entry = self.entry(channel);
        for hook in &entry.hooks {
            hook.cancel_pending();
        }

        if !self.inner.ledger.cancel_entry(channel, target, reason) {
            tracing::debug!(%channel, "nothing to cancel");
            return false;
        }

        tracing::info!(%channel, reason, "request canceled");
        if entry.settings.notify_canceled {
            self.notify(Notification::Canceled {
                channel: channel.clone(),
                reason: reason.map(str::to_string),
            });
        }
        true
    }

    /// Cancel everything, flush every deferred invocation and clear the ledger.
    ///
    /// For reconfiguration and test isolation only.
    pub fn reset_all(&self) {
        let hooks: Vec<Arc<dyn PendingTriggers>> = self
            .inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .flat_map(|entry| entry.hooks.iter().cloned())
            .collect();
        for hook in hooks {
            hook.cancel_pending();
        }

        let canceled = self.inner.ledger.reset_all();
        tracing::info!(canceled, "dispatcher reset");
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("ledger", &self.inner.ledger)
            .field("tracing", &self.inner.trace.is_some())
            .finish_non_exhaustive()
    }
}
