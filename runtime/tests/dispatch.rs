//! Integration tests for overlap resolution, re-issue, fan-out and cancellation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use inflight_core::config::ChannelSettings;
use inflight_core::environment::Clock;
use inflight_core::trace::Transition;
use inflight_core::{
    ChannelName, DispatchError, DispatchOutcome, Notification, OverlapPolicy, PreparedRequest,
    TransportError, Value,
};
use inflight_runtime::{Dispatcher, RequestLedger};
use inflight_testing::mocks::{MockTransport, RecordingSink, RecordingTrace, test_clock};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    dispatcher: Dispatcher,
    transport: Arc<MockTransport>,
    sink: Arc<RecordingSink>,
    channel: ChannelName,
}

impl Harness {
    fn new(settings: ChannelSettings) -> Self {
        Self::with_transport(settings, MockTransport::new())
    }

    fn with_transport(settings: ChannelSettings, transport: MockTransport) -> Self {
        inflight_testing::init_test_tracing();
        let transport = Arc::new(transport);
        let sink = Arc::new(RecordingSink::new());
        let channel = settings.name.clone();
        let dispatcher =
            Dispatcher::new(transport.clone(), sink.clone()).with_channel(settings);
        Self {
            dispatcher,
            transport,
            sink,
            channel,
        }
    }

    fn policy(policy: OverlapPolicy) -> Self {
        Self::new(ChannelSettings::new("search").with_policy(policy))
    }

    async fn dispatch(&self, q: &str, url: &str) -> DispatchOutcome {
        self.dispatcher.dispatch(&self.channel, request(q, url)).await
    }

    fn spawn(&self, q: &str, url: &str) -> JoinHandle<DispatchOutcome> {
        let dispatcher = self.dispatcher.clone();
        let channel = self.channel.clone();
        let request = request(q, url);
        tokio::spawn(async move { dispatcher.dispatch(&channel, request).await })
    }

    async fn wait_for_calls(&self, count: usize) {
        assert!(
            self.transport.wait_for_calls(count).await,
            "expected {count} transport calls, saw {}",
            self.transport.call_count()
        );
    }

    fn started_triggers(&self) -> Vec<Value> {
        self.sink
            .notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Started { trigger, .. } => Some(trigger),
                _ => None,
            })
            .collect()
    }
}

fn request(q: &str, url: &str) -> PreparedRequest {
    PreparedRequest::single(json!({"q": q}), json!({"q": q}), url)
}

fn echo(q: &str, url: &str) -> Value {
    json!({"url": url, "params": {"q": q}})
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_idle_channel_admits_under_every_policy() {
    for policy in [
        OverlapPolicy::SendAll,
        OverlapPolicy::Ignore,
        OverlapPolicy::SendLatest,
        OverlapPolicy::CancelPending,
    ] {
        let h = Harness::policy(policy);
        let outcome = h.dispatch("rust", "/search").await;

        assert_eq!(outcome, DispatchOutcome::Data(echo("rust", "/search")), "{policy}");
        assert_eq!(h.sink.kinds(), vec!["started", "succeeded"], "{policy}");
        assert!(h.dispatcher.ledger().is_empty(), "{policy}");
    }
}

#[test]
fn test_dispatch_is_pending_until_transport_answers() {
    let h = Harness::policy(OverlapPolicy::CancelPending);
    let gate = h.transport.gate("/search");

    let mut task = tokio_test::task::spawn(h.dispatch("rust", "/search"));
    tokio_test::assert_pending!(task.poll());
    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.sink.kinds(), vec!["started"]);
    assert_eq!(h.dispatcher.ledger().live_count(&h.channel), 1);

    gate.succeed(json!({"hits": 3}));
    let outcome = tokio_test::assert_ready!(task.poll());

    assert_eq!(outcome, DispatchOutcome::Data(json!({"hits": 3})));
    assert_eq!(h.dispatcher.ledger().live_count(&h.channel), 0);
}

#[tokio::test]
async fn test_ignore_drops_trigger_while_busy() {
    let h = Harness::policy(OverlapPolicy::Ignore);
    let gate = h.transport.gate("/search");

    let first = h.spawn("a", "/search");
    h.wait_for_calls(1).await;

    let second = h.dispatch("b", "/search").await;
    assert_eq!(second, DispatchOutcome::Skipped);
    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.sink.kinds(), vec!["started"]);

    gate.succeed(json!("a"));
    assert_eq!(first.await.unwrap(), DispatchOutcome::Data(json!("a")));
    assert_eq!(h.started_triggers(), vec![json!({"q": "a"})]);
}

#[tokio::test]
async fn test_send_all_runs_every_trigger() {
    let h = Harness::policy(OverlapPolicy::SendAll);
    let gates: Vec<_> = (0..4).map(|i| h.transport.gate(&format!("/item/{i}"))).collect();

    let tasks: Vec<_> = (0..4)
        .map(|i| h.spawn(&i.to_string(), &format!("/item/{i}")))
        .collect();
    h.wait_for_calls(4).await;
    assert_eq!(h.dispatcher.in_flight(&h.channel).len(), 4);

    for (i, gate) in gates.into_iter().enumerate().rev() {
        gate.succeed(json!(i));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap(), DispatchOutcome::Data(json!(i)));
    }

    let kinds = h.sink.kinds();
    assert_eq!(kinds.iter().filter(|k| **k == "started").count(), 4);
    assert_eq!(kinds.iter().filter(|k| **k == "succeeded").count(), 4);
    assert!(h.dispatcher.ledger().is_empty());
}

// ============================================================================
// Send latest
// ============================================================================

#[tokio::test]
async fn test_send_latest_reissues_newest_trigger_after_current_completes() {
    let h = Harness::policy(OverlapPolicy::SendLatest);
    let gate = h.transport.gate("/search");

    let first = h.spawn("a", "/search");
    h.wait_for_calls(1).await;

    assert_eq!(h.dispatch("b", "/search").await, DispatchOutcome::Skipped);
    assert_eq!(h.dispatch("c", "/search").await, DispatchOutcome::Skipped);

    let pending = h.dispatcher.ledger().pending_supersede(&h.channel).unwrap();
    assert_eq!(pending.params, json!({"q": "c"}));
    assert_eq!(h.transport.call_count(), 1);

    gate.succeed(json!("a"));
    let outcome = first.await.unwrap();

    // The original call resolves with the re-issued request's data
    assert_eq!(outcome, DispatchOutcome::Data(echo("c", "/search")));
    assert_eq!(h.sink.kinds(), vec!["started", "succeeded", "started", "succeeded"]);
    assert_eq!(h.started_triggers(), vec![json!({"q": "a"}), json!({"q": "c"})]);

    let calls = h.transport.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].params, json!({"q": "c"}));
    assert!(h.dispatcher.ledger().is_empty());
}

#[tokio::test]
async fn test_send_latest_with_equal_params_does_not_reissue() {
    let h = Harness::policy(OverlapPolicy::SendLatest);
    let gate = h.transport.gate("/search");

    let first = h.spawn("a", "/search");
    h.wait_for_calls(1).await;
    assert_eq!(h.dispatch("a", "/search").await, DispatchOutcome::Skipped);

    gate.succeed(json!("a"));
    assert_eq!(first.await.unwrap(), DispatchOutcome::Data(json!("a")));

    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.sink.kinds(), vec!["started", "succeeded"]);
    assert!(h.dispatcher.ledger().pending_supersede(&h.channel).is_none());
}

#[tokio::test]
async fn test_send_latest_reissues_after_failure() {
    let h = Harness::policy(OverlapPolicy::SendLatest);
    let gate = h.transport.gate("/search");

    let first = h.spawn("a", "/search");
    h.wait_for_calls(1).await;
    assert_eq!(h.dispatch("b", "/search").await, DispatchOutcome::Skipped);

    gate.fail(TransportError::Status {
        url: "/search".to_string(),
        status: 503,
    });

    assert_eq!(first.await.unwrap(), DispatchOutcome::Data(echo("b", "/search")));
    assert_eq!(h.sink.kinds(), vec!["started", "errored", "started", "succeeded"]);
}

#[tokio::test]
async fn test_canceled_send_latest_discards_pending_trigger() {
    let h = Harness::policy(OverlapPolicy::SendLatest);
    let _gate = h.transport.gate("/search");

    let first = h.spawn("a", "/search");
    h.wait_for_calls(1).await;
    assert_eq!(h.dispatch("b", "/search").await, DispatchOutcome::Skipped);

    assert!(h.dispatcher.cancel(&h.channel, None));
    assert_eq!(first.await.unwrap(), DispatchOutcome::Canceled);

    assert_eq!(h.transport.call_count(), 1);
    assert!(h.dispatcher.ledger().is_empty());
}

#[test]
fn test_late_canceled_settle_keeps_trigger_queued_behind_newer_request() {
    let h = Harness::policy(OverlapPolicy::SendLatest);
    let _first_gate = h.transport.gate("/search");
    let second_gate = h.transport.gate("/search");

    let mut first = tokio_test::task::spawn(h.dispatch("a", "/search"));
    tokio_test::assert_pending!(first.poll());
    assert!(h.dispatcher.cancel(&h.channel, None));

    // The canceled request has not settled yet when the next one is admitted
    let mut second = tokio_test::task::spawn(h.dispatch("c", "/search"));
    tokio_test::assert_pending!(second.poll());
    let mut third = tokio_test::task::spawn(h.dispatch("d", "/search"));
    assert_eq!(tokio_test::assert_ready!(third.poll()), DispatchOutcome::Skipped);

    assert_eq!(tokio_test::assert_ready!(first.poll()), DispatchOutcome::Canceled);
    let pending = h.dispatcher.ledger().pending_supersede(&h.channel);
    assert_eq!(pending.map(|p| p.params), Some(json!({"q": "d"})));

    second_gate.succeed(json!("c"));
    assert_eq!(
        tokio_test::assert_ready!(second.poll()),
        DispatchOutcome::Data(echo("d", "/search"))
    );
    assert_eq!(
        h.started_triggers(),
        vec![json!({"q": "a"}), json!({"q": "c"}), json!({"q": "d"})]
    );
    assert!(h.dispatcher.ledger().is_empty());
}

// ============================================================================
// Cancel pending
// ============================================================================

#[tokio::test]
async fn test_cancel_pending_cancels_previous_request_silently() {
    let h = Harness::policy(OverlapPolicy::CancelPending);
    let _gate = h.transport.gate("/search");

    let first = h.spawn("a", "/search");
    h.wait_for_calls(1).await;
    let first_handle = h.transport.calls()[0].cancel.clone();

    let second = h.dispatch("b", "/search").await;

    assert!(first_handle.is_canceled());
    assert_eq!(second, DispatchOutcome::Data(echo("b", "/search")));
    assert_eq!(first.await.unwrap(), DispatchOutcome::Canceled);

    // No error and no cancel notification for the superseded request
    assert_eq!(h.sink.kinds(), vec!["started", "started", "succeeded"]);
    assert!(h.dispatcher.ledger().is_empty());
}

#[tokio::test]
async fn test_transport_cancellation_error_is_not_reported() {
    let h = Harness::policy(OverlapPolicy::CancelPending);
    h.transport.fail("/search", TransportError::Canceled { reason: None });

    let outcome = h.dispatch("a", "/search").await;

    assert_eq!(outcome, DispatchOutcome::Canceled);
    assert_eq!(h.sink.kinds(), vec!["started"]);
    assert!(h.dispatcher.ledger().is_empty());
}

#[tokio::test]
async fn test_transport_observing_its_handle_settles_as_canceled() {
    let h = Harness::with_transport(
        ChannelSettings::new("search"),
        MockTransport::new().observing_cancel(),
    );
    let _gate = h.transport.gate("/search");

    let first = h.spawn("a", "/search");
    h.wait_for_calls(1).await;
    assert!(h.dispatcher.cancel(&h.channel, Some("user left")));

    assert_eq!(first.await.unwrap(), DispatchOutcome::Canceled);
    assert_eq!(
        h.transport.calls()[0].cancel.reason(),
        Some("user left")
    );
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_failure_emits_errored_once() {
    let h = Harness::policy(OverlapPolicy::CancelPending);
    let error = TransportError::Status {
        url: "/search".to_string(),
        status: 500,
    };
    h.transport.fail("/search", error.clone());

    let outcome = h.dispatch("a", "/search").await;

    assert_eq!(outcome, DispatchOutcome::NoData);
    let notifications = h.sink.notifications();
    assert_eq!(notifications.len(), 2);
    assert_eq!(
        notifications[1],
        Notification::Errored {
            channel: h.channel.clone(),
            error: DispatchError::Transport(error),
        }
    );
}

#[tokio::test]
async fn test_failure_without_error_notification_is_silent() {
    let h = Harness::new(ChannelSettings::new("search").with_notify_errors(false));
    h.transport.fail(
        "/search",
        TransportError::Network {
            url: "/search".to_string(),
            message: "connection reset".to_string(),
        },
    );

    assert_eq!(h.dispatch("a", "/search").await, DispatchOutcome::NoData);
    assert_eq!(h.sink.kinds(), vec!["started"]);
}

#[tokio::test]
async fn test_empty_url_list_is_a_configuration_error() {
    let h = Harness::policy(OverlapPolicy::CancelPending);
    let request = PreparedRequest::new(json!({}), json!({}), Vec::new());

    let outcome = h.dispatcher.dispatch(&h.channel, request).await;

    assert_eq!(outcome, DispatchOutcome::NoData);
    assert_eq!(h.sink.kinds(), vec!["errored"]);
    assert_eq!(h.transport.call_count(), 0);
    assert!(h.dispatcher.ledger().is_empty());
}

// ============================================================================
// Fan-out
// ============================================================================

const FAN_OUT: [&str; 3] = ["/a", "/b", "/c"];

fn permutations() -> Vec<[usize; 3]> {
    vec![
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ]
}

#[tokio::test]
async fn test_fan_out_keeps_url_order_regardless_of_completion_order() {
    for order in permutations() {
        let h = Harness::policy(OverlapPolicy::CancelPending);
        let mut gates: Vec<_> = FAN_OUT.iter().map(|url| Some(h.transport.gate(url))).collect();

        let request = PreparedRequest::new(
            json!({"q": "x"}),
            json!({"q": "x"}),
            FAN_OUT.iter().map(ToString::to_string).collect(),
        );
        let task = {
            let dispatcher = h.dispatcher.clone();
            let channel = h.channel.clone();
            tokio::spawn(async move { dispatcher.dispatch(&channel, request).await })
        };
        h.wait_for_calls(3).await;

        for index in order {
            gates[index].take().unwrap().succeed(json!(FAN_OUT[index]));
            tokio::task::yield_now().await;
        }

        assert_eq!(
            task.await.unwrap(),
            DispatchOutcome::Data(json!(["/a", "/b", "/c"])),
            "completion order {order:?}"
        );
        assert_eq!(h.sink.kinds(), vec!["started", "succeeded"]);

        match &h.sink.notifications()[1] {
            Notification::Succeeded { raw, .. } => {
                let urls: Vec<_> = raw.responses().iter().map(|r| r.url.as_str()).collect();
                assert_eq!(urls, FAN_OUT);
            },
            other => panic!("expected success, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_fan_out_failure_reports_one_error() {
    let h = Harness::policy(OverlapPolicy::CancelPending);
    h.transport.fail(
        "/b",
        TransportError::Status {
            url: "/b".to_string(),
            status: 404,
        },
    );

    let request = PreparedRequest::new(
        json!({}),
        json!({}),
        FAN_OUT.iter().map(ToString::to_string).collect(),
    );
    let outcome = h.dispatcher.dispatch(&h.channel, request).await;

    assert_eq!(outcome, DispatchOutcome::NoData);
    assert_eq!(h.sink.kinds(), vec!["started", "errored"]);
}

#[tokio::test]
async fn test_fan_out_shares_one_cancel_handle() {
    let h = Harness::policy(OverlapPolicy::CancelPending);
    let _gates: Vec<_> = FAN_OUT.iter().map(|url| h.transport.gate(url)).collect();

    let request = PreparedRequest::new(
        json!({}),
        json!({}),
        FAN_OUT.iter().map(ToString::to_string).collect(),
    );
    let task = {
        let dispatcher = h.dispatcher.clone();
        let channel = h.channel.clone();
        tokio::spawn(async move { dispatcher.dispatch(&channel, request).await })
    };
    h.wait_for_calls(3).await;

    assert!(h.dispatcher.cancel(&h.channel, None));
    assert_eq!(task.await.unwrap(), DispatchOutcome::Canceled);
    assert!(h.transport.calls().iter().all(|c| c.cancel.is_canceled()));
}

// ============================================================================
// Explicit cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_idle_channel_returns_false_without_notification() {
    let h = Harness::new(ChannelSettings::new("search").with_notify_canceled(true));

    assert!(!h.dispatcher.cancel(&h.channel, None));
    assert!(!h.dispatcher.cancel(&ChannelName::new("never-used"), Some("why")));
    assert!(h.sink.is_empty());
}

#[tokio::test]
async fn test_cancel_live_channel_emits_one_canceled_notification() {
    let h = Harness::new(ChannelSettings::new("search").with_notify_canceled(true));
    let _gate = h.transport.gate("/search");

    let first = h.spawn("a", "/search");
    h.wait_for_calls(1).await;

    assert!(h.dispatcher.cancel(&h.channel, Some("navigated away")));
    assert_eq!(first.await.unwrap(), DispatchOutcome::Canceled);

    // A second cancel finds nothing live
    assert!(!h.dispatcher.cancel(&h.channel, None));

    let canceled: Vec<_> = h
        .sink
        .notifications()
        .into_iter()
        .filter(|n| matches!(n, Notification::Canceled { .. }))
        .collect();
    assert_eq!(
        canceled,
        vec![Notification::Canceled {
            channel: h.channel.clone(),
            reason: Some("navigated away".to_string()),
        }]
    );
    assert!(!h.sink.kinds().contains(&"errored"));
}

#[tokio::test]
async fn test_cancel_without_cancel_notification_is_silent() {
    let h = Harness::policy(OverlapPolicy::CancelPending);
    let _gate = h.transport.gate("/search");

    let first = h.spawn("a", "/search");
    h.wait_for_calls(1).await;

    assert!(h.dispatcher.cancel(&h.channel, None));
    assert_eq!(first.await.unwrap(), DispatchOutcome::Canceled);
    assert_eq!(h.sink.kinds(), vec!["started"]);
}

#[tokio::test]
async fn test_cancel_record_targets_one_request() {
    let h = Harness::policy(OverlapPolicy::SendAll);
    let _gate_a = h.transport.gate("/a");
    let gate_b = h.transport.gate("/b");

    let a = h.spawn("a", "/a");
    let b = h.spawn("b", "/b");
    h.wait_for_calls(2).await;

    let target = h
        .dispatcher
        .in_flight(&h.channel)
        .into_iter()
        .find(|r| r.params == json!({"q": "a"}))
        .unwrap();
    assert!(h.dispatcher.cancel_record(&h.channel, target.id, None));
    assert_eq!(a.await.unwrap(), DispatchOutcome::Canceled);

    gate_b.succeed(json!("b"));
    assert_eq!(b.await.unwrap(), DispatchOutcome::Data(json!("b")));
}

// ============================================================================
// Reset, diagnostics and tracing
// ============================================================================

#[tokio::test]
async fn test_reset_all_leaves_fresh_state() {
    let h = Harness::policy(OverlapPolicy::SendLatest);
    let _gate = h.transport.gate("/search");

    let first = h.spawn("a", "/search");
    h.wait_for_calls(1).await;
    assert_eq!(h.dispatch("b", "/search").await, DispatchOutcome::Skipped);

    h.dispatcher.reset_all();
    assert!(h.dispatcher.ledger().is_empty());
    assert_eq!(first.await.unwrap(), DispatchOutcome::Canceled);
    assert_eq!(h.transport.calls()[0].cancel.reason(), Some("reset"));

    // The channel behaves as if it had never been used
    assert_eq!(
        h.dispatch("c", "/search").await,
        DispatchOutcome::Data(echo("c", "/search"))
    );
    assert!(h.dispatcher.ledger().is_empty());
}

#[tokio::test]
async fn test_in_flight_exposes_clock_stamped_records() {
    let transport = Arc::new(MockTransport::new());
    let sink = Arc::new(RecordingSink::new());
    let ledger = Arc::new(RequestLedger::with_clock(Arc::new(test_clock())));
    let dispatcher = Dispatcher::with_ledger(ledger, transport.clone(), sink);
    let channel = ChannelName::new("profile");
    let _gate = transport.gate("/me");

    let task = {
        let dispatcher = dispatcher.clone();
        let channel = channel.clone();
        tokio::spawn(async move { dispatcher.dispatch(&channel, request("me", "/me")).await })
    };
    assert!(transport.wait_for_calls(1).await);

    let records = dispatcher.in_flight(&channel);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].trigger, json!({"q": "me"}));
    assert_eq!(records[0].started_at, test_clock().now());

    assert!(dispatcher.cancel(&channel, None));
    assert_eq!(task.await.unwrap(), DispatchOutcome::Canceled);
    assert!(dispatcher.in_flight(&channel).is_empty());
}

#[tokio::test]
async fn test_trace_sink_sees_every_transition() {
    let transport = Arc::new(MockTransport::new());
    let trace = Arc::new(RecordingTrace::new());
    let channel = ChannelName::new("search");
    let dispatcher = Dispatcher::new(transport.clone(), Arc::new(RecordingSink::new()))
        .with_trace_sink(trace.clone())
        .with_channel(ChannelSettings::new("search").with_policy(OverlapPolicy::SendLatest));

    let gate = transport.gate("/search");
    let first = {
        let dispatcher = dispatcher.clone();
        let channel = channel.clone();
        tokio::spawn(async move { dispatcher.dispatch(&channel, request("a", "/search")).await })
    };
    assert!(transport.wait_for_calls(1).await);
    let _ = dispatcher.dispatch(&channel, request("b", "/search")).await;
    gate.succeed(json!("a"));
    let _ = first.await.unwrap();

    assert_eq!(
        trace.transitions(&channel),
        vec![
            Transition::Resolving,
            Transition::Admitted,
            Transition::Running,
            Transition::Resolving,
            Transition::Stored,
            Transition::Succeeded,
            Transition::Superseding,
            Transition::Running,
            Transition::Succeeded,
            Transition::Retired,
        ]
    );
}
