//! End-to-end scenarios, driven entirely through `rws-testkit`'s
//! `FakeTransport` — no real socket involved. Spawn the actor, push
//! scripted transport events, assert on what the waiter/handler observed.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;
use tokio::time::timeout;

use rws_core::actor::{ActorId, CallbackEvent, CallbackId, SendOptions, SendOutcome};
use rws_core::config::{ConnectionConfig, Endpoint, MaxAttempts, RateLimitConfig, ReconnectPolicy};
use rws_core::error::{CoreError, TimeoutError};
use rws_core::facade::Client;
use rws_core::handler::{HandlerRegistry, Slot};
use rws_core::transport::TransportEvent;
use rws_core::types::{FrameType, InboundMessage, OutboundFrame, RequestId, StreamRef};
use rws_testkit::{AlwaysAllowRateLimitHandler, EchoConnectionHandler, FakeTransport, RecordingSubscriptionHandler};

fn endpoint() -> Endpoint {
    Endpoint {
        host: "fake.example.com".into(),
        port: 443,
        path: "/ws".into(),
        secure: true,
    }
}

fn fast_reconnect_config() -> ConnectionConfig {
    ConnectionConfig::builder()
        .endpoint(endpoint())
        .reconnect_policy(
            ReconnectPolicy::builder()
                .base_delay(Duration::from_millis(10))
                .max_delay(Duration::from_millis(50))
                .max_attempts(MaxAttempts::Unbounded)
                .reconnect_on_error(true)
                .build(),
        )
        .build()
}

fn inbound_reply(id: u64, payload: serde_json::Value) -> InboundMessage {
    InboundMessage {
        frame_type: FrameType::Text,
        correlation_id: Some(RequestId(id)),
        payload: payload.clone(),
        raw: payload.to_string(),
    }
}

/// Scenario 1: happy path request/reply.
#[tokio::test]
#[test_log::test]
async fn happy_path_request_reply() {
    let (transport, controller) = FakeTransport::pair();
    let client = Client::new();
    let handle = client
        .connect(
            ConnectionConfig::builder().endpoint(endpoint()).build(),
            Arc::new(transport),
            HandlerRegistry::new(),
            json!(null),
            ActorId(1),
        )
        .await
        .expect("connect should succeed against a fresh fake transport");

    let send = tokio::spawn({
        let client = client.clone();
        async move { client.send_text(handle, "hello", Duration::from_secs(1)).await }
    });

    let (th, stream, frame) = timeout(Duration::from_secs(1), async {
        loop {
            let mut sent = controller.take_sent_frames();
            if let Some(entry) = sent.pop() {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("the hello frame should be sent");
    assert_eq!(frame.payload, "hello");

    controller
        .push_event(th, TransportEvent::Ws { stream, frame: inbound_reply(1, json!({"id": 1, "result": "ok"})) })
        .await;

    let result = send.await.unwrap().expect("waiter should receive the correlated reply");
    assert_eq!(result, json!({"id": 1, "result": "ok"}));
}

/// Scenario 2: a request issued while disconnected is buffered, then
/// delivered once reconnection's restoration flush runs.
#[tokio::test]
#[test_log::test]
async fn buffer_on_disconnect_then_deliver_after_reconnect() {
    let (transport, controller) = FakeTransport::pair();
    let client = Client::new();
    let config = fast_reconnect_config();
    let handle = client
        .connect(config, Arc::new(transport), HandlerRegistry::new(), json!(null), ActorId(2))
        .await
        .expect("initial connect should succeed");

    // First `open()` call handed out TransportHandle(1); this is the only
    // actor driving this controller, so it is deterministic.
    let first_handle = rws_core::transport::TransportHandle(1);
    controller
        .push_event(
            first_handle,
            TransportEvent::Down { reason: "network".into(), killed: false, unprocessed: vec![] },
        )
        .await;
    // Give the actor's select! loop a turn to process Down before the
    // buffered send races it onto the mailbox.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let send = tokio::spawn({
        let client = client.clone();
        async move { client.send_text(handle, "x", Duration::from_secs(2)).await }
    });

    let (reconnect_handle, reconnect_stream, frame) = timeout(Duration::from_secs(2), async {
        loop {
            let mut sent = controller.take_sent_frames();
            if let Some(entry) = sent.pop() {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("the buffered frame should be flushed after reconnect");
    assert_eq!(frame.payload, "x");
    assert_eq!(reconnect_stream, StreamRef(2), "reconnect should upgrade a fresh stream");

    controller
        .push_event(
            reconnect_handle,
            TransportEvent::Ws { stream: reconnect_stream, frame: inbound_reply(1, json!({"id": 1, "result": "x-ack"})) },
        )
        .await;

    let result = send.await.unwrap().expect("buffered request should resolve after reconnect");
    assert_eq!(result, json!({"id": 1, "result": "x-ack"}));
}

/// Scenario 3: confirmed subscriptions are replayed, in order, on
/// reconnection.
#[tokio::test]
#[test_log::test]
async fn reconnection_replays_confirmed_subscriptions_in_order() {
    let (transport, controller) = FakeTransport::pair();
    let client = Client::new();
    let config = fast_reconnect_config();
    let sub_handler = RecordingSubscriptionHandler::new();

    let mut handlers = HandlerRegistry::new();
    handlers.subscription = Some(Slot::new(Arc::new(sub_handler.clone()), rws_core::actor::unit_state()));

    let handle = client
        .connect(config, Arc::new(transport), handlers, json!(null), ActorId(3))
        .await
        .expect("connect should succeed");

    client.subscribe(handle, "ch.a", json!({})).await.expect("ch.a subscribes synchronously");
    client.subscribe(handle, "ch.b", json!({})).await.expect("ch.b subscribes synchronously");
    assert_eq!(sub_handler.subscribed_channels(), vec!["ch.a".to_string(), "ch.b".to_string()]);

    let first_handle = rws_core::transport::TransportHandle(1);
    controller
        .push_event(
            first_handle,
            TransportEvent::Down { reason: "network".into(), killed: false, unprocessed: vec![] },
        )
        .await;

    timeout(Duration::from_secs(2), async {
        loop {
            if sub_handler.subscribed_channels().len() == 4 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("restoration should replay both confirmed subscriptions after reconnect");

    assert_eq!(
        sub_handler.subscribed_channels(),
        vec!["ch.a".to_string(), "ch.b".to_string(), "ch.a".to_string(), "ch.b".to_string()],
        "replay must preserve original confirmation order"
    );
}

/// Scenario 4: the rate limiter queues overflow admissions and drains them
/// FIFO as the token bucket refills.
#[tokio::test]
#[test_log::test]
async fn rate_limit_queue_drains_fifo_on_refill() {
    let (transport, controller) = FakeTransport::pair();
    let client = Client::new();
    let config = ConnectionConfig::builder()
        .endpoint(endpoint())
        .rate_limit(
            RateLimitConfig::builder()
                .capacity(1)
                .refill_rate(1)
                .refill_interval(Duration::from_millis(100))
                .queue_limit(3)
                .build(),
        )
        .build();

    let handle = client
        .connect(config, Arc::new(transport), HandlerRegistry::new(), json!(null), ActorId(4))
        .await
        .expect("connect should succeed");
    let actor = client.registry().resolve(handle).expect("actor should be registered");

    let mut outcomes = Vec::new();
    for i in 0..4 {
        let (tx, _rx) = oneshot::channel();
        let opts = SendOptions { timeout: Duration::from_secs(5), correlate: true, fingerprint: "req".into() };
        let outcome = actor.send_frame(OutboundFrame::text(format!("req{i}")), Some(tx), opts).await;
        outcomes.push(outcome);
    }

    assert!(matches!(outcomes[0], SendOutcome::Sent { .. }), "first request should be allowed immediately");
    for outcome in &outcomes[1..] {
        assert!(matches!(outcome, SendOutcome::RateLimited(_)), "requests beyond capacity should queue");
    }

    let immediate = controller.take_sent_frames();
    assert_eq!(immediate.len(), 1);
    assert_eq!(immediate[0].2.payload, "req0");

    tokio::time::sleep(Duration::from_millis(350)).await;
    let drained = controller.take_sent_frames();
    let payloads: Vec<_> = drained.iter().map(|(_, _, frame)| frame.payload.clone()).collect();
    assert_eq!(payloads, vec!["req1".to_string(), "req2".to_string(), "req3".to_string()], "queue must drain FIFO");
}

/// Scenario 5: a request with no reply within its timeout resolves with a
/// timeout error; a late, duplicate reply for the same id is dropped.
#[tokio::test]
#[test_log::test]
async fn request_timeout_then_late_duplicate_reply_is_dropped() {
    let (transport, controller) = FakeTransport::pair();
    let client = Client::new();

    let handle = client
        .connect(
            ConnectionConfig::builder().endpoint(endpoint()).build(),
            Arc::new(transport),
            HandlerRegistry::new(),
            json!(null),
            ActorId(5),
        )
        .await
        .expect("connect should succeed");
    let actor = client.registry().resolve(handle).expect("actor should be registered");

    let (tx, rx) = oneshot::channel();
    let opts = SendOptions { timeout: Duration::from_millis(50), correlate: true, fingerprint: "req".into() };
    let outcome = actor.send_frame(OutboundFrame::text("will-time-out"), Some(tx), opts).await;
    let SendOutcome::Sent { id: Some(request_id) } = outcome else {
        panic!("expected a correlated send, got {outcome:?}");
    };

    let result = timeout(Duration::from_millis(500), rx).await.expect("waiter should resolve within the timeout window");
    assert!(matches!(result, Ok(Err(CoreError::Timeout(TimeoutError::RequestTimeout)))));

    // Register a callback so we can observe the late reply is still
    // delivered as an unsolicited frame rather than crashing anything —
    // but no second reply to `rx` is possible: it has already been consumed.
    let (cb_tx, cb_rx) = kanal::unbounded_async();
    actor.register_callback(CallbackId(1), cb_tx).await;

    let (th, stream, _) = controller
        .take_sent_frames()
        .into_iter()
        .next()
        .expect("the original frame should have reached the transport");
    controller
        .push_event(th, TransportEvent::Ws { stream, frame: inbound_reply(request_id.0, json!({"id": request_id.0, "result": "too-late"})) })
        .await;

    let event = timeout(Duration::from_secs(1), cb_rx.recv())
        .await
        .expect("late frame should still be broadcast")
        .expect("callback channel should still be open");
    match event {
        CallbackEvent::Frame { frame, .. } => assert_eq!(frame.payload, json!({"id": request_id.0, "result": "too-late"})),
        other => panic!("expected a Frame event, got {other:?}"),
    }
}

/// Scenario 6: a fatal auth rejection drains every waiter, notifies the
/// connection handler, and tears the actor down; subsequent façade calls
/// observe a closed connection.
#[tokio::test]
#[test_log::test]
async fn fatal_auth_rejection_terminates_the_connection() {
    let (transport, controller) = FakeTransport::pair();
    let client = Client::new();
    let connection_handler = EchoConnectionHandler::new();

    let mut handlers = HandlerRegistry::new();
    handlers.connection = Some(Slot::new(Arc::new(connection_handler.clone()), rws_core::actor::unit_state()));
    handlers.auth = Some(Slot::new(Arc::new(RejectingAuthHandler), rws_core::actor::unit_state()));

    let handle = client
        .connect(
            ConnectionConfig::builder().endpoint(endpoint()).build(),
            Arc::new(transport),
            handlers,
            json!(null),
            ActorId(6),
        )
        .await
        .expect("connect should succeed (restoration's own auth step is a no-op here)");

    let send = tokio::spawn({
        let client = client.clone();
        async move { client.send_text(handle, "will-be-drained", Duration::from_secs(5)).await }
    });
    // Give the send a moment to land in the correlation table before the
    // rejection drains it.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let first_handle = rws_core::transport::TransportHandle(1);
    controller
        .push_event(
            first_handle,
            TransportEvent::Ws {
                stream: StreamRef(1),
                frame: InboundMessage {
                    frame_type: FrameType::Text,
                    correlation_id: None,
                    payload: json!({"type": "auth_rejected"}),
                    raw: "{\"type\":\"auth_rejected\"}".into(),
                },
            },
        )
        .await;

    let result = timeout(Duration::from_secs(1), send)
        .await
        .expect("drained waiter should resolve promptly")
        .unwrap();
    assert!(matches!(result, Err(CoreError::Auth(_))), "waiter should be drained with an auth failure");

    timeout(Duration::from_secs(1), async {
        loop {
            if connection_handler.events().iter().any(|e| e.starts_with("disconnect:fatal: auth_failed")) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection handler should observe a fatal disconnect");

    let status_after = client.status(handle).await;
    assert!(status_after.is_err(), "the façade should report the connection as gone after termination");
}

#[derive(Clone)]
struct RejectingAuthHandler;

#[async_trait::async_trait]
impl rws_core::handler::AuthHandler for RejectingAuthHandler {
    async fn handle_auth_response(
        &self,
        _resp: &InboundMessage,
        state: rws_core::handler::HandlerState,
    ) -> rws_core::handler::Directive {
        rws_core::handler::Directive::Stop { reason: "auth_failed".into(), state }
    }
}
