//! Minimal fixture handlers implementing the handler traits with
//! the smallest behavior needed to drive the seed scenarios: enough to
//! observe what happened, nothing venue-specific.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use rws_core::error::CoreError;
use rws_core::handler::{ConnectionHandler, Directive, ErrorHandler, HandlerState, RateLimitHandlerTrait, SubscriptionHandler};
use rws_core::types::{ConnectInfo, DisconnectReason, ErrorClass, FrameType, RateLimitDirective, RateLimitOptions, RateLimitRequest};

/// Records `connect`/`disconnect` calls as plain strings so a test can
/// assert on lifecycle ordering without downcasting handler state.
#[derive(Clone, Default)]
pub struct EchoConnectionHandler {
    events: Arc<Mutex<Vec<String>>>,
}

impl EchoConnectionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl ConnectionHandler for EchoConnectionHandler {
    async fn handle_connect(&self, info: ConnectInfo, state: HandlerState) -> Directive {
        self.events.lock().push(format!("connect:{}:{}", info.host, info.port));
        Directive::Ok(state)
    }

    async fn handle_disconnect(&self, reason: DisconnectReason, state: HandlerState) -> Directive {
        self.events.lock().push(format!("disconnect:{reason}"));
        Directive::Ok(state)
    }

    async fn handle_frame(&self, frame_type: FrameType, data: String, state: HandlerState) -> Directive {
        self.events.lock().push(format!("frame:{frame_type:?}:{data}"));
        Directive::Ok(state)
    }
}

/// Records every channel it is asked to (re)subscribe to, in call order —
/// exactly what scenario 3 (reconnection with subscription restoration)
/// needs to assert on. Confirms every subscribe synchronously (a venue
/// whose subscribe ack is the subscribe call's own reply), so a confirmed
/// record is immediately eligible for restoration replay.
#[derive(Clone, Default)]
pub struct RecordingSubscriptionHandler {
    subscribed: Arc<Mutex<Vec<String>>>,
    next_id: Arc<AtomicU64>,
}

impl RecordingSubscriptionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        self.subscribed.lock().clone()
    }
}

#[async_trait]
impl SubscriptionHandler for RecordingSubscriptionHandler {
    async fn subscribe(&self, channel: &str, _params: Value, state: HandlerState) -> Directive {
        self.subscribed.lock().push(channel.to_string());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Directive::Reply {
            kind: "subscribed".to_string(),
            data: serde_json::json!({ "subscription_id": id }),
            state,
        }
    }
}

/// Every request costs 1 token and is never queued by policy; used by
/// scenarios that are not themselves exercising rate-limit behavior.
pub struct AlwaysAllowRateLimitHandler;

impl RateLimitHandlerTrait for AlwaysAllowRateLimitHandler {
    fn init(&self, _opts: RateLimitOptions) -> HandlerState {
        Box::new(())
    }

    fn check_rate_limit(&self, _request: &RateLimitRequest, state: HandlerState) -> (RateLimitDirective, u64, HandlerState) {
        (RateLimitDirective::Allow, 1, state)
    }
}

/// Classifies every error as recoverable and always agrees to reconnect —
/// used by scenarios exercising the reconnect path without exercising
/// fatal classification.
pub struct ReconnectOnAnyErrorHandler;

#[async_trait]
impl ErrorHandler for ReconnectOnAnyErrorHandler {
    async fn handle_error(&self, _err: &CoreError, _ctx: &str, state: HandlerState) -> Directive {
        Directive::Reconnect(state)
    }

    fn should_reconnect(&self, _err: &CoreError, _attempt: u32, _state: &HandlerState) -> bool {
        true
    }

    fn classify_error(&self, _err: &CoreError, _state: &HandlerState) -> ErrorClass {
        ErrorClass::Recoverable
    }
}
