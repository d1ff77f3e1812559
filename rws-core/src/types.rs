//! Shared vocabulary types threaded through the handler boundary, the
//! transport boundary, and the actor.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque identifier for one logical WebSocket stream inside a transport
/// handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamRef(pub u64);

/// Monotonic correlation id assigned to a request that expects a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Opaque token returned by the rate limiter for a checked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub transport_kind: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    TransportDown(String),
    Fatal(String),
    Closed,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::TransportDown(r) => write!(f, "transport_down: {r}"),
            DisconnectReason::Fatal(r) => write!(f, "fatal: {r}"),
            DisconnectReason::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
}

/// A parsed inbound WebSocket frame, as seen by handlers. `correlation_id`
/// is populated when the message handler / connection handler can read a
/// recognizable `id` field from the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub frame_type: FrameType,
    pub correlation_id: Option<RequestId>,
    pub payload: Value,
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    SubscriptionEvent,
    AuthEvent,
    Unsolicited,
    Control,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    pub frame_type: FrameType,
    pub payload: String,
}

impl OutboundFrame {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Text,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub subscription_id: u64,
    pub channel: String,
    pub params: Value,
    pub status: SubscriptionStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Recoverable,
    Fatal,
}

#[derive(Debug, Clone)]
pub struct RateLimitOptions {
    pub capacity: u64,
    pub refill_rate: u64,
    pub refill_interval: std::time::Duration,
    pub queue_limit: usize,
}

/// A request as seen by the rate-limit decision policy: the core does not
/// interpret `fingerprint`, it is opaque and venue-specific (e.g. an
/// endpoint weight class).
#[derive(Debug, Clone)]
pub struct RateLimitRequest {
    pub fingerprint: String,
    pub arrival: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDirective {
    Allow,
    Queue,
    Reject,
}
