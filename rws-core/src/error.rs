//! The core's error taxonomy: one `thiserror` enum per concern
//! (`TransportError`, `RateLimitError`, ...) collapsed into a single
//! top-level enum since every component here lives in one crate.

use thiserror::Error;

use crate::state_machine::ConnectionStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
    #[error("timeout must be positive: {0}")]
    NonPositiveTimeout(&'static str),
    #[error("refill rate and interval must be positive")]
    NonPositiveRefill,
    #[error("retry_count must not be negative")]
    NegativeRetryCount,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("open failed: {0}")]
    OpenFailed(String),
    #[error("await_up failed: {0}")]
    AwaitUpFailed(String),
    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),
    #[error("stream not found")]
    StreamNotFound,
    #[error("invalid stream status")]
    InvalidStreamStatus,
    #[error("not connected")]
    NotConnected,
    #[error("no transport")]
    NoTransport,
    #[error("transport dead")]
    TransportDead,
    #[error("invalid ownership-transfer target")]
    InvalidTarget,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("id collision: {0}")]
    IdCollision(u64),
    #[error("control frame too large")]
    ControlFrameTooLarge,
    #[error("reserved close code: {0}")]
    ReservedCloseCode(u16),
    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("upgrade timed out")]
    UpgradeTimeout,
    #[error("request timed out")]
    RequestTimeout,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate-limit queue is full")]
    QueueFull,
    #[error("rate-limit handler returned an invalid directive")]
    InternalError,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("handler returned an invalid directive for this operation")]
    InvalidReturn,
    #[error("handler panicked: {0}")]
    HandlerFailure(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal transition from {from:?} on {event} to {to:?}: {reason}")]
pub struct TransitionError {
    pub from: ConnectionStatus,
    pub event: String,
    pub to: Option<ConnectionStatus>,
    pub reason: String,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("authentication failed")]
    AuthFailed,
    #[error("re-authentication failed")]
    ReauthFailed,
}

/// Top-level error type returned by every façade call and internal
/// operation. One `thiserror` enum over every error kind rather than
/// distinct Rust types, since every kind is handled uniformly by the
/// actor's propagation policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error(transparent)]
    StateMachine(#[from] TransitionError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("request buffer is full")]
    BufferFull,
    #[error("connection closed")]
    Closed,
    #[error("no handler registered for this kind")]
    NoHandler,
    #[error("handler does not implement this operation")]
    NoOperation,
}

impl CoreError {
    /// Whether this error, once surfaced to an actor, should itself be
    /// treated as fatal regardless of what the error handler says (a
    /// handler cannot resurrect a connection that already decided to
    /// stop).
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Fatal(_) | CoreError::Auth(AuthError::AuthFailed))
    }
}
