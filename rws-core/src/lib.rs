//! `rws-core`: the connection-management core of a resilient WebSocket
//! client for long-lived, financial-exchange-style sessions. Owns the
//! connection actor, reconnection/restoration, rate limiting, request
//! correlation, and the handler dispatch layer; the concrete transport,
//! config-file loading, and logging-sink wiring are the caller's job (see
//! each module's doc comment for the exact boundary).
//!
//! Module layout mirrors the dependency order in which the pieces build on
//! each other, leaves first: `backoff` and `token_bucket` have no internal
//! dependencies; `rate_limiter` and `correlation` build on those plus
//! `handler`/`types`; `state_machine` is pure; `actor` is the integration
//! point that owns everything else; `facade` and `registry` are the
//! caller-facing surface on top of `actor`.

pub mod actor;
pub mod backoff;
pub mod config;
pub mod correlation;
pub mod error;
pub mod facade;
pub mod handler;
pub mod rate_limiter;
pub mod registry;
pub mod restoration;
pub mod state_machine;
pub mod token_bucket;
pub mod transport;
pub mod types;

/// Re-exports the surface most callers need without reaching into
/// individual modules.
pub mod prelude {
    pub use crate::actor::{ActorId, CallbackEvent, CallbackId, SendOptions, SendOutcome};
    pub use crate::config::{ConnectionConfig, Endpoint, ReconnectPolicy, Timeouts};
    pub use crate::error::CoreError;
    pub use crate::facade::Client;
    pub use crate::handler::{Directive, HandlerRegistry, HandlerState};
    pub use crate::registry::{ActorRegistry, ConnectionHandle};
    pub use crate::state_machine::ConnectionStatus;
    pub use crate::transport::{Transport, TransportEvent, TransportHandle};
    pub use crate::types::{FrameType, InboundMessage, OutboundFrame, RequestId, StreamRef};
}
