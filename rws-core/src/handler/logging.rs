use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::HandlerState;

/// Telemetry policy. The core treats the logging handler as the sole
/// telemetry surface; it ships a `tracing`-backed default so a
/// connection with no logging handler registered still narrates its
/// lifecycle instead of going silent.
#[async_trait]
pub trait LoggingHandler: Send + Sync {
    fn log_connection_event(&self, event: &str, ctx: Value, state: HandlerState) -> HandlerState {
        info!(target: "rws::connection", event, %ctx);
        state
    }

    fn log_message_event(&self, event: &str, ctx: Value, state: HandlerState) -> HandlerState {
        tracing::debug!(target: "rws::message", event, %ctx);
        state
    }

    fn log_error_event(&self, event: &str, ctx: Value, state: HandlerState) -> HandlerState {
        warn!(target: "rws::error", event, %ctx);
        state
    }
}

/// The default sink used when no `logging` handler is registered.
/// Stateless: its `HandlerState` is always `()`.
pub struct DefaultLoggingHandler;

impl LoggingHandler for DefaultLoggingHandler {}
