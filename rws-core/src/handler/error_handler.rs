use async_trait::async_trait;

use crate::error::CoreError;
use crate::types::ErrorClass;

use super::{Directive, HandlerState};

/// Error classification/recovery policy.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle_error(&self, err: &CoreError, ctx: &str, state: HandlerState) -> Directive {
        let _ = (err, ctx);
        Directive::Reconnect(state)
    }

    fn should_reconnect(&self, err: &CoreError, attempt: u32, state: &HandlerState) -> bool {
        let _ = (err, attempt, state);
        true
    }

    /// Default classification: fatal errors (auth failure, explicit
    /// `CoreError::Fatal`) stay fatal, everything else is recoverable.
    fn classify_error(&self, err: &CoreError, state: &HandlerState) -> ErrorClass {
        let _ = state;
        if err.is_fatal() {
            ErrorClass::Fatal
        } else {
            ErrorClass::Recoverable
        }
    }

    async fn log_error(&self, err: &CoreError, ctx: &str, state: HandlerState) -> HandlerState {
        tracing::warn!(target: "rws::error", %err, ctx, "connection error");
        state
    }
}
