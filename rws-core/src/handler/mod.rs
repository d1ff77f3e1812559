//! Handler dispatch layer: one trait per handler kind plus a single
//! invocation point (`invoke_guarded`) that owns handler-local state and
//! catches panics — an interface-per-kind design with a single `invoke`
//! entrypoint returning a tagged directive, instead of dynamic dispatch
//! to bare module functions.

pub mod auth;
pub mod connection;
pub mod error_handler;
pub mod logging;
pub mod message;
pub mod rate_limit;
pub mod subscription;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::error;

use crate::error::{CoreError, HandlerError};

pub use auth::AuthHandler;
pub use connection::ConnectionHandler;
pub use error_handler::ErrorHandler;
pub use logging::{DefaultLoggingHandler, LoggingHandler};
pub use message::MessageHandler;
pub use rate_limit::{DefaultAllowHandler, RateLimitHandlerTrait};
pub use subscription::SubscriptionHandler;

/// Opaque, type-erased per-handler state. The core never inspects it; it
/// only ever replaces it wholesale with whatever the handler returned.
pub type HandlerState = Box<dyn Any + Send>;

/// Unified directive shape: `{ok,new_s}`, `{reply,kind,data,new_s}`,
/// `{reconnect,new_s}`, `{stop,reason,new_s}`, `{error,reason,new_s}`.
pub enum Directive {
    Ok(HandlerState),
    Reply {
        kind: String,
        data: serde_json::Value,
        state: HandlerState,
    },
    Reconnect(HandlerState),
    Stop {
        reason: String,
        state: HandlerState,
    },
    Error {
        reason: CoreError,
        state: HandlerState,
    },
}

impl Directive {
    /// Consumes the directive, returning the state it carries regardless
    /// of which variant fired. Used by the invoker to write the state back
    /// into the registry slot after every call.
    pub fn into_state(self) -> HandlerState {
        match self {
            Directive::Ok(s)
            | Directive::Reply { state: s, .. }
            | Directive::Reconnect(s)
            | Directive::Stop { state: s, .. }
            | Directive::Error { state: s, .. } => s,
        }
    }
}

/// Runs `f` (an async handler call) to completion, catching a panic that
/// unwinds out of it and turning it into `HandlerError::HandlerFailure`,
/// logged via `tracing` (the default sink used when no logging handler
/// is registered).
pub async fn invoke_guarded<F, Fut>(op_name: &'static str, f: F) -> Result<Directive, CoreError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Directive>,
{
    match AssertUnwindSafe(f()).catch_unwind().await {
        Ok(directive) => Ok(directive),
        Err(panic) => {
            let message = panic_message(&panic);
            error!(target: "rws::handler", op = op_name, %message, "handler panicked");
            Err(CoreError::Handler(HandlerError::HandlerFailure(message)))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// One registry slot: the handler implementation plus its current,
/// type-erased state.
pub struct Slot<H: ?Sized> {
    pub handler: Arc<H>,
    pub state: HandlerState,
}

impl<H: ?Sized> Slot<H> {
    pub fn new(handler: Arc<H>, state: HandlerState) -> Self {
        Self { handler, state }
    }

    /// Takes the current state, leaving a placeholder behind. Callers must
    /// write a real state back (usually via `Directive::into_state`)
    /// before the slot is touched again.
    pub fn take_state(&mut self) -> HandlerState {
        std::mem::replace(&mut self.state, Box::new(()))
    }
}

/// The closed set of recognized handler kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Connection,
    Message,
    Subscription,
    Auth,
    Error,
    RateLimit,
    Logging,
}

/// Owns one slot per handler kind. Logically part of the Connection
/// Actor's state, never shared across actors.
#[derive(Default)]
pub struct HandlerRegistry {
    pub connection: Option<Slot<dyn ConnectionHandler>>,
    pub message: Option<Slot<dyn MessageHandler>>,
    pub subscription: Option<Slot<dyn SubscriptionHandler>>,
    pub auth: Option<Slot<dyn AuthHandler>>,
    pub error: Option<Slot<dyn ErrorHandler>>,
    pub rate_limit: Option<Slot<dyn RateLimitHandlerTrait>>,
    pub logging: Option<Slot<dyn LoggingHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}
