//! Client façade: a thin, synchronous-looking API over the actor. Every
//! call composes encode → `ActorHandle::send_frame` → await a correlated
//! reply → `Result<T, CoreError>`; none of it touches actor state
//! directly, mirroring how a pooled HTTP client exposes plain async
//! methods over an internal connection pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::actor::{ActorHandle, CallbackEvent, CallbackId, SendOptions, SendOutcome};
use crate::error::{CoreError, TransportError};
use crate::handler::HandlerRegistry;
use crate::registry::{ActorRegistry, ConnectionHandle};
use crate::state_machine::ConnectionStatus;
use crate::transport::Transport;
use crate::types::{FrameType, OutboundFrame};

/// Thin API wrapper. Holds the registry used to resolve a
/// `ConnectionHandle` into its live `ActorHandle` before every call, so a
/// `Client` outlives any single reconnect-driven actor respawn.
#[derive(Clone)]
pub struct Client {
    registry: ActorRegistry,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self {
            registry: ActorRegistry::new(),
        }
    }

    pub fn registry(&self) -> &ActorRegistry {
        &self.registry
    }

    /// `connect`: spawns a new `ConnectionActor` and registers it, returning
    /// the lightweight handle callers hold from here on.
    pub async fn connect(
        &self,
        config: crate::config::ConnectionConfig,
        transport: Arc<dyn Transport>,
        handlers: HandlerRegistry,
        auth_credentials: serde_json::Value,
        actor_id: crate::actor::ActorId,
    ) -> Result<ConnectionHandle, CoreError> {
        let handle = crate::actor::ConnectionActor::connect(actor_id, config, transport, handlers, auth_credentials).await?;
        self.registry.register(handle);
        Ok(ConnectionHandle::new(actor_id))
    }

    fn resolve(&self, handle: ConnectionHandle) -> Result<ActorHandle, CoreError> {
        self.registry.resolve(handle).ok_or_else(not_connected)
    }

    async fn request(&self, handle: ConnectionHandle, frame: OutboundFrame, timeout: Duration) -> Result<serde_json::Value, CoreError> {
        let actor = self.resolve(handle)?;
        let (tx, rx) = oneshot::channel();
        let opts = SendOptions {
            timeout,
            correlate: true,
            fingerprint: frame.payload.clone(),
        };
        match actor.send_frame(frame, Some(tx), opts).await {
            SendOutcome::Sent { .. } | SendOutcome::Buffered | SendOutcome::RateLimited(_) => {
                rx.await.unwrap_or(Err(CoreError::Closed))
            }
            SendOutcome::Error(err) => Err(err),
        }
    }

    /// `send_text`: fire a correlated text frame and await its reply.
    pub async fn send_text(&self, handle: ConnectionHandle, text: impl Into<String>, timeout: Duration) -> Result<serde_json::Value, CoreError> {
        self.request(handle, OutboundFrame::text(text), timeout).await
    }

    /// `send_json`: encodes `payload` as a JSON text frame.
    pub async fn send_json(&self, handle: ConnectionHandle, payload: serde_json::Value, timeout: Duration) -> Result<serde_json::Value, CoreError> {
        self.request(handle, OutboundFrame::text(payload.to_string()), timeout).await
    }

    /// `subscribe`: registers `channel` as `pending` in the restoration
    /// table and invokes the subscription handler, which is responsible
    /// for the wire-level write. Confirmation (whether synchronous or via
    /// a later `handle_subscription_response`) updates the same record.
    pub async fn subscribe(&self, handle: ConnectionHandle, channel: &str, params: serde_json::Value) -> Result<(), CoreError> {
        let actor = self.resolve(handle)?;
        actor.subscribe(channel.to_string(), params).await
    }

    pub async fn unsubscribe(&self, handle: ConnectionHandle, channel: &str) -> Result<(), CoreError> {
        let actor = self.resolve(handle)?;
        actor.unsubscribe(channel.to_string()).await
    }

    /// `authenticate`: invokes the auth handler directly, independent of
    /// the restoration pipeline's own auth step — for re-authenticating
    /// mid-session outside a reconnect.
    pub async fn authenticate(&self, handle: ConnectionHandle, credentials: serde_json::Value) -> Result<(), CoreError> {
        let actor = self.resolve(handle)?;
        actor.authenticate(credentials).await
    }

    pub async fn ping(&self, handle: ConnectionHandle, timeout: Duration) -> Result<serde_json::Value, CoreError> {
        let frame = OutboundFrame {
            frame_type: FrameType::Ping,
            payload: String::new(),
        };
        self.request(handle, frame, timeout).await
    }

    pub async fn status(&self, handle: ConnectionHandle) -> Result<ConnectionStatus, CoreError> {
        let actor = self.resolve(handle)?;
        actor.get_status().await.ok_or(CoreError::Closed)
    }

    /// `close`: idempotent — closing an already-deregistered
    /// handle is a no-op rather than an error.
    pub async fn close(&self, handle: ConnectionHandle) -> Result<(), CoreError> {
        if let Some(actor) = self.registry.resolve(handle) {
            actor.close().await;
            self.registry.deregister(handle.actor_id);
        }
        Ok(())
    }

    pub async fn register_callback(
        &self,
        handle: ConnectionHandle,
        id: CallbackId,
        sender: kanal::AsyncSender<CallbackEvent>,
    ) -> Result<ConnectionHandle, CoreError> {
        let actor = self.resolve(handle)?;
        actor.register_callback(id, sender).await;
        Ok(handle)
    }

    pub async fn unregister_callback(&self, handle: ConnectionHandle, id: CallbackId) -> Result<ConnectionHandle, CoreError> {
        let actor = self.resolve(handle)?;
        actor.unregister_callback(id).await;
        Ok(handle)
    }
}

/// Surfaced when a façade call targets a handle whose actor has already
/// terminated and been deregistered — a distinct, named condition from a
/// request timeout, useful for callers that want to branch on it.
pub fn not_connected() -> CoreError {
    CoreError::Transport(TransportError::NotConnected)
}
