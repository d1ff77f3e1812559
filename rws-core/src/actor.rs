//! Connection actor: one `tokio::task` per connection, owning the
//! transport handle, the state machine, the correlation table, the rate
//! limiter, the handler registry and the request buffer exclusively.
//! Split into a cheap, cloneable caller-facing handle and an internal
//! task loop: `ActorHandle` is the former, `ConnectionActor` the latter.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backoff::BackoffPolicy;
use crate::config::ConnectionConfig;
use crate::correlation::{CorrelationTable, ReplySender};
use crate::error::{CoreError, TimeoutError, TransportError};
use crate::handler::{Directive, HandlerRegistry, HandlerState, invoke_guarded};
use crate::rate_limiter::{CheckOutcome, QueueId, RateLimiter};
use crate::restoration::SubscriptionTable;
use crate::state_machine::{ConnectionStatus, StateMachine, TransitionEvent, TransitionOutcome};
use crate::transport::{OpenOptions, Transport, TransportEvent, TransportHandle};
use crate::types::{ConnectInfo, DisconnectReason, ErrorClass, FrameType, InboundMessage, OutboundFrame, RequestId, StreamRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// Per-call options for [`ActorHandle::send_frame`].
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub timeout: Duration,
    /// Whether this frame expects a correlated reply (assign an id, wait
    /// on `reply_to`) or is fire-and-forget.
    pub correlate: bool,
    /// Opaque cost-classification key handed to the rate-limit handler.
    pub fingerprint: String,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            correlate: true,
            fingerprint: String::new(),
        }
    }
}

#[derive(Debug)]
pub enum SendOutcome {
    Sent { id: Option<RequestId> },
    Buffered,
    RateLimited(QueueId),
    Error(CoreError),
}

/// What a registered callback receives: unsolicited inbound frames and
/// connection lifecycle notices.
#[derive(Debug, Clone)]
pub enum CallbackEvent {
    Frame { stream: StreamRef, frame: InboundMessage },
    Lifecycle { event: String, ctx: serde_json::Value },
}

/// The directive `ErrorHandler::handle_error` hands back, collapsed to the
/// three outcomes the actor obeys: reconnect, stop with reason, or
/// continue (fall back to `classify_error`'s own verdict).
enum ErrorDirective {
    Reconnect,
    Stop(String),
    Continue,
}

struct BufferedRequest {
    frame: OutboundFrame,
    reply_to: Option<ReplySender>,
    opts: SendOptions,
}

enum ActorCommand {
    SendFrame {
        frame: OutboundFrame,
        reply_to: Option<ReplySender>,
        opts: SendOptions,
        ack: oneshot::Sender<SendOutcome>,
    },
    Close {
        ack: oneshot::Sender<()>,
    },
    RegisterCallback {
        id: CallbackId,
        sender: kanal::AsyncSender<CallbackEvent>,
        ack: oneshot::Sender<()>,
    },
    UnregisterCallback {
        id: CallbackId,
        ack: oneshot::Sender<()>,
    },
    GetStatus {
        ack: oneshot::Sender<ConnectionStatus>,
    },
    TransferOwnership {
        new_owner: CallbackId,
        ack: oneshot::Sender<Result<(), CoreError>>,
    },
    ReceiveOwnership {
        transport_handle: TransportHandle,
        ack: oneshot::Sender<Result<(), CoreError>>,
    },
    Subscribe {
        channel: String,
        params: serde_json::Value,
        ack: oneshot::Sender<Result<(), CoreError>>,
    },
    Unsubscribe {
        channel: String,
        ack: oneshot::Sender<Result<(), CoreError>>,
    },
    Authenticate {
        credentials: serde_json::Value,
        ack: oneshot::Sender<Result<(), CoreError>>,
    },
}

/// Cheap, cloneable reference callers hold. All operations round-trip
/// through the actor's mailbox; nothing here touches actor state directly.
#[derive(Clone)]
pub struct ActorHandle {
    pub actor_id: ActorId,
    mailbox: kanal::AsyncSender<ActorCommand>,
}

impl ActorHandle {
    /// Used by `ActorRegistry` tests and by `connect()` itself to pair a
    /// mailbox sender with its id; never constructed by handler code.
    pub(crate) fn from_parts(actor_id: ActorId, mailbox: kanal::AsyncSender<ActorCommand>) -> Self {
        Self { actor_id, mailbox }
    }

    pub async fn send_frame(&self, frame: OutboundFrame, reply_to: Option<ReplySender>, opts: SendOptions) -> SendOutcome {
        let (tx, rx) = oneshot::channel();
        if self
            .mailbox
            .send(ActorCommand::SendFrame { frame, reply_to, opts, ack: tx })
            .await
            .is_err()
        {
            return SendOutcome::Error(CoreError::Closed);
        }
        rx.await.unwrap_or(SendOutcome::Error(CoreError::Closed))
    }

    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.mailbox.send(ActorCommand::Close { ack: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn register_callback(&self, id: CallbackId, sender: kanal::AsyncSender<CallbackEvent>) {
        let (tx, rx) = oneshot::channel();
        if self
            .mailbox
            .send(ActorCommand::RegisterCallback { id, sender, ack: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub async fn unregister_callback(&self, id: CallbackId) {
        let (tx, rx) = oneshot::channel();
        if self.mailbox.send(ActorCommand::UnregisterCallback { id, ack: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn get_status(&self) -> Option<ConnectionStatus> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.send(ActorCommand::GetStatus { ack: tx }).await.ok()?;
        rx.await.ok()
    }

    pub async fn transfer_ownership(&self, new_owner: CallbackId) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(ActorCommand::TransferOwnership { new_owner, ack: tx })
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    pub async fn receive_ownership(&self, transport_handle: TransportHandle) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(ActorCommand::ReceiveOwnership { transport_handle, ack: tx })
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    /// Registers `channel` in the restoration table as `pending` and invokes
    /// the subscription handler's wire-level `subscribe`. Distinct from
    /// [`Self::send_frame`] because it is the only path that writes to
    /// `SubscriptionTable` the restoration pipeline replays from.
    pub async fn subscribe(&self, channel: impl Into<String>, params: serde_json::Value) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(ActorCommand::Subscribe { channel: channel.into(), params, ack: tx })
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    pub async fn unsubscribe(&self, channel: impl Into<String>) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(ActorCommand::Unsubscribe { channel: channel.into(), ack: tx })
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }

    /// Invokes the auth handler's `authenticate` directly, independent of
    /// the restoration pipeline's own auth step — for callers that need to
    /// (re)authenticate mid-session outside a reconnect.
    pub async fn authenticate(&self, credentials: serde_json::Value) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(ActorCommand::Authenticate { credentials, ack: tx })
            .await
            .map_err(|_| CoreError::Closed)?;
        rx.await.map_err(|_| CoreError::Closed)?
    }
}

/// The task loop. Never accessed directly by callers; see [`ActorHandle`].
pub struct ConnectionActor {
    id: ActorId,
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    transport_handle: Option<TransportHandle>,
    stream: Option<StreamRef>,
    state: StateMachine,
    correlation: CorrelationTable,
    rate_limiter: RateLimiter,
    handlers: HandlerRegistry,
    request_buffer: VecDeque<BufferedRequest>,
    subscriptions: SubscriptionTable,
    callbacks: HashMap<CallbackId, kanal::AsyncSender<CallbackEvent>>,
    reconnect_attempt: u32,
    cancel: CancellationToken,
    tasks: TaskTracker,

    mailbox_rx: kanal::AsyncReceiver<ActorCommand>,
    expiry_tx: kanal::AsyncSender<RequestId>,
    expiry_rx: kanal::AsyncReceiver<RequestId>,
    deferred_tx: mpsc::UnboundedSender<BufferedRequest>,
    deferred_rx: mpsc::UnboundedReceiver<BufferedRequest>,
    reconnect_tx: mpsc::UnboundedSender<()>,
    reconnect_rx: mpsc::UnboundedReceiver<()>,
    transport_events_rx: Option<kanal::AsyncReceiver<TransportEvent>>,
}

impl ConnectionActor {
    /// Performs the initial connect handshake and, on
    /// success, spawns the steady-state loop. Returns before the loop
    /// starts so `connect()` callers observe connect failures directly
    /// instead of only through `get_status`.
    pub async fn connect(
        id: ActorId,
        config: ConnectionConfig,
        transport: Arc<dyn Transport>,
        handlers: HandlerRegistry,
        auth_credentials: serde_json::Value,
    ) -> Result<ActorHandle, CoreError> {
        config.validate()?;
        let (mailbox_tx, mailbox_rx) = kanal::unbounded_async();
        let (expiry_tx, expiry_rx) = kanal::unbounded_async();
        let (deferred_tx, deferred_rx) = mpsc::unbounded_channel();
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();

        let rate_cfg = &config.rate_limit;
        let rate_limit_handler: Arc<dyn crate::handler::RateLimitHandlerTrait> = handlers
            .rate_limit
            .as_ref()
            .map(|slot| slot.handler.clone())
            .unwrap_or_else(|| Arc::new(crate::handler::DefaultAllowHandler));
        let rate_limiter = RateLimiter::new(
            rate_cfg.capacity,
            rate_cfg.refill_rate,
            rate_cfg.refill_interval,
            rate_cfg.queue_limit,
            rate_limit_handler,
            Instant::now(),
        );

        let mut actor = ConnectionActor {
            id,
            config: config.clone(),
            transport,
            transport_handle: None,
            stream: None,
            state: StateMachine::new(),
            correlation: CorrelationTable::new(),
            rate_limiter,
            handlers,
            request_buffer: VecDeque::new(),
            subscriptions: SubscriptionTable::new(),
            callbacks: HashMap::new(),
            reconnect_attempt: 0,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            mailbox_rx,
            expiry_tx,
            expiry_rx,
            deferred_tx,
            deferred_rx,
            reconnect_tx,
            reconnect_rx,
            transport_events_rx: None,
        };

        actor.perform_handshake(auth_credentials.clone()).await?;

        let handle = ActorHandle { actor_id: id, mailbox: mailbox_tx };
        let auth_credentials_for_loop = auth_credentials;
        tokio::spawn(async move {
            actor.run(auth_credentials_for_loop).await;
        });
        Ok(handle)
    }

    async fn perform_handshake(&mut self, auth_credentials: serde_json::Value) -> Result<(), CoreError> {
        self.transition(TransitionEvent::Start)?;

        let endpoint = self.config.endpoint.clone();
        let open_opts = OpenOptions {
            connect_timeout: self.config.timeouts.connect,
        };
        let handle = match self.transport.open(&endpoint.host, endpoint.port, open_opts).await {
            Ok(h) => h,
            Err(e) => {
                self.transition(TransitionEvent::TransportError).ok();
                return Err(CoreError::Transport(e));
            }
        };

        let protocol = match self.transport.await_up(handle, self.config.timeouts.connect).await {
            Ok(p) => p,
            Err(e) => {
                self.transition(TransitionEvent::Timeout).ok();
                return Err(CoreError::Transport(e));
            }
        };
        self.transition(TransitionEvent::TransportUp)?;
        self.transport_handle = Some(handle);
        self.invoke_connection_handle_connect(&endpoint, protocol).await;

        let stream = match self.transport.ws_upgrade(handle, &endpoint.path, Vec::new()).await {
            Ok(s) => s,
            Err(e) => {
                self.transition(TransitionEvent::UpgradeFail).ok();
                return Err(CoreError::Transport(e));
            }
        };
        self.stream = Some(stream);
        self.transition(TransitionEvent::UpgradeOk)?;

        self.transport_events_rx = Some(
            self.transport
                .events(handle)
                .await
                .map_err(CoreError::Transport)?,
        );

        self.run_restoration(auth_credentials).await;
        Ok(())
    }

    fn transition(&mut self, event: TransitionEvent) -> Result<TransitionOutcome, CoreError> {
        self.state.apply(event).map_err(CoreError::StateMachine)
    }

    async fn invoke_connection_handle_connect(&mut self, endpoint: &crate::config::Endpoint, _protocol: crate::transport::Protocol) {
        let Some(slot) = self.handlers.connection.as_mut() else {
            return;
        };
        let info = ConnectInfo {
            host: endpoint.host.clone(),
            port: endpoint.port,
            path: endpoint.path.clone(),
            transport_kind: "websocket",
        };
        let handler = slot.handler.clone();
        let state = slot.take_state();
        let outcome = invoke_guarded("handle_connect", || async move { handler.handle_connect(info, state).await }).await;
        if let Ok(directive) = outcome {
            slot.state = directive.into_state();
        }
    }

    /// Restoration pipeline: auth, then confirmed-subscription
    /// replay, then flush the request buffer.
    async fn run_restoration(&mut self, auth_credentials: serde_json::Value) {
        if let Some(slot) = self.handlers.auth.as_mut() {
            let needs_reauth = slot.handler.needs_reauthentication(&slot.state);
            if needs_reauth || self.config.auto_reauthenticate {
                let handler = slot.handler.clone();
                let state = slot.take_state();
                let deadline = self.config.timeouts.request;
                let fut = async move { handler.authenticate(auth_credentials, state).await };
                match tokio::time::timeout(deadline, invoke_guarded("authenticate", || fut)).await {
                    Ok(Ok(directive)) => {
                        let is_error = matches!(directive, Directive::Error { .. } | Directive::Stop { .. });
                        slot.state = directive.into_state();
                        if is_error {
                            tracing::warn!(target: "rws::auth", "authentication rejected during restoration");
                            self.correlation.drain_all(CoreError::Auth(crate::error::AuthError::ReauthFailed));
                            self.invoke_connection_handle_disconnect(DisconnectReason::Fatal("reauth_failed".into())).await;
                            self.cancel.cancel();
                            return;
                        }
                    }
                    Ok(Err(err)) => {
                        tracing::warn!(target: "rws::auth", %err, "authentication handler failed");
                        return;
                    }
                    Err(_) => {
                        tracing::warn!(target: "rws::auth", "authentication timed out during restoration");
                        self.correlation.drain_all(CoreError::Timeout(TimeoutError::RequestTimeout));
                        self.invoke_connection_handle_disconnect(DisconnectReason::Fatal("reauth_timeout".into())).await;
                        self.cancel.cancel();
                        return;
                    }
                }
            }
        }

        for record in self.subscriptions.confirmed_in_order() {
            if let Some(slot) = self.handlers.subscription.as_mut() {
                let handler = slot.handler.clone();
                let state = slot.take_state();
                let channel = record.channel.clone();
                let params = record.params.clone();
                match invoke_guarded("subscribe", || async move { handler.subscribe(&channel, params, state).await }).await {
                    Ok(directive) => self.apply_subscribe_directive(&record.channel, directive),
                    Err(err) => tracing::warn!(target: "rws::subscription", %err, channel = %record.channel, "resubscribe failed"),
                }
            }
        }

        while let Some(buffered) = self.request_buffer.pop_front() {
            self.deliver_frame(buffered.frame, buffered.reply_to, buffered.opts).await;
        }
    }

    async fn handle_send_frame(&mut self, frame: OutboundFrame, reply_to: Option<ReplySender>, opts: SendOptions) -> SendOutcome {
        match self.state.status() {
            ConnectionStatus::WebsocketConnected => {
                let now = Instant::now();
                match self.rate_limiter.check(opts.fingerprint.clone(), now) {
                    CheckOutcome::Allow(_) => self.deliver_frame(frame, reply_to, opts).await,
                    CheckOutcome::Queue(qid) => {
                        let deferred_tx = self.deferred_tx.clone();
                        let pending = BufferedRequest { frame, reply_to, opts };
                        self.rate_limiter.on_process(qid, move || {
                            let _ = deferred_tx.send(pending);
                        });
                        SendOutcome::RateLimited(qid)
                    }
                    CheckOutcome::Reject(reason) => SendOutcome::Error(CoreError::RateLimit(reason)),
                }
            }
            ConnectionStatus::Connecting | ConnectionStatus::Connected | ConnectionStatus::Disconnected | ConnectionStatus::Reconnecting => {
                if self.request_buffer.len() >= self.config.request_buffer_limit {
                    return SendOutcome::Error(CoreError::BufferFull);
                }
                self.request_buffer.push_back(BufferedRequest { frame, reply_to, opts });
                SendOutcome::Buffered
            }
            ConnectionStatus::Initialized | ConnectionStatus::Error => {
                SendOutcome::Error(CoreError::Transport(TransportError::NotConnected))
            }
        }
    }

    /// Writes to the wire and, if correlated, registers the waiter. Used
    /// by the initial `Allow` path, by queued requests once the rate
    /// limiter releases them, and by restoration's buffer flush — the
    /// single point every outbound frame funnels through once admission
    /// has already been decided.
    async fn deliver_frame(&mut self, frame: OutboundFrame, reply_to: Option<ReplySender>, opts: SendOptions) -> SendOutcome {
        let (Some(handle), Some(stream)) = (self.transport_handle, self.stream) else {
            return SendOutcome::Error(CoreError::Transport(TransportError::NotConnected));
        };
        let id = if opts.correlate { Some(self.correlation.fresh_id()) } else { None };
        if let Err(e) = self.transport.ws_send(handle, stream, frame.clone()).await {
            return SendOutcome::Error(CoreError::Transport(e));
        }
        if let (Some(id), Some(reply_to)) = (id, reply_to) {
            self.correlation.insert(
                id,
                reply_to,
                serde_json::Value::String(frame.payload.clone()),
                opts.timeout,
                self.expiry_tx.clone(),
            );
        }
        SendOutcome::Sent { id }
    }

    async fn handle_command(&mut self, cmd: ActorCommand) {
        match cmd {
            ActorCommand::SendFrame { frame, reply_to, opts, ack } => {
                let outcome = self.handle_send_frame(frame, reply_to, opts).await;
                let _ = ack.send(outcome);
            }
            ActorCommand::Close { ack } => {
                self.shutdown(DisconnectReason::Closed).await;
                let _ = ack.send(());
            }
            ActorCommand::RegisterCallback { id, sender, ack } => {
                self.callbacks.insert(id, sender);
                let _ = ack.send(());
            }
            ActorCommand::UnregisterCallback { id, ack } => {
                self.callbacks.remove(&id);
                let _ = ack.send(());
            }
            ActorCommand::GetStatus { ack } => {
                let _ = ack.send(self.state.status());
            }
            ActorCommand::TransferOwnership { new_owner, ack } => {
                let result = if self.callbacks.contains_key(&new_owner) {
                    Ok(())
                } else {
                    Err(CoreError::Transport(TransportError::InvalidTarget))
                };
                let _ = ack.send(result);
            }
            ActorCommand::ReceiveOwnership { transport_handle, ack } => {
                let result = match self.transport.info(transport_handle).await {
                    Ok(_) => {
                        self.transport_handle = Some(transport_handle);
                        Ok(())
                    }
                    Err(_) => Err(CoreError::Transport(TransportError::TransportDead)),
                };
                let _ = ack.send(result);
            }
            ActorCommand::Subscribe { channel, params, ack } => {
                let result = self.handle_subscribe(channel, params).await;
                let _ = ack.send(result);
            }
            ActorCommand::Unsubscribe { channel, ack } => {
                let result = self.handle_unsubscribe(channel).await;
                let _ = ack.send(result);
            }
            ActorCommand::Authenticate { credentials, ack } => {
                let result = self.handle_authenticate(credentials).await;
                let _ = ack.send(result);
            }
        }
    }

    async fn handle_authenticate(&mut self, credentials: serde_json::Value) -> Result<(), CoreError> {
        let Some(slot) = self.handlers.auth.as_mut() else {
            return Ok(());
        };
        let handler = slot.handler.clone();
        let state = slot.take_state();
        let directive = invoke_guarded("authenticate", || async move { handler.authenticate(credentials, state).await }).await?;
        let failed = matches!(directive, Directive::Error { .. } | Directive::Stop { .. });
        slot.state = directive.into_state();
        if failed {
            return Err(CoreError::Auth(crate::error::AuthError::AuthFailed));
        }
        Ok(())
    }

    /// Upserts a `pending` record, then invokes the subscription handler.
    /// If `subscribe`'s directive is `Reply { kind: "subscribed", data }`
    /// the record is confirmed immediately (a venue whose subscribe call
    /// is itself the acknowledgment); any other non-error directive leaves
    /// it `pending` for a later `handle_subscription_response` to confirm.
    async fn handle_subscribe(&mut self, channel: String, params: serde_json::Value) -> Result<(), CoreError> {
        self.subscriptions.upsert(crate::types::SubscriptionRecord {
            subscription_id: 0,
            channel: channel.clone(),
            params: params.clone(),
            status: crate::types::SubscriptionStatus::Pending,
            error: None,
        });
        let Some(slot) = self.handlers.subscription.as_mut() else {
            return Ok(());
        };
        let handler = slot.handler.clone();
        let state = slot.take_state();
        let channel_clone = channel.clone();
        let directive = invoke_guarded("subscribe", || async move { handler.subscribe(&channel_clone, params, state).await }).await?;
        self.apply_subscribe_directive(&channel, directive);
        Ok(())
    }

    async fn handle_unsubscribe(&mut self, channel: String) -> Result<(), CoreError> {
        let Some(slot) = self.handlers.subscription.as_mut() else {
            self.subscriptions.remove(&channel);
            return Ok(());
        };
        let handler = slot.handler.clone();
        let state = slot.take_state();
        let channel_clone = channel.clone();
        let directive = invoke_guarded("unsubscribe", || async move { handler.unsubscribe(&channel_clone, state).await }).await?;
        slot.state = directive.into_state();
        self.subscriptions.remove(&channel);
        Ok(())
    }

    fn apply_subscribe_directive(&mut self, channel: &str, directive: Directive) {
        match directive {
            Directive::Reply { kind, data, state } => {
                if let Some(slot) = self.handlers.subscription.as_mut() {
                    slot.state = state;
                }
                if kind == "subscribed" {
                    let id = data.get("subscription_id").and_then(serde_json::Value::as_u64).unwrap_or(0);
                    self.subscriptions.mark_confirmed(channel, id);
                }
            }
            Directive::Error { reason, state } => {
                if let Some(slot) = self.handlers.subscription.as_mut() {
                    slot.state = state;
                }
                self.subscriptions.mark_failed(channel, reason.to_string());
            }
            other => {
                if let Some(slot) = self.handlers.subscription.as_mut() {
                    slot.state = other.into_state();
                }
            }
        }
    }

    /// Counterpart to [`Self::apply_subscribe_directive`] for the async
    /// confirmation path: a `handle_subscription_response` directive of
    /// kind `"subscription_confirmed"` / `"subscription_failed"` carrying
    /// `{channel, subscription_id}` / `{channel, error}` updates the
    /// restoration table the same way a synchronous `"subscribed"` reply
    /// does from `handle_subscribe`.
    fn apply_subscription_response_directive(&mut self, directive: Directive) {
        match directive {
            Directive::Reply { kind, data, state } => {
                if let Some(slot) = self.handlers.subscription.as_mut() {
                    slot.state = state;
                }
                let channel = data.get("channel").and_then(serde_json::Value::as_str).map(str::to_string);
                match (kind.as_str(), channel) {
                    ("subscription_confirmed", Some(channel)) => {
                        let id = data.get("subscription_id").and_then(serde_json::Value::as_u64).unwrap_or(0);
                        self.subscriptions.mark_confirmed(&channel, id);
                    }
                    ("subscription_failed", Some(channel)) => {
                        let error = data.get("error").and_then(serde_json::Value::as_str).unwrap_or("subscription failed").to_string();
                        self.subscriptions.mark_failed(&channel, error);
                    }
                    _ => {}
                }
            }
            other => {
                if let Some(slot) = self.handlers.subscription.as_mut() {
                    slot.state = other.into_state();
                }
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Ws { stream, frame } => self.handle_inbound_frame(stream, frame).await,
            TransportEvent::Down { reason, .. } => self.handle_transport_down(reason).await,
            TransportEvent::Error { reason, .. } => self.handle_transport_error(reason).await,
            TransportEvent::Up { .. } | TransportEvent::Upgrade { .. } => {
                tracing::debug!(target: "rws::actor", "ignoring redundant transport event outside handshake");
            }
        }
    }

    async fn handle_inbound_frame(&mut self, stream: StreamRef, frame: InboundMessage) {
        let valid = self
            .handlers
            .message
            .as_ref()
            .map(|slot| slot.handler.validate_message(&frame))
            .unwrap_or(true);
        if !valid {
            tracing::debug!(target: "rws::actor", "dropping frame that failed validation");
            return;
        }

        if let Some(id) = frame.correlation_id {
            if let Some(original) = self.correlation.original_payload(id) {
                tracing::trace!(target: "rws::correlation", ?id, request = %original, "resolving correlated reply");
            }
            if let Some(reply_to) = self.correlation.take(id) {
                let payload = frame.payload.clone();
                let _ = reply_to.send(Ok(payload));
                self.broadcast_callbacks(CallbackEvent::Frame { stream, frame }).await;
                return;
            }
        }

        match frame.frame_type {
            FrameType::Close => {
                self.broadcast_callbacks(CallbackEvent::Frame { stream, frame }).await;
            }
            _ => {
                if let Some(slot) = self.handlers.subscription.as_mut() {
                    let handler = slot.handler.clone();
                    let state = slot.take_state();
                    let frame_clone = frame.clone();
                    if let Ok(directive) =
                        invoke_guarded("handle_subscription_response", || async move { handler.handle_subscription_response(&frame_clone, state).await }).await
                    {
                        self.apply_subscription_response_directive(directive);
                    }
                }
                if let Some(slot) = self.handlers.auth.as_mut() {
                    let handler = slot.handler.clone();
                    let state = slot.take_state();
                    let frame_clone = frame.clone();
                    if let Ok(directive) =
                        invoke_guarded("handle_auth_response", || async move { handler.handle_auth_response(&frame_clone, state).await }).await
                    {
                        let fatal = matches!(directive, Directive::Stop { .. } | Directive::Error { .. });
                        slot.state = directive.into_state();
                        if fatal {
                            tracing::warn!(target: "rws::auth", "auth handler rejected session, terminating connection");
                            self.correlation.drain_all(CoreError::Auth(crate::error::AuthError::AuthFailed));
                            self.invoke_connection_handle_disconnect(DisconnectReason::Fatal("auth_failed".into())).await;
                            self.cancel.cancel();
                            return;
                        }
                    }
                }
                if let Some(slot) = self.handlers.connection.as_mut() {
                    let handler = slot.handler.clone();
                    let state = slot.take_state();
                    let data = frame.raw.clone();
                    let frame_type = frame.frame_type;
                    if let Ok(directive) =
                        invoke_guarded("handle_frame", || async move { handler.handle_frame(frame_type, data, state).await }).await
                    {
                        slot.state = directive.into_state();
                    }
                }
                self.broadcast_callbacks(CallbackEvent::Frame { stream, frame }).await;
            }
        }
    }

    async fn broadcast_callbacks(&self, event: CallbackEvent) {
        for sender in self.callbacks.values() {
            let _ = sender.send(event.clone()).await;
        }
    }

    async fn handle_transport_down(&mut self, reason: String) {
        let err = CoreError::Transport(TransportError::NotConnected);
        let (_, directive) = self.consult_error_handler(&err, &reason).await;
        if let ErrorDirective::Stop(stop_reason) = directive {
            self.correlation.drain_all(CoreError::Fatal(stop_reason.clone()));
            self.invoke_connection_handle_disconnect(DisconnectReason::Fatal(stop_reason)).await;
            self.cancel.cancel();
            return;
        }

        if self.transition(TransitionEvent::TransportDown).is_err() {
            return;
        }
        if !self.config.reconnect_policy.reconnect_on_error {
            self.correlation.drain_all(CoreError::Transport(TransportError::NotConnected));
        }
        self.broadcast_callbacks(CallbackEvent::Lifecycle {
            event: "transport_down".into(),
            ctx: serde_json::json!({ "reason": reason }),
        })
        .await;
        self.try_schedule_reconnect();
    }

    /// Runs the error handler's `log_error` → `classify_error` →
    /// `handle_error` sequence for `err`, returning the classification and
    /// the directive the actor must obey. `handle_error`'s default impl
    /// returns `Reconnect`, which agrees with the default `classify_error`
    /// for a non-fatal error, so the no-custom-handler case is unaffected.
    async fn consult_error_handler(&mut self, err: &CoreError, ctx: &str) -> (ErrorClass, ErrorDirective) {
        let class = if let Some(slot) = self.handlers.error.as_ref() {
            slot.handler.classify_error(err, &slot.state)
        } else {
            ErrorClass::Recoverable
        };
        if let Some(slot) = self.handlers.error.as_mut() {
            let handler = slot.handler.clone();
            let state = slot.take_state();
            let ctx_owned = ctx.to_string();
            let err_clone = err.clone();
            if let Ok(new_state) = invoke_guarded("log_error", || async move {
                let s = handler.log_error(&err_clone, &ctx_owned, state).await;
                Directive::Ok(s)
            })
            .await
            {
                slot.state = new_state.into_state();
            }
        }

        let directive = if let Some(slot) = self.handlers.error.as_mut() {
            let handler = slot.handler.clone();
            let state = slot.take_state();
            let ctx_owned = ctx.to_string();
            let err_clone = err.clone();
            match invoke_guarded("handle_error", || async move { handler.handle_error(&err_clone, &ctx_owned, state).await }).await {
                Ok(directive) => {
                    let outcome = match &directive {
                        Directive::Stop { reason, .. } => ErrorDirective::Stop(reason.clone()),
                        Directive::Error { reason, .. } => ErrorDirective::Stop(reason.to_string()),
                        Directive::Reconnect(_) => ErrorDirective::Reconnect,
                        _ => ErrorDirective::Continue,
                    };
                    slot.state = directive.into_state();
                    outcome
                }
                Err(_) => ErrorDirective::Continue,
            }
        } else {
            ErrorDirective::Continue
        };
        (class, directive)
    }

    async fn handle_transport_error(&mut self, reason: String) {
        let err = CoreError::Transport(TransportError::TransportDead);
        let (class, directive) = self.consult_error_handler(&err, &reason).await;

        if let ErrorDirective::Stop(stop_reason) = directive {
            self.correlation.drain_all(CoreError::Fatal(stop_reason.clone()));
            self.invoke_connection_handle_disconnect(DisconnectReason::Fatal(stop_reason)).await;
            self.cancel.cancel();
            return;
        }
        let force_reconnect = matches!(directive, ErrorDirective::Reconnect);

        // The transport event receiver is only armed once `WebsocketConnected`
        // is reached, so a `transport_error` here always arrives from
        // `WebsocketConnected`, `Disconnected`, or `Reconnecting` — never
        // `Connecting`, the only status `TransitionEvent::TransportError` is
        // legal from. Route a recoverable error through the same
        // `transport_down` transition `handle_transport_down` uses instead of
        // gating on an illegal transition that always fails.
        match class {
            ErrorClass::Recoverable => {
                if self.transition(TransitionEvent::TransportDown).is_ok() {
                    if !self.config.reconnect_policy.reconnect_on_error {
                        self.correlation.drain_all(CoreError::Transport(TransportError::NotConnected));
                    }
                    self.try_schedule_reconnect();
                }
            }
            ErrorClass::Fatal if force_reconnect => {
                if self.transition(TransitionEvent::TransportDown).is_ok() {
                    self.try_schedule_reconnect();
                }
            }
            ErrorClass::Fatal => {
                let _ = self.transition(TransitionEvent::TransportDown);
                self.correlation.drain_all(CoreError::Fatal(reason));
                self.invoke_connection_handle_disconnect(DisconnectReason::Fatal("transport error".into())).await;
                self.cancel.cancel();
            }
        }
    }

    async fn invoke_connection_handle_disconnect(&mut self, reason: DisconnectReason) {
        let Some(slot) = self.handlers.connection.as_mut() else {
            return;
        };
        let handler = slot.handler.clone();
        let state = slot.take_state();
        if let Ok(directive) = invoke_guarded("handle_disconnect", || async move { handler.handle_disconnect(reason, state).await }).await {
            slot.state = directive.into_state();
        }
    }

    fn try_schedule_reconnect(&mut self) {
        if self.transition(TransitionEvent::ScheduleReconnect).is_err() {
            return;
        }
        let attempt = self.reconnect_attempt;
        if !self.config.reconnect_policy.max_attempts.allows(attempt) {
            tracing::warn!(target: "rws::actor", attempt, "reconnect attempts exhausted");
            self.correlation.drain_all(CoreError::Fatal("reconnect attempts exhausted".into()));
            self.cancel.cancel();
            return;
        }
        self.reconnect_attempt += 1;
        let backoff = BackoffPolicy::new(
            self.config.reconnect_policy.backoff_kind,
            self.config.reconnect_policy.base_delay,
            self.config.reconnect_policy.max_delay,
        );
        let delay = backoff.delay(attempt);
        tracing::info!(target: "rws::actor", attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        let reconnect_tx = self.reconnect_tx.clone();
        self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = reconnect_tx.send(());
        });
    }

    async fn attempt_reconnect(&mut self, auth_credentials: serde_json::Value) {
        if self.transition(TransitionEvent::Start).is_err() {
            return;
        }
        let endpoint = self.config.endpoint.clone();
        let open_opts = OpenOptions {
            connect_timeout: self.config.timeouts.connect,
        };
        let handle = match self.transport.open(&endpoint.host, endpoint.port, open_opts).await {
            Ok(h) => h,
            Err(_) => {
                let _ = self.transition(TransitionEvent::TransportError);
                let _ = self.transition(TransitionEvent::Recoverable);
                self.try_schedule_reconnect();
                return;
            }
        };
        let protocol = match self.transport.await_up(handle, self.config.timeouts.connect).await {
            Ok(p) => p,
            Err(_) => {
                let _ = self.transition(TransitionEvent::Timeout);
                let _ = self.transition(TransitionEvent::Recoverable);
                self.try_schedule_reconnect();
                return;
            }
        };
        let _ = self.transition(TransitionEvent::TransportUp);
        self.transport_handle = Some(handle);
        self.invoke_connection_handle_connect(&endpoint, protocol).await;

        let stream = match self.transport.ws_upgrade(handle, &endpoint.path, Vec::new()).await {
            Ok(s) => s,
            Err(_) => {
                let _ = self.transition(TransitionEvent::UpgradeFail);
                let _ = self.transition(TransitionEvent::Recoverable);
                self.try_schedule_reconnect();
                return;
            }
        };
        self.stream = Some(stream);
        let _ = self.transition(TransitionEvent::UpgradeOk);
        match self.transport.events(handle).await {
            Ok(rx) => self.transport_events_rx = Some(rx),
            Err(_) => self.transport_events_rx = None,
        }
        self.reconnect_attempt = 0;
        self.run_restoration(auth_credentials).await;
    }

    async fn shutdown(&mut self, reason: DisconnectReason) {
        self.cancel.cancel();
        self.correlation.drain_all(CoreError::Closed);
        if let Some(handle) = self.transport_handle {
            let _ = self.transport.close(handle).await;
        }
        self.invoke_connection_handle_disconnect(reason).await;
        let _ = self.transition(TransitionEvent::Close);
    }

    /// The steady-state loop: demultiplexes caller
    /// commands, transport events, request-timeout notifications,
    /// rate-limiter queue releases, and reconnect timers.
    async fn run(mut self, auth_credentials: serde_json::Value) {
        let tick_interval = self.config.rate_limit.refill_interval.max(Duration::from_millis(1));
        let mut rate_tick = tokio::time::interval(tick_interval);
        rate_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let transport_event = {
                let rx = self.transport_events_rx.as_ref();
                async move {
                    match rx {
                        Some(rx) => rx.recv().await.ok(),
                        None => std::future::pending().await,
                    }
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(target: "rws::actor", actor_id = self.id.0, "actor cancelled, exiting loop");
                    break;
                }
                cmd = self.mailbox_rx.recv() => {
                    match cmd {
                        Ok(cmd) => self.handle_command(cmd).await,
                        Err(_) => {
                            tracing::info!(target: "rws::actor", actor_id = self.id.0, "mailbox closed, no remaining owners");
                            break;
                        }
                    }
                }
                event = transport_event => {
                    if let Some(event) = event {
                        self.handle_transport_event(event).await;
                    }
                }
                id = self.expiry_rx.recv() => {
                    if let Ok(id) = id {
                        self.correlation.expire(id);
                    }
                }
                deferred = self.deferred_rx.recv() => {
                    if let Some(deferred) = deferred {
                        self.deliver_frame(deferred.frame, deferred.reply_to, deferred.opts).await;
                    }
                }
                signal = self.reconnect_rx.recv() => {
                    if signal.is_some() {
                        self.attempt_reconnect(auth_credentials.clone()).await;
                    }
                }
                _ = rate_tick.tick() => {
                    let processed = self.rate_limiter.tick(Instant::now());
                    if processed > 0 {
                        tracing::debug!(target: "rws::actor", processed, "drained rate-limit queue");
                    }
                }
            }
        }
        self.tasks.close();
    }
}

/// Placeholder state kept around purely so a `HandlerState` always exists
/// to take/replace; handlers that track nothing just keep `Box::new(())`.
pub fn unit_state() -> HandlerState {
    Box::new(())
}
