//! Transport boundary: the core is transport-agnostic beyond this
//! surface. A real implementation would wrap `tokio-tungstenite` plus a
//! TLS layer; that concrete adapter is out of scope here — `rws-testkit`
//! instead ships a fully in-memory `FakeTransport` for tests.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{OutboundFrame, StreamRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    pub connect_timeout: std::time::Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    Http2,
}

/// Inbound asynchronous events the transport pushes to whichever owner is
/// currently registered via `set_owner`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Up { protocol: Protocol },
    Down { reason: String, killed: bool, unprocessed: Vec<StreamRef> },
    Upgrade { stream: StreamRef, headers: Vec<(String, String)> },
    Ws { stream: StreamRef, frame: crate::types::InboundMessage },
    Error { stream: Option<StreamRef>, reason: String },
}

/// The transport abstraction the core depends on. Object-safe so a
/// `ConnectionActor` can hold `Box<dyn Transport>` without monomorphizing
/// over every concrete venue adapter.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, host: &str, port: u16, opts: OpenOptions) -> Result<TransportHandle, TransportError>;
    async fn await_up(&self, handle: TransportHandle, timeout: std::time::Duration) -> Result<Protocol, TransportError>;
    async fn ws_upgrade(
        &self,
        handle: TransportHandle,
        path: &str,
        headers: Vec<(String, String)>,
    ) -> Result<StreamRef, TransportError>;
    async fn ws_send(&self, handle: TransportHandle, stream: StreamRef, frame: OutboundFrame) -> Result<(), TransportError>;
    async fn set_owner(&self, handle: TransportHandle) -> Result<(), TransportError>;
    async fn close(&self, handle: TransportHandle) -> Result<(), TransportError>;
    async fn info(&self, handle: TransportHandle) -> Result<std::collections::HashMap<String, String>, TransportError>;

    /// The channel through which `TransportEvent`s for `handle` arrive.
    /// Consumed exactly once by the actor that owns `handle`.
    async fn events(&self, handle: TransportHandle) -> Result<kanal::AsyncReceiver<TransportEvent>, TransportError>;
}
