//! `FakeTransport`: an in-memory `Transport` driven by a `kanal`
//! channel pair per stream. `open`/`await_up`/`ws_upgrade` succeed
//! immediately (or return a scripted failure) rather than performing any
//! real I/O; `FakeTransportController` is the test-facing handle used to
//! inject `TransportEvent`s and inspect outbound frames.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use rws_core::error::TransportError;
use rws_core::transport::{OpenOptions, Protocol, Transport, TransportEvent, TransportHandle};
use rws_core::types::{OutboundFrame, StreamRef};

#[derive(Default)]
struct Inner {
    next_handle: u64,
    next_stream: u64,
    open_handles: HashMap<TransportHandle, ()>,
    event_senders: HashMap<TransportHandle, kanal::AsyncSender<TransportEvent>>,
    event_receivers: HashMap<TransportHandle, kanal::AsyncReceiver<TransportEvent>>,
    sent: Vec<(TransportHandle, StreamRef, OutboundFrame)>,
    fail_open: Option<TransportError>,
    fail_await_up: Option<TransportError>,
    fail_upgrade: Option<TransportError>,
    fail_send: Option<TransportError>,
}

/// The `Transport` implementation itself, handed to `ConnectionActor::connect`.
#[derive(Clone)]
pub struct FakeTransport {
    inner: Arc<Mutex<Inner>>,
}

/// The test-facing half: same underlying state, different API surface
/// (inject events, inspect sent frames, script the next failure).
#[derive(Clone)]
pub struct FakeTransportController {
    inner: Arc<Mutex<Inner>>,
}

impl FakeTransport {
    /// Returns the transport to hand to the actor plus the controller a
    /// test script drives it with.
    pub fn pair() -> (Self, FakeTransportController) {
        let inner = Arc::new(Mutex::new(Inner::default()));
        (
            Self { inner: inner.clone() },
            FakeTransportController { inner },
        )
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _host: &str, _port: u16, _opts: OpenOptions) -> Result<TransportHandle, TransportError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.fail_open.take() {
            return Err(err);
        }
        inner.next_handle += 1;
        let handle = TransportHandle(inner.next_handle);
        let (tx, rx) = kanal::unbounded_async();
        inner.open_handles.insert(handle, ());
        inner.event_senders.insert(handle, tx);
        inner.event_receivers.insert(handle, rx);
        Ok(handle)
    }

    async fn await_up(&self, _handle: TransportHandle, _timeout: std::time::Duration) -> Result<Protocol, TransportError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.fail_await_up.take() {
            return Err(err);
        }
        Ok(Protocol::Http1)
    }

    async fn ws_upgrade(
        &self,
        handle: TransportHandle,
        _path: &str,
        _headers: Vec<(String, String)>,
    ) -> Result<StreamRef, TransportError> {
        let mut inner = self.inner.lock();
        if !inner.open_handles.contains_key(&handle) {
            return Err(TransportError::NoTransport);
        }
        if let Some(err) = inner.fail_upgrade.take() {
            return Err(err);
        }
        inner.next_stream += 1;
        Ok(StreamRef(inner.next_stream))
    }

    async fn ws_send(&self, handle: TransportHandle, stream: StreamRef, frame: OutboundFrame) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if !inner.open_handles.contains_key(&handle) {
            return Err(TransportError::NotConnected);
        }
        if let Some(err) = inner.fail_send.take() {
            return Err(err);
        }
        inner.sent.push((handle, stream, frame));
        Ok(())
    }

    async fn set_owner(&self, handle: TransportHandle) -> Result<(), TransportError> {
        let inner = self.inner.lock();
        if inner.open_handles.contains_key(&handle) {
            Ok(())
        } else {
            Err(TransportError::InvalidTarget)
        }
    }

    async fn close(&self, handle: TransportHandle) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        inner.open_handles.remove(&handle);
        inner.event_senders.remove(&handle);
        Ok(())
    }

    async fn info(&self, handle: TransportHandle) -> Result<HashMap<String, String>, TransportError> {
        let inner = self.inner.lock();
        if inner.open_handles.contains_key(&handle) {
            Ok(HashMap::new())
        } else {
            Err(TransportError::StreamNotFound)
        }
    }

    async fn events(&self, handle: TransportHandle) -> Result<kanal::AsyncReceiver<TransportEvent>, TransportError> {
        let mut inner = self.inner.lock();
        inner.event_receivers.remove(&handle).ok_or(TransportError::StreamNotFound)
    }
}

impl FakeTransportController {
    /// Pushes `event` to whichever actor holds `handle`'s receiver.
    pub async fn push_event(&self, handle: TransportHandle, event: TransportEvent) {
        let sender = self.inner.lock().event_senders.get(&handle).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Drains every frame sent since the last call, in send order.
    pub fn take_sent_frames(&self) -> Vec<(TransportHandle, StreamRef, OutboundFrame)> {
        std::mem::take(&mut self.inner.lock().sent)
    }

    pub fn sent_frames(&self) -> Vec<(TransportHandle, StreamRef, OutboundFrame)> {
        self.inner.lock().sent.clone()
    }

    pub fn fail_next_open(&self, err: TransportError) {
        self.inner.lock().fail_open = Some(err);
    }

    pub fn fail_next_await_up(&self, err: TransportError) {
        self.inner.lock().fail_await_up = Some(err);
    }

    pub fn fail_next_upgrade(&self, err: TransportError) {
        self.inner.lock().fail_upgrade = Some(err);
    }

    pub fn fail_next_send(&self, err: TransportError) {
        self.inner.lock().fail_send = Some(err);
    }
}
