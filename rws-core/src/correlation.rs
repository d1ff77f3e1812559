//! Correlation table: `request_id -> PendingRequest` with a timeout
//! timer per entry. IDs are monotonic positive integers per connection
//! lifetime.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, TimeoutError};
use crate::types::RequestId;

pub type ReplySender = oneshot::Sender<Result<serde_json::Value, CoreError>>;

struct PendingRequest {
    reply_to: ReplySender,
    original_payload: serde_json::Value,
    /// Cancelled when the entry is removed via `take`/`drain_all` so the
    /// spawned timeout task becomes a no-op: at most one live timer per
    /// entry, and cancelling the request cancels it.
    timer_cancel: CancellationToken,
    timer_handle: Option<JoinHandle<()>>,
}

/// `request_id -> PendingRequest`, owned exclusively by one `ConnectionActor`.
pub struct CorrelationTable {
    next_id: u64,
    pending: BTreeMap<RequestId, PendingRequest>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: BTreeMap::new(),
        }
    }

    pub fn fresh_id(&mut self) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Records a pending request and arms a timeout timer that, on
    /// natural expiry (not cancelled via `take`/`drain_all` first), pushes
    /// `id` onto `expiry_notify`. The table itself holds no lock and is
    /// only ever touched by its single owning actor, so the timer cannot
    /// reach back into it directly; instead the actor's `select!` loop
    /// receives `id` off `expiry_notify` and calls `expire(id)` in its own
    /// turn, feeding timer ticks back through its own mailbox rather than
    /// locking shared state.
    pub fn insert(
        &mut self,
        id: RequestId,
        reply_to: ReplySender,
        original_payload: serde_json::Value,
        deadline: Duration,
        expiry_notify: kanal::AsyncSender<RequestId>,
    ) {
        let timer_cancel = CancellationToken::new();
        let cancel_clone = timer_cancel.clone();
        let timer_handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    let _ = expiry_notify.send(id).await;
                }
                _ = cancel_clone.cancelled() => {}
            }
        });
        self.pending.insert(
            id,
            PendingRequest {
                reply_to,
                original_payload,
                timer_cancel,
                timer_handle: Some(timer_handle),
            },
        );
    }

    /// `take(id) -> reply_to | absent`: removes and returns; cancels
    /// the timer.
    pub fn take(&mut self, id: RequestId) -> Option<ReplySender> {
        let entry = self.pending.remove(&id)?;
        entry.timer_cancel.cancel();
        if let Some(handle) = entry.timer_handle {
            handle.abort();
        }
        Some(entry.reply_to)
    }

    /// `expire(id)`: the timeout path; removes the entry and
    /// notifies the waiter with a timeout error.
    pub fn expire(&mut self, id: RequestId) -> bool {
        if let Some(entry) = self.pending.remove(&id) {
            entry.timer_cancel.cancel();
            let _ = entry.reply_to.send(Err(CoreError::Timeout(TimeoutError::RequestTimeout)));
            true
        } else {
            false
        }
    }

    /// `drain_all(reason)`: atomically removes every entry and
    /// notifies each waiter with `reason`.
    pub fn drain_all(&mut self, reason: CoreError) {
        for (_, entry) in std::mem::take(&mut self.pending) {
            entry.timer_cancel.cancel();
            if let Some(handle) = entry.timer_handle {
                handle.abort();
            }
            let _ = entry.reply_to.send(Err(reason.clone()));
        }
    }

    pub fn original_payload(&self, id: RequestId) -> Option<&serde_json::Value> {
        self.pending.get(&id).map(|e| &e.original_payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn take_cancels_timer_and_returns_sender() {
        let mut table = CorrelationTable::new();
        let id = table.fresh_id();
        let (tx, rx) = oneshot::channel();
        let (notify_tx, _notify_rx) = kanal::unbounded_async();
        table.insert(id, tx, json!({"id": id.0}), Duration::from_secs(10), notify_tx);
        let sender = table.take(id).expect("entry should exist");
        sender.send(Ok(json!({"result": "ok"}))).unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), json!({"result": "ok"}));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn expire_notifies_timeout_and_removes_entry() {
        let mut table = CorrelationTable::new();
        let id = table.fresh_id();
        let (tx, rx) = oneshot::channel();
        let (notify_tx, _notify_rx) = kanal::unbounded_async();
        table.insert(id, tx, json!({}), Duration::from_secs(10), notify_tx);
        assert!(table.expire(id));
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(CoreError::Timeout(TimeoutError::RequestTimeout))));
        assert!(!table.expire(id), "expiring twice must be a no-op");
    }

    #[tokio::test]
    async fn drain_all_notifies_every_waiter_with_common_reason() {
        let mut table = CorrelationTable::new();
        let mut receivers = vec![];
        let (notify_tx, _notify_rx) = kanal::unbounded_async();
        for _ in 0..3 {
            let id = table.fresh_id();
            let (tx, rx) = oneshot::channel();
            table.insert(id, tx, json!({}), Duration::from_secs(10), notify_tx.clone());
            receivers.push(rx);
        }
        table.drain_all(CoreError::Closed);
        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), Err(CoreError::Closed)));
        }
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn duplicate_response_after_take_finds_no_waiter() {
        let mut table = CorrelationTable::new();
        let id = table.fresh_id();
        let (tx, rx) = oneshot::channel();
        let (notify_tx, _notify_rx) = kanal::unbounded_async();
        table.insert(id, tx, json!({}), Duration::from_secs(10), notify_tx);
        let sender = table.take(id).unwrap();
        sender.send(Ok(json!({"result": 1}))).unwrap();
        rx.await.unwrap().unwrap();
        // A duplicate arrival for the same id finds nothing to take.
        assert!(table.take(id).is_none());
    }
}
