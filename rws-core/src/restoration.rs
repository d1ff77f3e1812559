//! Restoration pipeline support. The pipeline's actual execution
//! (auth → resubscribe → buffer flush, run on every entry into
//! `WebsocketConnected`) lives on [`crate::actor::ConnectionActor`] since
//! it needs simultaneous mutable access to the transport handle, the
//! handler registry, and the request buffer — exactly the state the
//! actor alone owns. This module holds the ordered subscription
//! bookkeeping the pipeline replays from.

use crate::types::{SubscriptionRecord, SubscriptionStatus};

/// Insertion-ordered subscription bookkeeping. Only `confirmed` records
/// are replayed on reconnection, in the order they were originally
/// confirmed.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    records: Vec<SubscriptionRecord>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, record: SubscriptionRecord) {
        if let Some(existing) = self.records.iter_mut().find(|r| r.channel == record.channel) {
            *existing = record;
        } else {
            self.records.push(record);
        }
    }

    pub fn mark_confirmed(&mut self, channel: &str, subscription_id: u64) {
        if let Some(r) = self.records.iter_mut().find(|r| r.channel == channel) {
            r.status = SubscriptionStatus::Confirmed;
            r.subscription_id = subscription_id;
            r.error = None;
        }
    }

    pub fn mark_failed(&mut self, channel: &str, error: String) {
        if let Some(r) = self.records.iter_mut().find(|r| r.channel == channel) {
            r.status = SubscriptionStatus::Failed;
            r.error = Some(error);
        }
    }

    /// `unsubscribe` of a `pending` subscription is permitted — the record
    /// is simply removed, and a future wire confirmation for it will find
    /// no matching record (the subscription handler's
    /// `find_subscription_by_channel` returns `None`).
    pub fn remove(&mut self, channel: &str) -> Option<SubscriptionRecord> {
        let idx = self.records.iter().position(|r| r.channel == channel)?;
        Some(self.records.remove(idx))
    }

    pub fn find_by_channel(&self, channel: &str) -> Option<&SubscriptionRecord> {
        self.records.iter().find(|r| r.channel == channel)
    }

    pub fn active(&self) -> Vec<SubscriptionRecord> {
        self.records.clone()
    }

    /// The replay order for restoration: insertion order, confirmed only.
    pub fn confirmed_in_order(&self) -> Vec<SubscriptionRecord> {
        self.records
            .iter()
            .filter(|r| r.status == SubscriptionStatus::Confirmed)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(channel: &str, status: SubscriptionStatus) -> SubscriptionRecord {
        SubscriptionRecord {
            subscription_id: 0,
            channel: channel.to_string(),
            params: json!({}),
            status,
            error: None,
        }
    }

    #[test]
    fn confirmed_in_order_skips_pending_and_failed() {
        let mut table = SubscriptionTable::new();
        table.upsert(record("ch.a", SubscriptionStatus::Confirmed));
        table.upsert(record("ch.b", SubscriptionStatus::Pending));
        table.upsert(record("ch.c", SubscriptionStatus::Confirmed));
        table.upsert(record("ch.d", SubscriptionStatus::Failed));
        let order: Vec<_> = table.confirmed_in_order().into_iter().map(|r| r.channel).collect();
        assert_eq!(order, vec!["ch.a".to_string(), "ch.c".to_string()]);
    }

    #[test]
    fn removing_pending_subscription_is_allowed() {
        let mut table = SubscriptionTable::new();
        table.upsert(record("ch.a", SubscriptionStatus::Pending));
        assert!(table.remove("ch.a").is_some());
        assert!(table.find_by_channel("ch.a").is_none());
    }
}
