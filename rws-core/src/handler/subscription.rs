use async_trait::async_trait;
use serde_json::Value;

use crate::types::{InboundMessage, SubscriptionRecord};

use super::{Directive, HandlerState};

/// Subscription lifecycle policy.
#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    async fn subscribe(&self, channel: &str, params: Value, state: HandlerState) -> Directive {
        let _ = (channel, params);
        Directive::Ok(state)
    }

    async fn unsubscribe(&self, channel: &str, state: HandlerState) -> Directive {
        let _ = channel;
        Directive::Ok(state)
    }

    async fn handle_subscription_response(&self, resp: &InboundMessage, state: HandlerState) -> Directive {
        let _ = resp;
        Directive::Ok(state)
    }

    /// Pure queries over state; implementors keep their own bookkeeping
    /// inside the opaque `HandlerState` and must downcast it themselves.
    fn active_subscriptions(&self, state: &HandlerState) -> Vec<SubscriptionRecord> {
        let _ = state;
        Vec::new()
    }

    fn find_subscription_by_channel(&self, channel: &str, state: &HandlerState) -> Option<SubscriptionRecord> {
        let _ = (channel, state);
        None
    }
}
