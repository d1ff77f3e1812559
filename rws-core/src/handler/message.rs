use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;
use crate::types::{InboundMessage, MessageKind, OutboundFrame};

use super::{Directive, HandlerState};

/// Message classification/encoding policy.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, msg: &InboundMessage, state: HandlerState) -> Directive {
        let _ = msg;
        Directive::Ok(state)
    }

    /// Pure validation; no state threading for this operation.
    fn validate_message(&self, msg: &InboundMessage) -> bool {
        let _ = msg;
        true
    }

    async fn encode_message(
        &self,
        kind: &str,
        payload: Value,
        state: HandlerState,
    ) -> (Result<OutboundFrame, CoreError>, HandlerState) {
        let _ = kind;
        (Ok(OutboundFrame::text(payload.to_string())), state)
    }

    fn message_type(&self, msg: &InboundMessage) -> MessageKind {
        if msg.correlation_id.is_some() {
            MessageKind::Request
        } else {
            MessageKind::Unsolicited
        }
    }
}
