use async_trait::async_trait;
use serde_json::Value;

use crate::types::InboundMessage;

use super::{Directive, HandlerState};

/// Authentication policy.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    fn generate_auth_data(&self, state: &HandlerState) -> Value {
        let _ = state;
        Value::Null
    }

    async fn handle_auth_response(&self, resp: &InboundMessage, state: HandlerState) -> Directive {
        let _ = resp;
        Directive::Ok(state)
    }

    fn needs_reauthentication(&self, state: &HandlerState) -> bool {
        let _ = state;
        false
    }

    async fn authenticate(&self, credentials: Value, state: HandlerState) -> Directive {
        let _ = credentials;
        Directive::Ok(state)
    }
}
