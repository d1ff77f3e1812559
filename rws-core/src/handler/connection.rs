use async_trait::async_trait;

use crate::types::{ConnectInfo, DisconnectReason, FrameType, StreamRef};

use super::{Directive, HandlerState};

/// Connection lifecycle policy.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn handle_connect(&self, info: ConnectInfo, state: HandlerState) -> Directive {
        Directive::Ok(state)
    }

    async fn handle_disconnect(&self, reason: DisconnectReason, state: HandlerState) -> Directive {
        let _ = reason;
        Directive::Ok(state)
    }

    async fn handle_frame(&self, frame_type: FrameType, data: String, state: HandlerState) -> Directive {
        let _ = (frame_type, data);
        Directive::Ok(state)
    }

    async fn handle_timeout(&self, state: HandlerState) -> Directive {
        Directive::Ok(state)
    }

    async fn ping(&self, stream: StreamRef, state: HandlerState) -> Directive {
        let _ = stream;
        Directive::Ok(state)
    }

    async fn status(&self, stream: StreamRef, state: HandlerState) -> Directive {
        let _ = stream;
        Directive::Ok(state)
    }
}
