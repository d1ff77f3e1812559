use async_trait::async_trait;

use crate::types::{RateLimitDirective, RateLimitOptions, RateLimitRequest};

use super::HandlerState;

/// Rate-limit decision policy, consulted by
/// [`crate::rate_limiter::RateLimiter`] for every `check()` call. Named
/// `RateLimitHandlerTrait` to avoid colliding with
/// [`crate::rate_limiter::RateLimiter`]'s own public `RateLimitHandler`-shaped
/// contract.
#[async_trait]
pub trait RateLimitHandlerTrait: Send + Sync {
    fn init(&self, opts: RateLimitOptions) -> HandlerState;

    /// Returns the directive plus the handler's updated state. Cost is
    /// folded into venue-specific state tracked by the handler itself;
    /// the core's `TokenBucket` applies whatever cost the handler decided.
    fn check_rate_limit(
        &self,
        request: &RateLimitRequest,
        state: HandlerState,
    ) -> (RateLimitDirective, u64, HandlerState);

    fn handle_tick(&self, state: HandlerState) -> HandlerState {
        state
    }
}

/// Used when a connection is configured with no `rate_limit` handler:
/// every request costs 1 token and is never queued by policy (the queue
/// is still reachable if the bucket itself is exhausted, via
/// [`crate::rate_limiter::RateLimiter::check`]'s own fallback).
pub struct DefaultAllowHandler;

#[async_trait]
impl RateLimitHandlerTrait for DefaultAllowHandler {
    fn init(&self, _opts: RateLimitOptions) -> HandlerState {
        Box::new(())
    }

    fn check_rate_limit(&self, _request: &RateLimitRequest, state: HandlerState) -> (RateLimitDirective, u64, HandlerState) {
        (RateLimitDirective::Allow, 1, state)
    }
}
