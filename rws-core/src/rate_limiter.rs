//! Rate limiter: a token bucket plus a bounded overflow queue and
//! deferred-execution callbacks, with the admission *decision* delegated
//! to a pluggable [`RateLimitHandlerTrait`] so venue-specific cost rules
//! can be plugged in without touching this component.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{CoreError, RateLimitError};
use crate::handler::{HandlerState, RateLimitHandlerTrait};
use crate::token_bucket::TokenBucket;
use crate::types::{RateLimitDirective, RateLimitRequest};

pub use crate::types::QueueId;

type Callback = Box<dyn FnOnce() + Send>;

struct QueueEntry {
    id: QueueId,
    cost: u64,
    #[allow(dead_code)]
    fingerprint: String,
    arrival: Instant,
}

pub enum CheckOutcome {
    Allow(QueueId),
    Queue(QueueId),
    Reject(RateLimitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Ok,
    NotFound,
}

pub struct RateLimiter {
    bucket: TokenBucket,
    queue: VecDeque<QueueEntry>,
    queue_limit: usize,
    callbacks: HashMap<QueueId, Callback>,
    handler: Arc<dyn RateLimitHandlerTrait>,
    handler_state: Option<HandlerState>,
    next_id: u64,
}

impl RateLimiter {
    pub fn new(
        capacity: u64,
        refill_rate: u64,
        refill_interval: std::time::Duration,
        queue_limit: usize,
        handler: Arc<dyn RateLimitHandlerTrait>,
        now: Instant,
    ) -> Self {
        let opts = crate::types::RateLimitOptions {
            capacity,
            refill_rate,
            refill_interval,
            queue_limit,
        };
        let handler_state = handler.init(opts);
        Self {
            bucket: TokenBucket::new(capacity, refill_rate, refill_interval, now),
            queue: VecDeque::new(),
            queue_limit,
            callbacks: HashMap::new(),
            handler,
            handler_state: Some(handler_state),
            next_id: 1,
        }
    }

    fn fresh_id(&mut self) -> QueueId {
        let id = QueueId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn tokens(&self) -> u64 {
        self.bucket.tokens()
    }

    /// `check(request) -> Allow(id) | Queue(id) | Reject(reason)`.
    pub fn check(&mut self, fingerprint: impl Into<String>, now: Instant) -> CheckOutcome {
        self.bucket.refill(now);
        let request = RateLimitRequest {
            fingerprint: fingerprint.into(),
            arrival: now,
        };
        let state = self
            .handler_state
            .take()
            .expect("rate limit handler state missing between calls");
        let (directive, cost, new_state) = self.handler.check_rate_limit(&request, state);
        self.handler_state = Some(new_state);

        match directive {
            RateLimitDirective::Allow => {
                if self.bucket.try_consume(cost) {
                    CheckOutcome::Allow(self.fresh_id())
                } else {
                    // Handler said Allow but the bucket disagrees; treat
                    // as an immediate queue attempt rather than silently
                    // admitting an over-budget request.
                    self.enqueue_or_reject(request.fingerprint, cost, now)
                }
            }
            RateLimitDirective::Queue => self.enqueue_or_reject(request.fingerprint, cost, now),
            RateLimitDirective::Reject => CheckOutcome::Reject(RateLimitError::InternalError),
        }
    }

    fn enqueue_or_reject(&mut self, fingerprint: String, cost: u64, now: Instant) -> CheckOutcome {
        if self.queue.len() >= self.queue_limit {
            return CheckOutcome::Reject(RateLimitError::QueueFull);
        }
        let id = self.fresh_id();
        self.queue.push_back(QueueEntry {
            id,
            cost,
            fingerprint,
            arrival: now,
        });
        CheckOutcome::Queue(id)
    }

    /// `on_process(id, callback) -> ok | not_found`.
    pub fn on_process(&mut self, id: QueueId, callback: impl FnOnce() + Send + 'static) -> RegisterOutcome {
        if self.queue.iter().any(|e| e.id == id) {
            self.callbacks.insert(id, Box::new(callback));
            RegisterOutcome::Ok
        } else {
            RegisterOutcome::NotFound
        }
    }

    /// `tick()`: drains the queue as long as tokens permit, FIFO,
    /// invoking callbacks in insertion order.
    pub fn tick(&mut self, now: Instant) -> usize {
        self.bucket.refill(now);
        self.handler_state = Some(self.handler.handle_tick(
            self.handler_state
                .take()
                .expect("rate limit handler state missing between calls"),
        ));
        self.drain(now)
    }

    /// `force_process_queue() -> processed_count`.
    pub fn force_process_queue(&mut self, now: Instant) -> usize {
        self.drain(now)
    }

    fn drain(&mut self, now: Instant) -> usize {
        self.bucket.refill(now);
        let mut processed = 0;
        while let Some(front) = self.queue.front() {
            if !self.bucket.try_consume(front.cost) {
                break;
            }
            let entry = self.queue.pop_front().expect("front just peeked");
            debug!(target: "rws::rate_limit", id = entry.id.0, waited_ms = entry.arrival.elapsed().as_millis() as u64, "dequeued request");
            if let Some(cb) = self.callbacks.remove(&entry.id) {
                cb();
            } else {
                warn!(target: "rws::rate_limit", id = entry.id.0, "dequeued request with no registered callback");
            }
            processed += 1;
        }
        processed
    }
}

/// Surfaces a `CheckOutcome::Reject` as a `CoreError` for callers that
/// want `?`-propagation instead of matching on the outcome.
impl CheckOutcome {
    pub fn into_result(self) -> Result<QueueOrAllow, CoreError> {
        match self {
            CheckOutcome::Allow(id) => Ok(QueueOrAllow::Allow(id)),
            CheckOutcome::Queue(id) => Ok(QueueOrAllow::Queue(id)),
            CheckOutcome::Reject(reason) => Err(CoreError::RateLimit(reason)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOrAllow {
    Allow(QueueId),
    Queue(QueueId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Always allows, cost 1 — used where the decision policy is not
    /// under test.
    struct AllowAllHandler;
    impl RateLimitHandlerTrait for AllowAllHandler {
        fn init(&self, _opts: crate::types::RateLimitOptions) -> HandlerState {
            Box::new(())
        }
        fn check_rate_limit(
            &self,
            _request: &RateLimitRequest,
            state: HandlerState,
        ) -> (RateLimitDirective, u64, HandlerState) {
            (RateLimitDirective::Allow, 1, state)
        }
    }

    /// Allows up to the bucket, then asks to queue, modeling a typical
    /// fixed-weight venue policy.
    struct QueueOnExhaustionHandler;
    impl RateLimitHandlerTrait for QueueOnExhaustionHandler {
        fn init(&self, _opts: crate::types::RateLimitOptions) -> HandlerState {
            Box::new(())
        }
        fn check_rate_limit(
            &self,
            _request: &RateLimitRequest,
            state: HandlerState,
        ) -> (RateLimitDirective, u64, HandlerState) {
            (RateLimitDirective::Queue, 1, state)
        }
    }

    #[test]
    fn tokens_and_queue_len_stay_within_bounds() {
        let now = Instant::now();
        let mut limiter = RateLimiter::new(
            1,
            1,
            Duration::from_millis(100),
            3,
            Arc::new(QueueOnExhaustionHandler),
            now,
        );
        assert!(matches!(limiter.check("r", now), CheckOutcome::Queue(_)));
        assert!(matches!(limiter.check("r", now), CheckOutcome::Queue(_)));
        assert!(matches!(limiter.check("r", now), CheckOutcome::Queue(_)));
        // Fourth is rejected: queue_limit=3 already full.
        assert!(matches!(limiter.check("r", now), CheckOutcome::Reject(RateLimitError::QueueFull)));
        assert!(limiter.queue_len() <= 3);
        assert!(limiter.tokens() <= limiter.bucket.capacity());
    }

    #[test]
    fn queue_limit_zero_rejects_every_would_queue_decision() {
        let now = Instant::now();
        let mut limiter =
            RateLimiter::new(0, 1, Duration::from_millis(100), 0, Arc::new(QueueOnExhaustionHandler), now);
        assert!(matches!(limiter.check("r", now), CheckOutcome::Reject(RateLimitError::QueueFull)));
    }

    #[test]
    fn capacity_zero_with_refill_queues_until_first_refill() {
        let now = Instant::now();
        let mut limiter = RateLimiter::new(0, 1, Duration::from_millis(100), 5, Arc::new(AllowAllHandler), now);
        // Handler says Allow, but bucket has 0 tokens -> falls back to queue.
        let id = match limiter.check("r", now) {
            CheckOutcome::Queue(id) => id,
            other => panic!("expected Queue, got non-queue outcome: {}", matches!(other, CheckOutcome::Allow(_))),
        };
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = processed.clone();
        limiter.on_process(id, move || {
            processed_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(processed.load(Ordering::SeqCst), 0);
        limiter.tick(now + Duration::from_millis(100));
        assert_eq!(processed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_fire_in_fifo_insertion_order() {
        let now = Instant::now();
        let mut limiter = RateLimiter::new(
            0,
            1,
            Duration::from_millis(100),
            10,
            Arc::new(QueueOnExhaustionHandler),
            now,
        );
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut ids = vec![];
        for _ in 0..3 {
            if let CheckOutcome::Queue(id) = limiter.check("r", now) {
                ids.push(id);
            }
        }
        for (i, id) in ids.iter().enumerate() {
            let order = order.clone();
            limiter.on_process(*id, move || order.lock().push(i));
        }
        limiter.force_process_queue(now + Duration::from_secs(1));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn on_process_returns_not_found_for_unknown_id() {
        let now = Instant::now();
        let mut limiter =
            RateLimiter::new(5, 1, Duration::from_millis(100), 5, Arc::new(AllowAllHandler), now);
        assert_eq!(limiter.on_process(QueueId(999), || {}), RegisterOutcome::NotFound);
    }
}
