//! Pure attempt → delay function. No I/O, no clock reads; the jittered
//! variant takes its randomness from `rand` rather than a shared RNG so it
//! stays trivially testable by seeding a deterministic source in callers
//! that need reproducibility.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Linear,
    Exponential,
    Jittered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub kind: BackoffKind,
    pub base: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(kind: BackoffKind, base: Duration, max_delay: Duration) -> Self {
        Self { kind, base, max_delay }
    }

    /// `attempt` is 0-based (the first reconnect attempt is `0`).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.kind {
            BackoffKind::Linear => self.linear(attempt),
            BackoffKind::Exponential => self.exponential(attempt),
            BackoffKind::Jittered => self.jittered(attempt),
        }
    }

    fn linear(&self, attempt: u32) -> Duration {
        let n = attempt.saturating_add(1);
        self.base.saturating_mul(n).min(self.max_delay)
    }

    fn exponential(&self, attempt: u32) -> Duration {
        exponential_delay(self.base, self.max_delay, attempt)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let ceiling = exponential_delay(self.base, self.max_delay, attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        let mut rng = rand::rng();
        let nanos = rng.random_range(0..=ceiling.as_nanos());
        Duration::from_nanos(nanos as u64)
    }
}

fn exponential_delay(base: Duration, max_delay: Duration, attempt: u32) -> Duration {
    match 2u32.checked_pow(attempt) {
        Some(factor) => base.saturating_mul(factor).min(max_delay),
        None => max_delay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_grows_by_base_and_caps() {
        let p = BackoffPolicy::new(BackoffKind::Linear, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(p.delay(0), Duration::from_millis(100));
        assert_eq!(p.delay(1), Duration::from_millis(200));
        assert_eq!(p.delay(2), Duration::from_millis(300));
        assert_eq!(p.delay(3), Duration::from_millis(350)); // capped
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let p = BackoffPolicy::new(BackoffKind::Exponential, Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(p.delay(0), Duration::from_millis(100));
        assert_eq!(p.delay(1), Duration::from_millis(200));
        assert_eq!(p.delay(2), Duration::from_millis(400));
        assert_eq!(p.delay(3), Duration::from_millis(800));
        assert_eq!(p.delay(4), Duration::from_millis(1000)); // capped
    }

    #[test]
    fn jittered_never_exceeds_exponential_ceiling() {
        let p = BackoffPolicy::new(BackoffKind::Jittered, Duration::from_millis(50), Duration::from_millis(2000));
        for attempt in 0..8 {
            let ceiling = exponential_delay(p.base, p.max_delay, attempt);
            for _ in 0..20 {
                let d = p.delay(attempt);
                assert!(d <= ceiling, "jittered delay {:?} exceeded ceiling {:?}", d, ceiling);
            }
        }
    }

    #[test]
    fn exponential_does_not_overflow_on_large_attempt() {
        let p = BackoffPolicy::new(BackoffKind::Exponential, Duration::from_millis(100), Duration::from_secs(30));
        assert_eq!(p.delay(64), Duration::from_secs(30));
    }
}
