use crate::config::{RetryConfig, RetryStrategy};

/// Default number of retries after the initial attempt.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay_ms: u64 },
    GiveUp,
}

/// Strategy for spacing out retries of a failed attempt.
///
/// `attempt` is zero-based: the initial attempt is 0, so a policy with
/// `max_retries = 3` allows attempts 0 through 3 before giving up.
pub trait RetryPolicy: Send {
    /// Called when a job is dequeued, before its first attempt.
    fn seed(&mut self, _size_bytes: u64) {}

    /// Called when the server rejected a request with 429 despite local
    /// admission. Lets the policy stretch future delays.
    fn note_rate_limited(&mut self) {}

    /// Decide what happens after attempt `attempt` failed.
    fn on_failure(&mut self, attempt: u32) -> RetryDecision;

    /// The delay the policy would apply right now.
    fn current_delay_ms(&self) -> u64;

    /// Delay to carry across restarts, if the policy keeps one.
    fn persisted_delay_ms(&self) -> Option<u64> {
        None
    }

    /// Restore a previously persisted delay.
    fn restore(&mut self, _delay_ms: u64) {}
}

/// Same delay for every retry.
pub struct FixedDelay {
    delay_ms: u64,
    max_retries: u32,
}

impl FixedDelay {
    pub fn new(delay_ms: u64, max_retries: u32) -> Self {
        FixedDelay {
            delay_ms,
            max_retries,
        }
    }
}

impl RetryPolicy for FixedDelay {
    fn on_failure(&mut self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_retries {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry {
                delay_ms: self.delay_ms,
            }
        }
    }

    fn current_delay_ms(&self) -> u64 {
        self.delay_ms
    }
}

/// Delay that adapts to artifact size and observed rate pressure.
///
/// When a job is dequeued the delay is seeded from the artifact size:
/// small artifacts start near `max_ms`, artifacts at or above the size
/// denominator start near `min_ms`. Seeding never shortens a delay the
/// policy has already grown to, so pressure observed on one job carries
/// over to the next. Every failure and every server-side rate rejection
/// stretches the delay by `penalty_ms`, capped at `max_ms`.
pub struct AdaptiveDelay {
    current_ms: u64,
    min_ms: u64,
    max_ms: u64,
    penalty_ms: u64,
    size_denominator: u64,
    max_retries: u32,
}

impl AdaptiveDelay {
    pub fn new(
        min_ms: u64,
        max_ms: u64,
        penalty_ms: u64,
        size_denominator: u64,
        max_retries: u32,
    ) -> Self {
        AdaptiveDelay {
            current_ms: min_ms,
            min_ms,
            max_ms,
            penalty_ms,
            size_denominator,
            max_retries,
        }
    }

    fn bump(&mut self) {
        self.current_ms = (self.current_ms + self.penalty_ms).min(self.max_ms);
    }
}

impl RetryPolicy for AdaptiveDelay {
    fn seed(&mut self, size_bytes: u64) {
        let ratio = (size_bytes as f64 / self.size_denominator as f64).min(1.0);
        let span = (self.max_ms - self.min_ms) as f64;
        let seeded = (self.min_ms as f64 + span * (1.0 - ratio).sqrt()).round() as u64;
        self.current_ms = seeded
            .max(self.current_ms)
            .clamp(self.min_ms, self.max_ms);
    }

    fn note_rate_limited(&mut self) {
        self.bump();
    }

    fn on_failure(&mut self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        self.bump();
        RetryDecision::Retry {
            delay_ms: self.current_ms,
        }
    }

    fn current_delay_ms(&self) -> u64 {
        self.current_ms
    }

    fn persisted_delay_ms(&self) -> Option<u64> {
        Some(self.current_ms)
    }

    fn restore(&mut self, delay_ms: u64) {
        self.current_ms = delay_ms.clamp(self.min_ms, self.max_ms);
    }
}

pub fn policy_from_config(cfg: &RetryConfig, size_denominator: u64) -> Box<dyn RetryPolicy> {
    match cfg.strategy {
        RetryStrategy::Fixed => Box::new(FixedDelay::new(cfg.fixed_delay_ms, cfg.max_retries)),
        RetryStrategy::Adaptive => Box::new(AdaptiveDelay::new(
            cfg.min_wait_ms,
            cfg.max_wait_ms,
            cfg.failure_penalty_ms,
            size_denominator,
            cfg.max_retries,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn adaptive() -> AdaptiveDelay {
        AdaptiveDelay::new(15_000, 60_000, 3_000, 32 * MIB, 3)
    }

    #[test]
    fn fixed_gives_up_after_max_retries() {
        let mut p = FixedDelay::new(60_000, 3);
        for attempt in 0..3 {
            assert_eq!(
                p.on_failure(attempt),
                RetryDecision::Retry { delay_ms: 60_000 }
            );
        }
        assert_eq!(p.on_failure(3), RetryDecision::GiveUp);
    }

    #[test]
    fn fixed_does_not_persist() {
        let p = FixedDelay::new(60_000, 3);
        assert_eq!(p.persisted_delay_ms(), None);
    }

    #[test]
    fn seed_spans_min_to_max_by_size() {
        let mut p = adaptive();
        p.seed(0);
        assert_eq!(p.current_delay_ms(), 60_000);

        let mut p = adaptive();
        p.seed(32 * MIB);
        assert_eq!(p.current_delay_ms(), 15_000);

        // three quarters of the denominator: sqrt(0.25) = 0.5
        let mut p = adaptive();
        p.seed(24 * MIB);
        assert_eq!(p.current_delay_ms(), 37_500);
    }

    #[test]
    fn seed_treats_oversize_as_full_ratio() {
        let mut p = adaptive();
        p.seed(5_000 * MIB);
        assert_eq!(p.current_delay_ms(), 15_000);
    }

    #[test]
    fn seed_never_shortens_grown_delay() {
        let mut p = adaptive();
        for _ in 0..12 {
            p.note_rate_limited();
        }
        let grown = p.current_delay_ms();
        assert_eq!(grown, 51_000);
        p.seed(32 * MIB); // would seed to 15_000 on a fresh policy
        assert_eq!(p.current_delay_ms(), grown);
    }

    #[test]
    fn failures_stretch_delay_up_to_cap() {
        let mut p = adaptive();
        p.seed(32 * MIB);
        assert_eq!(
            p.on_failure(0),
            RetryDecision::Retry { delay_ms: 18_000 }
        );
        assert_eq!(
            p.on_failure(1),
            RetryDecision::Retry { delay_ms: 21_000 }
        );
        for _ in 0..20 {
            p.note_rate_limited();
        }
        assert_eq!(p.current_delay_ms(), 60_000);
        assert_eq!(
            p.on_failure(2),
            RetryDecision::Retry { delay_ms: 60_000 }
        );
        assert_eq!(p.on_failure(3), RetryDecision::GiveUp);
    }

    #[test]
    fn restore_clamps_to_bounds() {
        let mut p = adaptive();
        p.restore(999_999);
        assert_eq!(p.current_delay_ms(), 60_000);
        p.restore(1);
        assert_eq!(p.current_delay_ms(), 15_000);
        p.restore(42_000);
        assert_eq!(p.current_delay_ms(), 42_000);
        assert_eq!(p.persisted_delay_ms(), Some(42_000));
    }
}
