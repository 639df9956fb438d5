use std::collections::VecDeque;

/// Length of the sliding admission window.
pub const WINDOW_MS: u64 = 60_000;

/// Outcome of asking the limiter for an admission slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// No slot free. `retry_after_ms` is the time until the oldest recorded
    /// request ages out of the window.
    Denied { retry_after_ms: u64 },
}

/// Sliding-window rate limiter over remote request timestamps.
///
/// The window holds the timestamps of requests admitted in the last
/// [`WINDOW_MS`] milliseconds. A request is admitted when fewer than
/// `limit` timestamps remain after pruning; admission records the
/// timestamp immediately, before the request is issued. If the server
/// rejects the request anyway, [`rollback_last`](Self::rollback_last)
/// removes the optimistic entry so the failed attempt does not consume
/// a slot.
pub struct RateLimiter {
    window: VecDeque<u64>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            window: VecDeque::new(),
        }
    }

    /// Rebuild the window from persisted timestamps.
    pub fn restore(timestamps: &[u64]) -> Self {
        RateLimiter {
            window: timestamps.iter().copied().collect(),
        }
    }

    /// Try to admit a request at `now_ms` against `limit` slots per window.
    pub fn admit(&mut self, now_ms: u64, limit: usize) -> Admission {
        self.prune(now_ms);
        if self.window.len() < limit {
            self.window.push_back(now_ms);
            Admission::Allowed
        } else {
            // oldest entry frees its slot when it is exactly WINDOW_MS old
            let oldest = self.window.front().copied().unwrap_or(now_ms);
            let retry_after_ms = WINDOW_MS.saturating_sub(now_ms.saturating_sub(oldest));
            Admission::Denied { retry_after_ms }
        }
    }

    /// Remove the most recently admitted timestamp. Called when the server
    /// returned 429 for a request the window had optimistically counted.
    pub fn rollback_last(&mut self) {
        self.window.pop_back();
    }

    /// Current window contents, oldest first, for persistence.
    pub fn timestamps(&self) -> Vec<u64> {
        self.window.iter().copied().collect()
    }

    fn prune(&mut self, now_ms: u64) {
        while let Some(&front) = self.window.front() {
            if now_ms.saturating_sub(front) >= WINDOW_MS {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit() {
        let mut rl = RateLimiter::new();
        for i in 0..4 {
            assert_eq!(rl.admit(1_000 + i, 4), Admission::Allowed);
        }
        assert!(matches!(rl.admit(1_010, 4), Admission::Denied { .. }));
    }

    #[test]
    fn denial_reports_time_until_oldest_expires() {
        let mut rl = RateLimiter::new();
        rl.admit(0, 2);
        rl.admit(10_000, 2);
        match rl.admit(20_000, 2) {
            Admission::Denied { retry_after_ms } => {
                // oldest at t=0 leaves the window at t=60_000
                assert_eq!(retry_after_ms, 40_000);
            }
            Admission::Allowed => panic!("window should be full"),
        }
    }

    #[test]
    fn slots_free_after_window_elapses() {
        let mut rl = RateLimiter::new();
        rl.admit(0, 1);
        assert!(matches!(rl.admit(59_999, 1), Admission::Denied { .. }));
        assert_eq!(rl.admit(60_000, 1), Admission::Allowed);
    }

    #[test]
    fn rollback_frees_the_slot() {
        let mut rl = RateLimiter::new();
        rl.admit(0, 1);
        rl.rollback_last();
        assert_eq!(rl.admit(1, 1), Admission::Allowed);
    }

    #[test]
    fn restore_rebuilds_window() {
        let mut rl = RateLimiter::restore(&[100, 200, 300]);
        assert_eq!(rl.timestamps(), vec![100, 200, 300]);
        assert!(matches!(rl.admit(400, 3), Admission::Denied { .. }));
        // entries recorded before the window are dropped on the next admit
        assert_eq!(rl.admit(60_100, 3), Admission::Allowed);
        assert_eq!(rl.timestamps(), vec![200, 300, 60_100]);
    }

    #[test]
    fn raising_the_limit_takes_effect_immediately() {
        let mut rl = RateLimiter::new();
        for i in 0..4 {
            rl.admit(i, 4);
        }
        assert!(matches!(rl.admit(10, 4), Admission::Denied { .. }));
        assert_eq!(rl.admit(10, 240), Admission::Allowed);
    }
}
