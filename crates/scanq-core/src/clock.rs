use std::time::{SystemTime, UNIX_EPOCH};

/// Time source for the scheduler. Everything time-driven (rate window,
/// retry wake-ups, progress sampling) goes through this so tests can run
/// on a manual clock.
pub trait Clock: Send {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
