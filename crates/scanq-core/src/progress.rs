use serde::{Deserialize, Serialize};

/// Percent value the estimator converges to. The remaining span up to 100
/// is reserved for actual completion of the phase.
pub const PROGRESS_CAP: u8 = 96;

/// Curve mapping elapsed time to reported progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Easing {
    Linear,
    EaseOut,
}

/// Time-driven progress estimate for a phase with no byte-level feedback.
///
/// The estimator maps elapsed wall time against a fixed budget onto
/// 0..=[`PROGRESS_CAP`]. Once the budget is exhausted the estimate pins
/// at the cap; it never reaches 100 on its own.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEstimator {
    started_at_ms: u64,
    budget_ms: u64,
    easing: Easing,
}

impl ProgressEstimator {
    pub fn start(now_ms: u64, budget_ms: u64, easing: Easing) -> Self {
        ProgressEstimator {
            started_at_ms: now_ms,
            budget_ms: budget_ms.max(1),
            easing,
        }
    }

    pub fn sample(&self, now_ms: u64) -> u8 {
        let elapsed = now_ms.saturating_sub(self.started_at_ms);
        let t = (elapsed as f64 / self.budget_ms as f64).clamp(0.0, 1.0);
        let eased = match self.easing {
            Easing::Linear => t,
            Easing::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
        };
        (eased * PROGRESS_CAP as f64).round() as u8
    }
}
