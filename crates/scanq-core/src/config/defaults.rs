use crate::progress::Easing;

pub(super) fn default_upload_url_threshold() -> u64 {
    32 * 1024 * 1024 // 32 MiB
}

pub(super) fn default_requests_per_minute() -> usize {
    4
}

pub(super) fn default_premium_requests_per_minute() -> usize {
    240
}

pub(super) fn default_max_retries() -> u32 {
    crate::retry::MAX_RETRIES
}

pub(super) fn default_fixed_delay_ms() -> u64 {
    60_000
}

pub(super) fn default_min_wait_ms() -> u64 {
    15_000
}

pub(super) fn default_max_wait_ms() -> u64 {
    60_000
}

pub(super) fn default_failure_penalty_ms() -> u64 {
    3_000
}

pub(super) fn default_tick_ms() -> u64 {
    250
}

pub(super) fn default_checking_budget_ms() -> u64 {
    2_000
}

pub(super) fn default_average_upload_speed() -> u64 {
    1024 * 1024 // 1 MiB/s
}

pub(super) fn default_easing() -> Easing {
    Easing::EaseOut
}
