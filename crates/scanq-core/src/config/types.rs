use serde::{Deserialize, Serialize};

use super::defaults::*;
use crate::error::{Result, ScanqError};
use crate::progress::Easing;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanqConfig {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// Base URL of the scan service API, e.g. "https://scan.example.com/api".
    pub base_url: String,
    /// API key sent as `x-apikey`. The `SCANQ_API_KEY` env var overrides it.
    #[serde(default)]
    pub api_key: String,
    /// Premium keys are admitted against `premium_requests_per_minute`.
    #[serde(default)]
    pub premium: bool,
    /// Artifacts strictly larger than this upload through a dedicated URL.
    #[serde(default = "default_upload_url_threshold")]
    pub upload_url_threshold: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,
    #[serde(default = "default_premium_requests_per_minute")]
    pub premium_requests_per_minute: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            premium_requests_per_minute: default_premium_requests_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    Fixed,
    #[default]
    Adaptive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default)]
    pub strategy: RetryStrategy,
    /// Retries after the initial attempt before a job is failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between attempts under the `fixed` strategy.
    #[serde(default = "default_fixed_delay_ms")]
    pub fixed_delay_ms: u64,
    #[serde(default = "default_min_wait_ms")]
    pub min_wait_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Added to the adaptive delay on every failure or server rate rejection.
    #[serde(default = "default_failure_penalty_ms")]
    pub failure_penalty_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::default(),
            max_retries: default_max_retries(),
            fixed_delay_ms: default_fixed_delay_ms(),
            min_wait_ms: default_min_wait_ms(),
            max_wait_ms: default_max_wait_ms(),
            failure_penalty_ms: default_failure_penalty_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgressConfig {
    /// Estimator sampling interval. Must stay within 200..=300 ms.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Time budget the checking-phase estimator converges over.
    #[serde(default = "default_checking_budget_ms")]
    pub checking_budget_ms: u64,
    /// Assumed transfer rate in bytes per second, used to size the upload
    /// phase's time budget.
    #[serde(default = "default_average_upload_speed")]
    pub average_upload_speed: u64,
    #[serde(default = "default_easing")]
    pub easing: Easing,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            checking_budget_ms: default_checking_budget_ms(),
            average_upload_speed: default_average_upload_speed(),
            easing: default_easing(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Root directory for queue state and artifact blobs.
    /// Default: platform data dir + "scanq" (e.g. ~/.local/share/scanq/).
    #[serde(default)]
    pub state_dir: Option<String>,
}

impl ScanqConfig {
    pub fn validate(&self) -> Result<()> {
        if self.remote.base_url.trim().is_empty() {
            return Err(ScanqError::Config(
                "'remote.base_url' must not be empty".into(),
            ));
        }
        if self.remote.upload_url_threshold == 0 {
            return Err(ScanqError::Config(
                "'remote.upload_url_threshold' must be greater than zero".into(),
            ));
        }
        if self.limits.requests_per_minute == 0 || self.limits.premium_requests_per_minute == 0 {
            return Err(ScanqError::Config(
                "'limits' rates must be at least 1 request per minute".into(),
            ));
        }
        if self.retry.min_wait_ms > self.retry.max_wait_ms {
            return Err(ScanqError::Config(format!(
                "'retry.min_wait_ms' ({}) exceeds 'retry.max_wait_ms' ({})",
                self.retry.min_wait_ms, self.retry.max_wait_ms
            )));
        }
        if !(200..=300).contains(&self.progress.tick_ms) {
            return Err(ScanqError::Config(format!(
                "'progress.tick_ms' must be within 200..=300, got {}",
                self.progress.tick_ms
            )));
        }
        if self.progress.checking_budget_ms == 0 {
            return Err(ScanqError::Config(
                "'progress.checking_budget_ms' must be greater than zero".into(),
            ));
        }
        if self.progress.average_upload_speed == 0 {
            return Err(ScanqError::Config(
                "'progress.average_upload_speed' must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Runtime engine settings resolved from the config file.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub upload_url_threshold: u64,
    pub requests_per_minute: usize,
    pub premium_requests_per_minute: usize,
    pub retry: RetryConfig,
    pub tick_ms: u64,
    pub checking_budget_ms: u64,
    pub average_upload_speed: u64,
    pub easing: Easing,
}

impl EngineConfig {
    pub fn from_config(cfg: &ScanqConfig) -> Self {
        Self {
            upload_url_threshold: cfg.remote.upload_url_threshold,
            requests_per_minute: cfg.limits.requests_per_minute,
            premium_requests_per_minute: cfg.limits.premium_requests_per_minute,
            retry: cfg.retry.clone(),
            tick_ms: cfg.progress.tick_ms,
            checking_budget_ms: cfg.progress.checking_budget_ms,
            average_upload_speed: cfg.progress.average_upload_speed,
            easing: cfg.progress.easing,
        }
    }

    /// Time budget for uploading `size_bytes` at the assumed transfer rate.
    pub fn upload_budget_ms(&self, size_bytes: u64) -> u64 {
        size_bytes
            .saturating_mul(1000)
            .checked_div(self.average_upload_speed)
            .unwrap_or(0)
            .max(1)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            upload_url_threshold: default_upload_url_threshold(),
            requests_per_minute: default_requests_per_minute(),
            premium_requests_per_minute: default_premium_requests_per_minute(),
            retry: RetryConfig::default(),
            tick_ms: default_tick_ms(),
            checking_budget_ms: default_checking_budget_ms(),
            average_upload_speed: default_average_upload_speed(),
            easing: default_easing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ScanqConfig {
        serde_yaml::from_str("remote:\n  base_url: https://scan.example.com/api\n").unwrap()
    }

    #[test]
    fn section_defaults() {
        let cfg = base_config();
        cfg.validate().unwrap();
        assert_eq!(cfg.remote.upload_url_threshold, 32 * 1024 * 1024);
        assert!(!cfg.remote.premium);
        assert_eq!(cfg.limits.requests_per_minute, 4);
        assert_eq!(cfg.limits.premium_requests_per_minute, 240);
        assert_eq!(cfg.retry.strategy, RetryStrategy::Adaptive);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.min_wait_ms, 15_000);
        assert_eq!(cfg.retry.max_wait_ms, 60_000);
        assert_eq!(cfg.retry.failure_penalty_ms, 3_000);
        assert_eq!(cfg.progress.tick_ms, 250);
        assert_eq!(cfg.progress.easing, Easing::EaseOut);
        assert_eq!(cfg.storage.state_dir, None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = "remote:\n  base_url: https://x\n  extra_field: 1\n";
        assert!(serde_yaml::from_str::<ScanqConfig>(yaml).is_err());

        let yaml = "remote:\n  base_url: https://x\ntypo_section: {}\n";
        assert!(serde_yaml::from_str::<ScanqConfig>(yaml).is_err());
    }

    #[test]
    fn validate_rejects_tick_out_of_range() {
        let mut cfg = base_config();
        cfg.progress.tick_ms = 199;
        assert!(cfg.validate().is_err());
        cfg.progress.tick_ms = 301;
        assert!(cfg.validate().is_err());
        cfg.progress.tick_ms = 200;
        cfg.validate().unwrap();
        cfg.progress.tick_ms = 300;
        cfg.validate().unwrap();
    }

    #[test]
    fn validate_rejects_inverted_wait_bounds() {
        let mut cfg = base_config();
        cfg.retry.min_wait_ms = 61_000;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("min_wait_ms"), "unexpected error: {err}");
    }

    #[test]
    fn validate_rejects_zero_rates() {
        let mut cfg = base_config();
        cfg.limits.requests_per_minute = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.progress.average_upload_speed = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.remote.upload_url_threshold = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_base_url() {
        let mut cfg = base_config();
        cfg.remote.base_url = "  ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn retry_strategy_parses_lowercase() {
        let yaml = "remote:\n  base_url: https://x\nretry:\n  strategy: fixed\n";
        let cfg: ScanqConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.retry.strategy, RetryStrategy::Fixed);
    }

    #[test]
    fn easing_parses_kebab_case() {
        let yaml = "remote:\n  base_url: https://x\nprogress:\n  easing: linear\n";
        let cfg: ScanqConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.progress.easing, Easing::Linear);
    }

    #[test]
    fn upload_budget_scales_with_size() {
        let cfg = EngineConfig::default();
        // 1 MiB at 1 MiB/s
        assert_eq!(cfg.upload_budget_ms(1024 * 1024), 1000);
        assert_eq!(cfg.upload_budget_ms(10 * 1024 * 1024), 10_000);
        // never zero, even for empty input
        assert_eq!(cfg.upload_budget_ms(0), 1);
    }
}
