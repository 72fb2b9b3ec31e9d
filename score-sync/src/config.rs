use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvalidConfig {
    #[error("rate limit window cannot be 0")]
    ZeroRateWindow,

    #[error("rate limit capacity cannot be 0")]
    ZeroRateCapacity,

    #[error("retry.max_attempts cannot be 0")]
    ZeroAttempts,

    #[error("queue_poll_ms cannot be 0")]
    ZeroQueuePoll,

    #[error("submit.timeout_ms cannot be 0")]
    ZeroSubmitTimeout,

    #[error("backend url cannot be a base: {0}")]
    UnusableBackendUrl(String),
}

/// Timing and capacity knobs of the sync pipeline. All values are milliseconds
/// unless noted otherwise.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last edit of a field before it is processed
    pub debounce_ms: u64,
    pub rate_limit: RateLimitConfig,
    /// Delay before the save queue re-checks a rate limited head
    pub queue_poll_ms: u64,
    pub retry: RetryConfig,
    /// How long a field shows `success` before going back to `idle`
    pub success_display_ms: u64,
    /// How long the "failed to save" message stays next to a field
    pub error_notice_ms: u64,
    pub submit: SubmitConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            debounce_ms: 1000,
            rate_limit: RateLimitConfig::default(),
            queue_poll_ms: 500,
            retry: RetryConfig::default(),
            success_display_ms: 2000,
            error_notice_ms: 5000,
            submit: SubmitConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.rate_limit.window_ms == 0 {
            return Err(InvalidConfig::ZeroRateWindow);
        }
        if self.rate_limit.capacity == 0 {
            return Err(InvalidConfig::ZeroRateCapacity);
        }
        if self.retry.max_attempts == 0 {
            return Err(InvalidConfig::ZeroAttempts);
        }
        if self.queue_poll_ms == 0 {
            return Err(InvalidConfig::ZeroQueuePoll);
        }
        if self.submit.timeout_ms == 0 {
            return Err(InvalidConfig::ZeroSubmitTimeout);
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    pub fn success_display(&self) -> Duration {
        Duration::from_millis(self.success_display_ms)
    }

    pub fn error_notice(&self) -> Duration {
        Duration::from_millis(self.error_notice_ms)
    }
}

/// Sliding window admission limit, applied per field.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub capacity: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            window_ms: 2000,
            capacity: 5,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total remote calls per save, including the first one
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each further failure
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after `failed_attempts` consecutive failures.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(31);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(2_u64.pow(exponent)))
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubmitConfig {
    /// Delay before a busy submit is re-checked
    pub recheck_delay_ms: u64,
    /// Consecutive automatic re-checks before giving up
    pub max_rechecks: u32,
    /// Upper bound for the remote submit call
    pub timeout_ms: u64,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        SubmitConfig {
            recheck_delay_ms: 2000,
            max_rechecks: 5,
            timeout_ms: 15000,
        }
    }
}

impl SubmitConfig {
    pub fn recheck_delay(&self) -> Duration {
        Duration::from_millis(self.recheck_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Remote evaluation service
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Base URL of the service, e.g. `https://erp.example.com/`
    pub url: Url,
    /// Forgery-protection token sent as `X-CSRFToken` when set
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl BackendConfig {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.url.cannot_be_a_base() {
            return Err(InvalidConfig::UnusableBackendUrl(self.url.to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: SyncConfig = serde_yaml::from_str(
            r#"
            debounce_ms: 250
            rate_limit:
                capacity: 2
            "#,
        )
        .unwrap();

        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert_eq!(config.rate_limit.capacity, 2);
        assert_eq!(config.rate_limit.window_ms, 2000);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.submit.timeout(), Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn backoff_doubles() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(1000));
        assert_eq!(retry.backoff(2), Duration::from_millis(2000));
        assert_eq!(retry.backoff(3), Duration::from_millis(4000));
    }

    #[test]
    fn rejects_degenerate_values() {
        let mut config = SyncConfig::default();
        config.rate_limit.capacity = 0;
        assert_eq!(config.validate(), Err(InvalidConfig::ZeroRateCapacity));

        let mut config = SyncConfig::default();
        config.retry.max_attempts = 0;
        assert_eq!(config.validate(), Err(InvalidConfig::ZeroAttempts));

        let mut config = SyncConfig::default();
        config.rate_limit.window_ms = 0;
        assert_eq!(config.validate(), Err(InvalidConfig::ZeroRateWindow));
    }

    #[test]
    fn backend_config() {
        let config: BackendConfig = serde_yaml::from_str(
            r#"
            url: http://127.0.0.1:8069/
            csrf_token: abc
            "#,
        )
        .unwrap();
        assert_eq!(config.csrf_token.as_deref(), Some("abc"));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());

        let config: BackendConfig = serde_yaml::from_str("url: mailto:someone@example.com").unwrap();
        assert!(matches!(
            config.validate(),
            Err(InvalidConfig::UnusableBackendUrl(_))
        ));
    }
}
