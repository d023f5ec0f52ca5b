//! Dispatch policy: rate limit, retry and per-attempt timeout settings.
//!
//! Durations are written as integer milliseconds (`window_ms`,
//! `backoff_base_ms`, ...) so a policy reads the same in YAML, JSON and
//! environment variables.
//!
//! ```yaml
//! rate_limit:
//!   permits: 5
//!   window_ms: 60000
//!   queue_capacity: 10
//! retry:
//!   max_attempts: 3
//!   backoff_base_ms: 200
//!   backoff_cap_ms: 10000
//!   overall_deadline_ms: 60000
//! attempt_timeout_ms: 15000
//! ```

use crate::resilience::rate_limiter::RateLimiterConfig;
use crate::resilience::retry::RetryConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchPolicy {
    pub rate_limit: RateLimiterConfig,
    pub retry: RetryConfig,
    /// Upper bound for a single transport call; elapsing counts as a transient timeout.
    #[serde(rename = "attempt_timeout_ms", with = "opt_duration_ms")]
    pub attempt_timeout: Option<Duration>,
}

impl DispatchPolicy {
    pub fn new(rate_limit: RateLimiterConfig, retry: RetryConfig) -> Self {
        Self {
            rate_limit,
            retry,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let policy: Self = serde_yaml::from_str(text)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let policy: Self = serde_json::from_str(text)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Defaults overridden by `ADGUARD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source. Blank values are ignored;
    /// values that do not parse are configuration errors.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = read("ADGUARD_RATE_LIMIT_PERMITS") {
            self.rate_limit.permits = parse_var("ADGUARD_RATE_LIMIT_PERMITS", &v)?;
        }
        if let Some(v) = read("ADGUARD_RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.window =
                Duration::from_millis(parse_var("ADGUARD_RATE_LIMIT_WINDOW_MS", &v)?);
        }
        if let Some(v) = read("ADGUARD_RATE_LIMIT_QUEUE") {
            self.rate_limit.queue_capacity = parse_var("ADGUARD_RATE_LIMIT_QUEUE", &v)?;
        }
        if let Some(v) = read("ADGUARD_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_var("ADGUARD_RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = read("ADGUARD_RETRY_BASE_MS") {
            self.retry.backoff_base = Duration::from_millis(parse_var("ADGUARD_RETRY_BASE_MS", &v)?);
        }
        if let Some(v) = read("ADGUARD_RETRY_CAP_MS") {
            self.retry.backoff_cap = Duration::from_millis(parse_var("ADGUARD_RETRY_CAP_MS", &v)?);
        }
        if let Some(v) = read("ADGUARD_RETRY_DEADLINE_MS") {
            let ms: u64 = parse_var("ADGUARD_RETRY_DEADLINE_MS", &v)?;
            // 0 disables the overall deadline
            self.retry.overall_deadline = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(v) = read("ADGUARD_ATTEMPT_TIMEOUT_MS") {
            let ms: u64 = parse_var("ADGUARD_ATTEMPT_TIMEOUT_MS", &v)?;
            self.attempt_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()?;
        self.retry.validate()?;
        if self.attempt_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::configuration_with_context(
                "attempt timeout must be non-zero",
                ErrorContext::new()
                    .with_field_path("attempt_timeout_ms")
                    .with_source("dispatch_policy"),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::configuration_with_context(
            format!("cannot parse {}", name),
            ErrorContext::new()
                .with_field_path(name)
                .with_details(format!("value: {:?}", value))
                .with_source("dispatch_policy"),
        )
    })
}

/// Serde adapter: `Duration` as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Serde adapter: `Option<Duration>` as optional integer milliseconds.
pub mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let policy = DispatchPolicy::default();
        assert_eq!(policy.rate_limit.permits, 10);
        assert_eq!(policy.retry.max_attempts, 3);
        assert_eq!(policy.retry.overall_deadline, Some(Duration::from_secs(60)));
        assert_eq!(policy.attempt_timeout, None);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_yaml_with_partial_fields() {
        let policy = DispatchPolicy::from_yaml_str(
            "rate_limit:\n  permits: 5\n  window_ms: 60000\n  queue_capacity: 10\nretry:\n  backoff_base_ms: 50\nattempt_timeout_ms: 1500\n",
        )
        .unwrap();
        assert_eq!(policy.rate_limit.permits, 5);
        assert_eq!(policy.rate_limit.window, Duration::from_secs(60));
        assert_eq!(policy.rate_limit.queue_capacity, 10);
        assert_eq!(policy.retry.backoff_base, Duration::from_millis(50));
        assert_eq!(policy.retry.max_attempts, 3);
        assert_eq!(policy.attempt_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_yaml_null_deadline_disables_it() {
        let policy = DispatchPolicy::from_yaml_str("retry:\n  overall_deadline_ms: null\n").unwrap();
        assert_eq!(policy.retry.overall_deadline, None);
    }

    #[test]
    fn test_invalid_yaml_policy_is_rejected() {
        let err = DispatchPolicy::from_yaml_str("rate_limit:\n  window_ms: 0\n").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        let err = DispatchPolicy::from_yaml_str("retry: [1, 2]").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[test]
    fn test_json_round_trip_uses_millis() {
        let policy = DispatchPolicy::default().with_attempt_timeout(Duration::from_secs(2));
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["rate_limit"]["window_ms"], 1000);
        assert_eq!(json["attempt_timeout_ms"], 2000);
        let back = DispatchPolicy::from_json_str(&json.to_string()).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_env_overrides() {
        let policy = DispatchPolicy::default()
            .apply_env_from(env(&[
                ("ADGUARD_RATE_LIMIT_PERMITS", "5"),
                ("ADGUARD_RATE_LIMIT_WINDOW_MS", "60000"),
                ("ADGUARD_RATE_LIMIT_QUEUE", " 10 "),
                ("ADGUARD_RETRY_MAX_ATTEMPTS", "4"),
                ("ADGUARD_RETRY_DEADLINE_MS", "0"),
                ("ADGUARD_ATTEMPT_TIMEOUT_MS", ""),
            ]))
            .unwrap();
        assert_eq!(policy.rate_limit.permits, 5);
        assert_eq!(policy.rate_limit.window, Duration::from_secs(60));
        assert_eq!(policy.rate_limit.queue_capacity, 10);
        assert_eq!(policy.retry.max_attempts, 4);
        assert_eq!(policy.retry.overall_deadline, None);
        assert_eq!(policy.attempt_timeout, None);
    }

    #[test]
    fn test_env_rejects_garbage_and_invalid_combinations() {
        let err = DispatchPolicy::default()
            .apply_env_from(env(&[("ADGUARD_RATE_LIMIT_PERMITS", "many")]))
            .unwrap_err();
        match err {
            Error::Configuration { context, .. } => {
                assert_eq!(context.field_path.as_deref(), Some("ADGUARD_RATE_LIMIT_PERMITS"))
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = DispatchPolicy::default()
            .apply_env_from(env(&[
                ("ADGUARD_RETRY_BASE_MS", "5000"),
                ("ADGUARD_RETRY_CAP_MS", "1000"),
            ]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_zero_permits_is_valid() {
        let policy = DispatchPolicy::default()
            .apply_env_from(env(&[("ADGUARD_RATE_LIMIT_PERMITS", "0")]))
            .unwrap();
        assert_eq!(policy.rate_limit.permits, 0);
    }
}
