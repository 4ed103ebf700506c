//! Exporter configuration.

use crate::error::ConfigError;
use crate::logs::Severity;
use std::str::FromStr;
use std::time::Duration;

/// Collector endpoint environment variable.
pub const ENV_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
/// Resource `service.name` environment variable.
pub const ENV_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
/// Flush interval in milliseconds.
pub const ENV_FLUSH_INTERVAL: &str = "OTEL_METRIC_EXPORT_INTERVAL";
/// Batch size cap.
pub const ENV_MAX_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
/// Sealed-batch queue capacity.
pub const ENV_QUEUE_CAPACITY: &str = "OTEL_EXPORT_QUEUE_CAPACITY";
/// Per-attempt export timeout in milliseconds.
pub const ENV_EXPORT_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";
/// Total delivery attempts per batch.
pub const ENV_MAX_ATTEMPTS: &str = "OTEL_EXPORT_MAX_ATTEMPTS";
/// Shutdown drain grace period in milliseconds.
pub const ENV_SHUTDOWN_GRACE: &str = "OTEL_SHUTDOWN_GRACE";
/// Minimum exported log severity.
pub const ENV_LOG_LEVEL: &str = "OTEL_LOG_LEVEL";

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total delivery attempts, including the first one. Must be at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Maximum delay between retries (caps exponential growth).
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 = double delay each retry).
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before a given attempt (0-indexed). The first attempt never waits.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.initial_backoff.as_millis() as f64
            * self.multiplier.powi((attempt - 1).min(i32::MAX as u32) as i32);
        if !delay_ms.is_finite() || delay_ms >= self.max_backoff.as_millis() as f64 {
            return self.max_backoff;
        }
        Duration::from_millis(delay_ms as u64)
    }

    /// Sum of all backoff delays for one batch, excluding attempt time.
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_attempts).map(|a| self.backoff_for(a)).sum()
    }
}

/// Configuration of the export pipeline and its transport.
///
/// Immutable once the pipeline is started.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Collector base address; signals are posted to `{endpoint}/v1/{signal}`.
    pub endpoint: String,
    /// Resource `service.name` attached to every payload.
    pub service_name: String,
    /// Period of the background flush timer.
    pub flush_interval: Duration,
    /// Records per batch before it is sealed and handed to the worker.
    pub max_batch_size: usize,
    /// Sealed batches waiting for the worker before new ones are dropped.
    pub queue_capacity: usize,
    /// Upper bound for a single delivery attempt.
    pub export_timeout: Duration,
    /// How long shutdown may spend draining.
    pub shutdown_grace: Duration,
    /// Delivery retry policy.
    pub retry: RetryPolicy,
    /// Log records below this severity are not exported.
    pub min_log_severity: Severity,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4318".to_string(),
            service_name: "unknown_service".to_string(),
            flush_interval: Duration::from_secs(10),
            max_batch_size: 512,
            queue_capacity: 8,
            export_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            min_log_severity: Severity::Info,
        }
    }
}

impl ExporterConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Overrides fields that are set in the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Overrides fields from an arbitrary variable lookup.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.endpoint = endpoint;
        }
        if let Some(service_name) = lookup(ENV_SERVICE_NAME) {
            self.service_name = service_name;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_FLUSH_INTERVAL)? {
            self.flush_interval = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var(&lookup, ENV_MAX_BATCH_SIZE)? {
            self.max_batch_size = size;
        }
        if let Some(capacity) = parse_var(&lookup, ENV_QUEUE_CAPACITY)? {
            self.queue_capacity = capacity;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_EXPORT_TIMEOUT)? {
            self.export_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var(&lookup, ENV_MAX_ATTEMPTS)? {
            self.retry.max_attempts = attempts;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_SHUTDOWN_GRACE)? {
            self.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(severity) = parse_var(&lookup, ENV_LOG_LEVEL)? {
            self.min_log_severity = severity;
        }
        Ok(self)
    }

    /// Checks the configuration before a pipeline is built from it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.endpoint).map_err(|e| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }
        if self.service_name.trim().is_empty() {
            return Err(invalid("service_name", "must not be empty"));
        }
        if self.flush_interval.is_zero() {
            return Err(invalid("flush_interval", "must be greater than zero"));
        }
        if self.max_batch_size == 0 {
            return Err(invalid("max_batch_size", "must be greater than zero"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be greater than zero"));
        }
        if self.export_timeout.is_zero() {
            return Err(invalid("export_timeout", "must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(invalid("retry.multiplier", "must be a finite value >= 1.0"));
        }
        Ok(())
    }

    /// Sets the collector endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the service name.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Sets the flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the batch size cap.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the sealed-batch queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the per-attempt export timeout.
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the minimum exported log severity.
    pub fn with_min_log_severity(mut self, severity: Severity) -> Self {
        self.min_log_severity = severity;
        self
    }

    /// Metric name prefix derived from the service name (`user-api` → `user_api`).
    pub fn metric_prefix(&self) -> String {
        self.service_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect()
    }
}

fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidValue { field, reason }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ExporterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flush_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_env_overrides() {
        let config = ExporterConfig::default()
            .apply_env_from(lookup(&[
                (ENV_ENDPOINT, "http://otel-collector:4318"),
                (ENV_SERVICE_NAME, "user-api"),
                (ENV_FLUSH_INTERVAL, "250"),
                (ENV_MAX_BATCH_SIZE, "64"),
                (ENV_MAX_ATTEMPTS, "2"),
                (ENV_LOG_LEVEL, "warn"),
            ]))
            .unwrap();

        assert_eq!(config.endpoint, "http://otel-collector:4318");
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.max_batch_size, 64);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.min_log_severity, Severity::Warn);
        assert_eq!(config.metric_prefix(), "user_api");
    }

    #[test]
    fn test_unparsable_env_value() {
        let err = ExporterConfig::default()
            .apply_env_from(lookup(&[(ENV_MAX_BATCH_SIZE, "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_MAX_BATCH_SIZE, .. }));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_endpoint = ExporterConfig::default().with_endpoint("otel-collector:4318");
        assert!(matches!(
            bad_endpoint.validate(),
            Err(ConfigError::InvalidEndpoint { .. })
        ));

        let zero_interval = ExporterConfig::default().with_flush_interval(Duration::ZERO);
        assert!(matches!(
            zero_interval.validate(),
            Err(ConfigError::InvalidValue { field: "flush_interval", .. })
        ));

        let zero_batch = ExporterConfig::default().with_max_batch_size(0);
        assert!(zero_batch.validate().is_err());

        let no_attempts = ExporterConfig::default().with_retry(RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        });
        assert!(no_attempts.validate().is_err());
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff_for(0), Duration::ZERO);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(500));
        assert_eq!(policy.total_backoff(), Duration::from_millis(1700));
    }
}
