//! Error telemetry: buffering, enrichment and resilient delivery.
//!
//! The [`TelemetryLogger`] keeps a bounded in-memory history of error events
//! and ships each one to a [`TelemetrySink`]. Failed deliveries go to a
//! bounded retry queue that is drained serially, one entry at a time.

pub mod backoff;
pub mod context;
pub mod entry;
pub mod logger;
pub mod sink;

use serde::Deserialize;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub use backoff::RetryStrategy;
pub use context::{
    user_id_from_auth_blob, KeyValueStore, MemoryStore, ProcessContext, RuntimeContext,
    StoreError, AUTH_STORAGE_KEY, SESSION_ID_KEY,
};
pub use entry::{EntryLevel, ErrorLogEntry, LogStatistics, PerformanceSnapshot};
pub use logger::{DrainOutcome, TelemetryLogger, TelemetryLoggerBuilder};
pub use sink::{DeliveryError, HttpSink, MemorySink, TelemetrySink};

/// Errors raised by the logger's management operations.
///
/// Logging itself never fails; only exporting to disk can.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// IO error while writing an export.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for telemetry management operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Configuration for the telemetry logger.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Remote sink URL. Without one, entries are delivered to an in-process
    /// [`MemorySink`].
    pub endpoint: Option<String>,
    /// Capacity of the event buffer.
    /// Default: 100
    pub max_logs: usize,
    /// Capacity of the retry queue.
    /// Default: 50
    pub max_retry: usize,
    /// Per-attempt delivery timeout in milliseconds.
    /// Default: 5000
    pub delivery_timeout_ms: u64,
    /// Pause between successive deliveries while draining, in milliseconds.
    /// Default: 1000
    pub drain_interval_ms: u64,
    /// Mirror every entry to the diagnostic console.
    pub development: bool,
    /// Location reported in each entry's `url`.
    pub app_url: Option<String>,
    /// First delay of a scheduled retry drain, in milliseconds.
    /// Default: 1000
    pub backoff_base_ms: u64,
    /// Upper bound for scheduled retry drain delays, in milliseconds.
    /// Default: 60000
    pub backoff_max_ms: u64,
    /// Consecutive scheduled drains before waiting for the next log call.
    /// Zero disables scheduled drains. Default: 5
    pub backoff_max_attempts: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_logs: 100,
            max_retry: 50,
            delivery_timeout_ms: 5_000,
            drain_interval_ms: 1_000,
            development: false,
            app_url: None,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            backoff_max_attempts: 5,
        }
    }
}

impl TelemetryConfig {
    /// Creates a new TelemetryConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the remote sink URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the event buffer capacity.
    pub fn with_max_logs(mut self, max_logs: usize) -> Self {
        self.max_logs = max_logs;
        self
    }

    /// Sets the retry queue capacity.
    pub fn with_max_retry(mut self, max_retry: usize) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Sets the per-attempt delivery timeout.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the pause between deliveries while draining.
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Enables or disables console mirroring.
    pub fn with_development(mut self, enabled: bool) -> Self {
        self.development = enabled;
        self
    }

    /// Sets the reported application URL.
    pub fn with_app_url(mut self, url: impl Into<String>) -> Self {
        self.app_url = Some(url.into());
        self
    }

    /// Configures scheduled retry drains. `max_attempts = 0` disables them.
    pub fn with_backoff(mut self, base: Duration, max: Duration, max_attempts: u32) -> Self {
        self.backoff_base_ms = base.as_millis() as u64;
        self.backoff_max_ms = max.as_millis() as u64;
        self.backoff_max_attempts = max_attempts;
        self
    }

    /// Disables scheduled retry drains.
    pub fn without_backoff(mut self) -> Self {
        self.backoff_max_attempts = 0;
        self
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    /// The schedule for follow-up drains, if enabled.
    pub fn retry_strategy(&self) -> Option<RetryStrategy> {
        if self.backoff_max_attempts == 0 {
            return None;
        }
        Some(RetryStrategy::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
            self.backoff_max_attempts,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacities() {
        let config = TelemetryConfig::default();
        assert_eq!(config.max_logs, 100);
        assert_eq!(config.max_retry, 50);
    }

    #[test]
    fn test_default_timings() {
        let config = TelemetryConfig::default();
        assert_eq!(config.delivery_timeout(), Duration::from_secs(5));
        assert_eq!(config.drain_interval(), Duration::from_secs(1));
        assert!(!config.development);
    }

    #[test]
    fn test_builder_pattern() {
        let config = TelemetryConfig::new()
            .with_endpoint("https://telemetry.example.com/errors")
            .with_max_logs(10)
            .with_max_retry(3)
            .with_delivery_timeout(Duration::from_millis(250))
            .with_drain_interval(Duration::from_millis(20))
            .with_development(true)
            .with_app_url("https://admin.example.com/users");

        assert_eq!(config.endpoint.as_deref(), Some("https://telemetry.example.com/errors"));
        assert_eq!(config.max_logs, 10);
        assert_eq!(config.max_retry, 3);
        assert_eq!(config.delivery_timeout(), Duration::from_millis(250));
        assert_eq!(config.drain_interval(), Duration::from_millis(20));
        assert!(config.development);
        assert_eq!(config.app_url.as_deref(), Some("https://admin.example.com/users"));
    }

    #[test]
    fn test_retry_strategy_toggle() {
        let config = TelemetryConfig::default();
        let strategy = config.retry_strategy().unwrap();
        assert_eq!(strategy.max_attempts, 5);
        assert_eq!(strategy.base_delay, Duration::from_secs(1));

        assert!(config.without_backoff().retry_strategy().is_none());
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: TelemetryConfig = toml::from_str(
            r#"
            endpoint = "http://localhost:9000/ingest"
            max_retry = 20
        "#,
        )
        .unwrap();

        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000/ingest"));
        assert_eq!(config.max_retry, 20);
        assert_eq!(config.max_logs, 100);
    }

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Io(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert_eq!(err.to_string(), "IO error: missing");
    }
}
