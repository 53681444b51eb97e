//! Telemetry sink trait and implementations.
//!
//! A sink accepts one serialized [`ErrorLogEntry`] per call. Anything other
//! than an explicit acknowledgement is a failure the logger will retry.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::ErrorLogEntry;

/// Why a delivery attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The sink answered with a non-success status.
    #[error("sink rejected entry with status {0}")]
    Rejected(u16),

    /// The request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The attempt exceeded its deadline.
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The attempt was cancelled before completing.
    #[error("delivery cancelled")]
    Cancelled,
}

/// Destination for telemetry entries.
///
/// Implementations should stop work promptly once `cancel` fires; the logger
/// stops waiting for them at that point regardless.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Returns the name of this sink (e.g., "http", "memory")
    fn name(&self) -> &str;

    /// Delivers one entry.
    async fn send(
        &self,
        entry: &ErrorLogEntry,
        cancel: CancellationToken,
    ) -> Result<(), DeliveryError>;
}

/// Sink that POSTs each entry as JSON to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: String,
}

impl HttpSink {
    /// Create a new HTTP sink for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .build()
            .map_err(|e| DeliveryError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(
        &self,
        entry: &ErrorLogEntry,
        cancel: CancellationToken,
    ) -> Result<(), DeliveryError> {
        let request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(entry)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
            response = request => response
                .map_err(|e| DeliveryError::Transport(format!("HTTP request failed: {}", e)))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected(status.as_u16()));
        }

        Ok(())
    }
}

/// In-process sink that keeps delivered entries.
///
/// Used when no endpoint is configured. It can be switched into a failing
/// mode to exercise the retry path.
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<ErrorLogEntry>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that rejects every entry until told otherwise.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Entries accepted so far, in delivery order.
    pub fn delivered(&self) -> Vec<ErrorLogEntry> {
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of delivery attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(
        &self,
        entry: &ErrorLogEntry,
        cancel: CancellationToken,
    ) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(DeliveryError::Cancelled);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected(503));
        }
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }
}
