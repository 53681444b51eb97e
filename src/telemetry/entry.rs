//! Telemetry entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

use crate::error::{ParsedError, Severity};

/// Three-level presentation vocabulary over the four internal severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryLevel {
    /// `low` severity.
    Info,
    /// `medium` severity.
    Warning,
    /// `high` and `critical` severities.
    Error,
}

impl EntryLevel {
    /// Whether an entry of `severity` is shown at this level.
    pub fn includes(&self, severity: Severity) -> bool {
        EntryLevel::from(severity) == *self
    }
}

impl From<Severity> for EntryLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => EntryLevel::Info,
            Severity::Medium => EntryLevel::Warning,
            Severity::High | Severity::Critical => EntryLevel::Error,
        }
    }
}

impl fmt::Display for EntryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryLevel::Info => write!(f, "info"),
            EntryLevel::Warning => write!(f, "warning"),
            EntryLevel::Error => write!(f, "error"),
        }
    }
}

/// Resource sample taken when an entry is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    /// Resident memory of the process in bytes, when it could be sampled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    /// Monotonic milliseconds since the logger was created.
    pub uptime_ms: u64,
}

/// One logged error event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub error: ParsedError,
    pub user_agent: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceSnapshot>,
}

impl ErrorLogEntry {
    /// Presentation level derived from the error's severity.
    pub fn level(&self) -> EntryLevel {
        EntryLevel::from(self.error.severity)
    }
}

/// Aggregate view over the event buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStatistics {
    pub total: usize,
    pub by_code: HashMap<String, usize>,
    pub by_severity: HashMap<Severity, usize>,
    /// Entries whose timestamp falls within the trailing hour.
    pub last_hour: usize,
}
