//! Canonical error descriptors shared by the classifier, the normalizer and
//! the telemetry logger.
//!
//! Two shapes exist: [`ErrorInfo`] is display-oriented (titles, user-facing
//! copy, suggested actions) and [`ParsedError`] is logging-oriented (code,
//! severity, timestamp). Both carry an [`ErrorCategory`]; only the logging
//! shape carries a [`Severity`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fallback text used whenever an input carries no usable message.
pub const DEFAULT_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// The broad category of an error, driving how it is presented and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connectivity problems between client and server.
    Network,
    /// Missing or invalid credentials.
    Auth,
    /// The request was understood but its content was rejected.
    Validation,
    /// The server failed or could not find what was asked for.
    Server,
    /// Too many requests in a given window.
    RateLimit,
    /// The caller is authenticated but not allowed to do this.
    Permission,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorCategory {
    /// Returns the wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Server => "server",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How urgently an error needs attention. Ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Transient or expected conditions.
    Low,
    /// Conditions the user can resolve on their own.
    #[default]
    Medium,
    /// Request failures that need investigation.
    High,
    /// Server failures or hard access denials.
    Critical,
}

impl Severity {
    /// Returns the wire name of the severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display-oriented error descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Stable identifier, e.g. `RATE_LIMITED`.
    pub code: String,
    /// Short headline.
    pub title: String,
    /// Technical description.
    pub message: String,
    /// Text suitable for showing to the end user.
    pub user_message: String,
    pub category: ErrorCategory,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Ordered, deduplicated list of detail lines.
    #[serde(default)]
    pub details: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ErrorInfo {
    /// Creates a descriptor with no optional fields set.
    pub fn new(
        code: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        user_message: impl Into<String>,
        category: ErrorCategory,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.into(),
            title: title.into(),
            message: message.into(),
            user_message: user_message.into(),
            category,
            retryable,
            action: None,
            details: Vec::new(),
            support_text: None,
            support_url: None,
            retry_after_seconds: None,
            correlation_id: None,
        }
    }

    /// The descriptor returned when nothing more specific is known.
    pub fn unknown(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            DEFAULT_ERROR_MESSAGE.to_string()
        } else {
            message
        };
        Self::new(
            "UNKNOWN_ERROR",
            "Unexpected Error",
            message,
            "Something went wrong. Please try again.",
            ErrorCategory::Unknown,
            false,
        )
    }

    /// Sets the suggested action.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Sets the support text.
    pub fn with_support_text(mut self, text: impl Into<String>) -> Self {
        self.support_text = Some(text.into());
        self
    }

    /// Sets the retry-after hint in seconds.
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    /// Appends a detail line unless an identical line is already present.
    pub fn push_detail(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        if detail.trim().is_empty() || self.details.contains(&detail) {
            return;
        }
        self.details.push(detail);
    }

    /// Appends several detail lines, keeping the list deduplicated.
    pub fn with_details<I, S>(mut self, details: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for detail in details {
            self.push_detail(detail);
        }
        self
    }
}

/// Logging-oriented error descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedError {
    pub code: String,
    /// Never empty.
    pub message: String,
    #[serde(default)]
    pub details: Vec<String>,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub user_message: String,
    pub retryable: bool,
    /// HTTP status that produced the error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

impl ParsedError {
    /// Creates a parsed error stamped with the current time.
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        category: ErrorCategory,
        severity: Severity,
    ) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            DEFAULT_ERROR_MESSAGE.to_string()
        } else {
            message
        };
        Self {
            code: code.into(),
            user_message: message.clone(),
            message,
            details: Vec::new(),
            category,
            severity,
            retryable: false,
            status_code: None,
            timestamp: Utc::now(),
        }
    }

    /// Builds the logging shape from a display descriptor.
    pub fn from_info(info: ErrorInfo, severity: Severity, status_code: Option<u16>) -> Self {
        let message = if info.message.trim().is_empty() {
            DEFAULT_ERROR_MESSAGE.to_string()
        } else {
            info.message
        };
        Self {
            code: info.code,
            message,
            details: info.details,
            category: info.category,
            severity,
            user_message: info.user_message,
            retryable: info.retryable,
            status_code,
            timestamp: Utc::now(),
        }
    }

    /// Sets the user-facing message.
    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = user_message.into();
        self
    }

    /// Marks the error as retryable or not.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl fmt::Display for ParsedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ParsedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_wire_names() {
        let json = serde_json::to_string(&ErrorCategory::RateLimit).unwrap();
        assert_eq!(json, "\"rate_limit\"");
        assert_eq!(ErrorCategory::Permission.to_string(), "permission");

        let parsed: ErrorCategory = serde_json::from_str("\"network\"").unwrap();
        assert_eq!(parsed, ErrorCategory::Network);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::Low.max(Severity::High), Severity::High);
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
    }

    #[test]
    fn test_unknown_info_never_has_empty_message() {
        let info = ErrorInfo::unknown("   ");
        assert_eq!(info.message, DEFAULT_ERROR_MESSAGE);
        assert_eq!(info.category, ErrorCategory::Unknown);
        assert!(!info.retryable);
    }

    #[test]
    fn test_push_detail_deduplicates_and_keeps_order() {
        let info = ErrorInfo::unknown("boom").with_details(["b", "a", "b", "", "c", "a"]);
        assert_eq!(info.details, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_info_serializes_camel_case_and_skips_absent_fields() {
        let info = ErrorInfo::unknown("boom").with_retry_after(30);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["userMessage"], "Something went wrong. Please try again.");
        assert_eq!(json["retryAfterSeconds"], 30);
        assert!(json.get("supportUrl").is_none());
    }

    #[test]
    fn test_parsed_error_from_info() {
        let info = ErrorInfo::new(
            "NOT_FOUND",
            "Not Found",
            "",
            "We could not find that.",
            ErrorCategory::Server,
            false,
        )
        .with_details(["missing"]);

        let parsed = ParsedError::from_info(info, Severity::High, Some(404));
        assert_eq!(parsed.code, "NOT_FOUND");
        assert_eq!(parsed.message, DEFAULT_ERROR_MESSAGE);
        assert_eq!(parsed.details, vec!["missing"]);
        assert_eq!(parsed.status_code, Some(404));
        assert_eq!(parsed.to_string(), format!("[NOT_FOUND] {}", DEFAULT_ERROR_MESSAGE));
    }

    #[test]
    fn test_parsed_error_new_defaults_user_message() {
        let parsed = ParsedError::new("INFO", "Loaded dashboard", ErrorCategory::Unknown, Severity::Low);
        assert_eq!(parsed.user_message, "Loaded dashboard");
        assert!(!parsed.retryable);
    }
}
