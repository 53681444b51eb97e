//! Normalization of heterogeneous error values.
//!
//! Callers hand the normalizer whatever failed: a transport error record, a
//! Rust error value, a bare string or a loosely typed JSON payload. The
//! normalizer always answers with a well-formed [`ErrorInfo`] or
//! [`ParsedError`]; it has no failure path of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ErrorCategory, ErrorClassifier, ErrorInfo, ParsedError, Severity};

/// Codes treated as transient, expected conditions.
const LOW_SEVERITY_CODES: &[&str] = &[
    "MAINTENANCE_MODE",
    "RATE_LIMITED",
    "RATE_LIMIT_EXCEEDED",
    "TOO_MANY_REQUESTS",
];

/// Codes the user can usually resolve on their own.
const MEDIUM_SEVERITY_CODES: &[&str] = &[
    "EMAIL_NOT_VERIFIED",
    "ACCOUNT_LOCKED",
    "TOKEN_EXPIRED",
    "SESSION_EXPIRED",
    "INVALID_TOKEN",
];

/// Codes that indicate a hard access denial.
const CRITICAL_SEVERITY_CODES: &[&str] = &[
    "ACCOUNT_DISABLED",
    "ACCOUNT_SUSPENDED",
    "FORBIDDEN",
    "PERMISSION_DENIED",
];

/// Maximum nesting followed when flattening field errors.
const MAX_FLATTEN_DEPTH: usize = 8;

/// A transport-level error record, as produced by [`normalize_api_error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Field errors: a map of field name to message, list of messages, or a
    /// nested map of the same shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ApiError {
    /// Creates a record with only a status and message.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
            detail: None,
            errors: None,
            retry_after_seconds: None,
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_errors(mut self, errors: Value) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// The shapes of error value the normalizer accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum RawError {
    /// A structured transport error.
    Api(ApiError),
    /// A generic error value that only exposes a message.
    Failure { message: String },
    /// A bare string.
    Text(String),
    /// Any JSON value: objects, arrays, numbers, booleans or null.
    Value(Value),
    /// No value at all.
    Unknown,
}

impl RawError {
    /// Captures a Rust error value by its display message.
    pub fn from_error(error: &(dyn std::error::Error + '_)) -> Self {
        RawError::Failure {
            message: error.to_string(),
        }
    }
}

impl From<ApiError> for RawError {
    fn from(error: ApiError) -> Self {
        RawError::Api(error)
    }
}

impl From<&str> for RawError {
    fn from(text: &str) -> Self {
        RawError::Text(text.to_string())
    }
}

impl From<String> for RawError {
    fn from(text: String) -> Self {
        RawError::Text(text)
    }
}

impl From<Value> for RawError {
    fn from(value: Value) -> Self {
        RawError::Value(value)
    }
}

impl<T: Into<RawError>> From<Option<T>> for RawError {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(RawError::Unknown)
    }
}

/// Turns raw error values into canonical descriptors.
#[derive(Debug, Default)]
pub struct ErrorNormalizer {
    classifier: ErrorClassifier,
}

impl ErrorNormalizer {
    /// Creates a normalizer backed by the default classifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a normalizer backed by a custom classifier.
    pub fn with_classifier(classifier: ErrorClassifier) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Produces the display descriptor for any error value.
    pub fn parse_error(&self, input: &RawError) -> ErrorInfo {
        self.parse_with_status(input).0
    }

    /// Produces the logging descriptor for any error value, including its
    /// severity.
    pub fn parse_api_error(&self, input: &RawError) -> ParsedError {
        let (info, status) = self.parse_with_status(input);
        let severity = determine_severity(&info.code, status);
        ParsedError::from_info(info, severity, status)
    }

    /// Dispatches on the input shape, returning the descriptor and the HTTP
    /// status it was derived from, if any.
    fn parse_with_status(&self, input: &RawError) -> (ErrorInfo, Option<u16>) {
        match input {
            RawError::Api(api) => (self.from_api_error(api), Some(api.status)),
            RawError::Failure { message } | RawError::Text(message) => {
                let info = self.classifier.from_message(message);
                let status = self.classifier.extract_status(message);
                (info, status)
            }
            RawError::Value(value) => self.from_value(value),
            RawError::Unknown => (ErrorInfo::unknown(""), None),
        }
    }

    fn from_api_error(&self, api: &ApiError) -> ErrorInfo {
        let mut info = self.classifier.from_status_code(api.status);

        if let Some(code) = non_empty(api.code.as_deref()) {
            info.code = code.to_string();
        }

        // A specific detail beats the server's generic message, which beats
        // the table text.
        if let Some(detail) = non_empty(api.detail.as_deref()) {
            info.message = detail.to_string();
        } else if let Some(message) = non_empty(Some(api.message.as_str())) {
            info.message = message.to_string();
        }

        if let Some(errors) = &api.errors {
            let mut lines = Vec::new();
            flatten_field_errors(errors, &mut lines, 0);
            for line in lines {
                info.push_detail(line);
            }
        }

        if api.status >= 500 {
            info.retryable = true;
        }

        if let Some(seconds) = api.retry_after_seconds {
            info.retry_after_seconds = Some(seconds);
        }
        if let Some(id) = non_empty(api.correlation_id.as_deref()) {
            info.correlation_id = Some(id.to_string());
        }

        if info.category == ErrorCategory::RateLimit {
            if let Some(seconds) = info.retry_after_seconds {
                info.user_message = format!(
                    "Too many requests. Please wait about {} seconds before trying again.",
                    seconds
                );
                info.action = Some(format!("Try again in {} seconds", seconds));
            }
        }

        info
    }

    fn from_value(&self, value: &Value) -> (ErrorInfo, Option<u16>) {
        match value {
            Value::String(text) => {
                let info = self.classifier.from_message(text);
                (info, self.classifier.extract_status(text))
            }
            Value::Object(map) => self.from_object(map),
            _ => (ErrorInfo::unknown(""), None),
        }
    }

    fn from_object(&self, map: &Map<String, Value>) -> (ErrorInfo, Option<u16>) {
        if let Some(status) = status_field(map) {
            let api = api_error_from_object(status, map);
            return (self.from_api_error(&api), Some(status));
        }

        if map.get("success") == Some(&Value::Bool(false)) {
            let api = api_error_from_object(400, map);
            return (self.from_api_error(&api), Some(400));
        }

        if let Some(text) = string_field(map, &["message", "detail", "error"]) {
            let info = self.classifier.from_message(&text);
            return (info, self.classifier.extract_status(&text));
        }

        (ErrorInfo::unknown(""), None)
    }
}

/// Decides the severity for an error code, falling back to the HTTP status.
///
/// Explicit code lists are consulted first (low, then medium, then critical);
/// otherwise `>= 500` is critical, `400..=499` is high and anything else is
/// medium.
pub fn determine_severity(code: &str, status: Option<u16>) -> Severity {
    if LOW_SEVERITY_CODES.contains(&code) {
        return Severity::Low;
    }
    if MEDIUM_SEVERITY_CODES.contains(&code) {
        return Severity::Medium;
    }
    if CRITICAL_SEVERITY_CODES.contains(&code) {
        return Severity::Critical;
    }

    match status {
        Some(s) if s >= 500 => Severity::Critical,
        Some(s) if (400..500).contains(&s) => Severity::High,
        _ => Severity::Medium,
    }
}

/// Builds an [`ApiError`] from a transport status and the decoded body.
///
/// The message is the payload's `message`, then its `detail`, then
/// `"HTTP {status}: {status_text}"`.
pub fn normalize_api_error(status: u16, status_text: &str, payload: &Value) -> ApiError {
    let map = payload.as_object();
    let field = |names: &[&str]| map.and_then(|m| string_field(m, names));

    let detail = field(&["detail"]);
    let message = field(&["message"])
        .or_else(|| detail.clone())
        .unwrap_or_else(|| format!("HTTP {}: {}", status, status_text));

    ApiError {
        status,
        message,
        code: field(&["code", "errorCode", "error_code"]),
        detail,
        errors: map.and_then(|m| m.get("errors")).filter(|v| !v.is_null()).cloned(),
        retry_after_seconds: map.and_then(retry_after_field),
        correlation_id: field(&["correlationId", "correlation_id", "requestId", "request_id"]),
        timestamp: Utc::now(),
    }
}

/// Reads a failed HTTP response into an [`ApiError`].
///
/// Bodies that are not JSON are treated as an empty payload.
pub async fn normalize_response(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let status_text = status.canonical_reason().unwrap_or("Unknown Status").to_string();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let payload = match response.text().await {
        Ok(body) => serde_json::from_str(&body).unwrap_or(Value::Null),
        Err(e) => {
            tracing::debug!(error = %e, "failed to read error response body");
            Value::Null
        }
    };

    let mut api = normalize_api_error(status.as_u16(), &status_text, &payload);
    if api.retry_after_seconds.is_none() {
        api.retry_after_seconds = retry_after;
    }
    api
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn string_field(map: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match map.get(*name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    })
}

fn status_field(map: &Map<String, Value>) -> Option<u16> {
    ["status", "statusCode"].iter().find_map(|name| match map.get(*name) {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn retry_after_field(map: &Map<String, Value>) -> Option<u64> {
    ["retryAfter", "retry_after", "retryAfterSeconds"]
        .iter()
        .find_map(|name| match map.get(*name) {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        })
}

fn api_error_from_object(default_status: u16, map: &Map<String, Value>) -> ApiError {
    let status = status_field(map).unwrap_or(default_status);
    let mut api = normalize_api_error(status, "", &Value::Object(map.clone()));
    if string_field(map, &["message", "detail"]).is_none() {
        // No usable text: keep the status-table message instead of "HTTP 400: ".
        api.message = String::new();
        if let Some(error) = string_field(map, &["error"]) {
            api.message = error;
        }
    }
    api
}

/// Collects field error messages depth-first, in document order.
fn flatten_field_errors(value: &Value, out: &mut Vec<String>, depth: usize) {
    if depth > MAX_FLATTEN_DEPTH {
        return;
    }
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                flatten_field_errors(item, out, depth + 1);
            }
        }
        Value::Object(map) => {
            for nested in map.values() {
                flatten_field_errors(nested, out, depth + 1);
            }
        }
        _ => {}
    }
}
