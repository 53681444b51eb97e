//! Status-code and message classifier.
//!
//! Maps transport status codes and free-form error messages onto canonical
//! [`ErrorInfo`] descriptors. Message classification is an ordered rule list:
//! the first rule that matches wins, so the order of [`ErrorClassifier::default_rules`]
//! is part of the contract.

use regex::Regex;
use std::fmt;

use super::{ErrorCategory, ErrorInfo};

/// Retry hint attached to rate-limit responses.
pub const RATE_LIMIT_RETRY_AFTER_SECS: u64 = 60;

/// Extracts the status from messages such as `HTTP error! status: 503`.
const EMBEDDED_STATUS_PATTERN: &str = r"(?i)\berror!?,?\s*status:?\s*(\d{3})\b";

/// Builds the descriptor a rule produces for the matched text.
type DescriptorFn = fn(&str) -> ErrorInfo;

/// A message rule: when `regex` matches, `build` produces the descriptor.
pub struct MessageRule {
    regex: Regex,
    build: DescriptorFn,
    description: String,
}

impl fmt::Debug for MessageRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRule")
            .field("regex", &self.regex.as_str())
            .field("description", &self.description)
            .finish()
    }
}

impl MessageRule {
    /// Creates a rule from a pattern string.
    ///
    /// # Panics
    /// Panics if the regex pattern is invalid.
    pub fn new(pattern: &str, build: DescriptorFn, description: impl Into<String>) -> Self {
        Self {
            regex: Regex::new(pattern).expect("Invalid regex pattern"),
            build,
            description: description.into(),
        }
    }

    /// Creates a rule from a pre-compiled regex.
    pub fn with_regex(regex: Regex, build: DescriptorFn, description: impl Into<String>) -> Self {
        Self {
            regex,
            build,
            description: description.into(),
        }
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Checks if this rule matches the given text.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Produces the descriptor for `text`.
    pub fn descriptor(&self, text: &str) -> ErrorInfo {
        (self.build)(text)
    }
}

/// Classifies status codes and messages into [`ErrorInfo`].
#[derive(Debug)]
pub struct ErrorClassifier {
    embedded_status: Regex,
    rules: Vec<MessageRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Creates a classifier with the built-in message rules.
    pub fn new() -> Self {
        Self::with_rules(Self::default_rules())
    }

    /// Creates a classifier with custom message rules, evaluated in order.
    pub fn with_rules(rules: Vec<MessageRule>) -> Self {
        Self {
            embedded_status: Regex::new(EMBEDDED_STATUS_PATTERN)
                .expect("Invalid embedded status pattern"),
            rules,
        }
    }

    /// The built-in message rules, in priority order.
    pub fn default_rules() -> Vec<MessageRule> {
        vec![
            MessageRule::new(
                r"(?i)(email|e-mail).*(already\s+(registered|exists|in\s+use|taken))|already\s+registered",
                |_| {
                    ErrorInfo::new(
                        "EMAIL_ALREADY_REGISTERED",
                        "Email Already Registered",
                        "The email address is already associated with an account",
                        "An account with this email already exists. Try signing in instead.",
                        ErrorCategory::Validation,
                        false,
                    )
                    .with_action("Sign in or reset your password")
                },
                "Email already registered",
            ),
            MessageRule::new(
                r"(?i)invalid\s+(credentials|(email|username)\s+or\s+password|password)|incorrect\s+password",
                |_| {
                    ErrorInfo::new(
                        "INVALID_CREDENTIALS",
                        "Invalid Credentials",
                        "The supplied credentials were rejected",
                        "The email or password you entered is incorrect.",
                        ErrorCategory::Auth,
                        false,
                    )
                    .with_action("Check your credentials and try again")
                },
                "Invalid credentials",
            ),
            MessageRule::new(
                r"(?i)account\s+(is\s+)?locked|locked\s+out",
                |_| {
                    ErrorInfo::new(
                        "ACCOUNT_LOCKED",
                        "Account Locked",
                        "The account is locked after repeated failed attempts",
                        "Your account has been temporarily locked. Please try again later or contact support.",
                        ErrorCategory::Auth,
                        false,
                    )
                    .with_support_text("Contact your administrator to unlock the account.")
                },
                "Account locked",
            ),
            MessageRule::new(
                r"(?i)network|failed\s+to\s+fetch|connection\s+(refused|reset|lost|failed|closed)|offline",
                |text| {
                    ErrorInfo::new(
                        "NETWORK_ERROR",
                        "Connection Problem",
                        text,
                        "Unable to reach the server. Check your internet connection and try again.",
                        ErrorCategory::Network,
                        true,
                    )
                    .with_action("Retry")
                },
                "Network or connection failure",
            ),
            MessageRule::new(
                r"(?i)time(d)?[\s\-]?out",
                |text| {
                    ErrorInfo::new(
                        "TIMEOUT",
                        "Request Timed Out",
                        text,
                        "The request took too long to complete. Please try again.",
                        ErrorCategory::Network,
                        true,
                    )
                    .with_action("Retry")
                },
                "Timeout",
            ),
        ]
    }

    /// Adds a rule after the existing ones.
    pub fn add_rule(&mut self, rule: MessageRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[MessageRule] {
        &self.rules
    }

    /// Looks up the descriptor for a transport status code.
    ///
    /// Unmapped codes produce an `unknown` descriptor that is retryable only
    /// for server-side (`>= 500`) statuses.
    pub fn from_status_code(&self, status: u16) -> ErrorInfo {
        match status {
            400 => ErrorInfo::new(
                "BAD_REQUEST",
                "Invalid Request",
                "The server could not process the request",
                "Some of the information provided is invalid. Please review and try again.",
                ErrorCategory::Validation,
                false,
            ),
            401 => ErrorInfo::new(
                "UNAUTHORIZED",
                "Authentication Required",
                "The request lacks valid authentication credentials",
                "Your session has expired. Please sign in again.",
                ErrorCategory::Auth,
                false,
            )
            .with_action("Sign in"),
            403 => ErrorInfo::new(
                "FORBIDDEN",
                "Access Denied",
                "The authenticated user is not allowed to perform this action",
                "You don't have permission to perform this action.",
                ErrorCategory::Permission,
                false,
            )
            .with_support_text("Ask an administrator to grant you access."),
            404 => ErrorInfo::new(
                "NOT_FOUND",
                "Not Found",
                "The requested resource does not exist",
                "We couldn't find what you were looking for.",
                ErrorCategory::Server,
                false,
            ),
            409 => ErrorInfo::new(
                "CONFLICT",
                "Conflict",
                "The request conflicts with the current state of the resource",
                "This item was changed by someone else. Refresh and try again.",
                ErrorCategory::Validation,
                false,
            )
            .with_action("Refresh"),
            422 => ErrorInfo::new(
                "VALIDATION_ERROR",
                "Validation Failed",
                "The request payload failed validation",
                "Please correct the highlighted fields and try again.",
                ErrorCategory::Validation,
                false,
            ),
            429 => ErrorInfo::new(
                "RATE_LIMITED",
                "Too Many Requests",
                "The rate limit for this operation was exceeded",
                "You're making requests too quickly. Please wait a moment and try again.",
                ErrorCategory::RateLimit,
                true,
            )
            .with_retry_after(RATE_LIMIT_RETRY_AFTER_SECS)
            .with_details([
                "Wait a minute before trying again",
                "Avoid refreshing the page repeatedly",
                "Bulk operations count against the same limit",
            ])
            .with_support_text("If this keeps happening, contact support with the time of the error."),
            500 => ErrorInfo::new(
                "INTERNAL_SERVER_ERROR",
                "Server Error",
                "The server encountered an unexpected condition",
                "Something went wrong on our end. Please try again shortly.",
                ErrorCategory::Server,
                true,
            ),
            502 => ErrorInfo::new(
                "BAD_GATEWAY",
                "Bad Gateway",
                "An upstream server returned an invalid response",
                "The service is temporarily unreachable. Please try again shortly.",
                ErrorCategory::Network,
                true,
            ),
            503 => ErrorInfo::new(
                "SERVICE_UNAVAILABLE",
                "Service Unavailable",
                "The server is temporarily unable to handle the request",
                "The service is temporarily unavailable. Please try again in a few minutes.",
                ErrorCategory::Server,
                true,
            ),
            504 => ErrorInfo::new(
                "GATEWAY_TIMEOUT",
                "Gateway Timeout",
                "An upstream server did not respond in time",
                "The server took too long to respond. Please try again.",
                ErrorCategory::Network,
                true,
            ),
            _ => ErrorInfo::new(
                format!("HTTP_{}", status),
                "Unexpected Response",
                format!("The server responded with status {}", status),
                "Something went wrong. Please try again.",
                ErrorCategory::Unknown,
                status >= 500,
            ),
        }
    }

    /// Classifies a free-form message.
    ///
    /// Checks, in order: an embedded transport status, then each message rule,
    /// then falls back to an `unknown` descriptor carrying the original text.
    pub fn from_message(&self, text: &str) -> ErrorInfo {
        if let Some(status) = self.extract_status(text) {
            return self.from_status_code(status);
        }

        for rule in &self.rules {
            if rule.matches(text) {
                return rule.descriptor(text);
            }
        }

        ErrorInfo::unknown(text)
    }

    /// Returns the status code embedded in a transport error message.
    pub fn extract_status(&self, text: &str) -> Option<u16> {
        self.embedded_status
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}
