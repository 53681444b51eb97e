//! Error classification and normalization module
//!
//! This module turns heterogeneous error values into canonical descriptors.
//! The classifier owns the status-code and message tables; the normalizer
//! dispatches on the input shape and computes severity.

pub mod classification;
pub mod classifier;
pub mod normalizer;

// Re-export main types for convenient access
pub use classification::{ErrorCategory, ErrorInfo, ParsedError, Severity, DEFAULT_ERROR_MESSAGE};
pub use classifier::{ErrorClassifier, MessageRule, RATE_LIMIT_RETRY_AFTER_SECS};
pub use normalizer::{
    determine_severity, normalize_api_error, normalize_response, ApiError, ErrorNormalizer,
    RawError,
};
