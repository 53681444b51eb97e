//! dashguard - error handling and resilience for admin dashboards
//!
//! - [`error`]: classifies HTTP statuses, messages and error payloads into a
//!   fixed taxonomy of categories and severities.
//! - [`telemetry`]: a bounded error log that ships entries to a remote sink,
//!   retrying failed deliveries from a bounded queue.
//! - [`rate_limit`]: sliding-window admission control keyed by string.
//! - [`config`] and [`logging`]: file configuration and diagnostic output.

pub mod config;
pub mod error;
pub mod logging;
pub mod rate_limit;
pub mod telemetry;
