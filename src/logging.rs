//! Diagnostic logging setup.
//!
//! Library code emits `tracing` events; this module installs the subscriber.
//! Output goes to stderr so the CLI's JSON on stdout stays parseable.
//! `RUST_LOG` overrides the configured level when set.

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{fmt, EnvFilter};

use crate::telemetry::logger::CONSOLE_TARGET;

/// Verbosity of diagnostic output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    /// Default for the CLI: only delivery problems and dropped entries.
    #[default]
    Warn,
    Error,
    Off,
}

impl LogLevel {
    fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

impl From<u8> for LogLevel {
    /// 0 = warn, 1 = info, 2 = debug, 3+ = trace
    fn from(verbosity: u8) -> Self {
        match verbosity {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub with_timestamps: bool,
    /// Include the event target (module path).
    pub with_target: bool,
    /// Always show development-mode mirrors of telemetry entries, whatever
    /// the level.
    pub show_console_mirror: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            with_timestamps: true,
            with_target: true,
            show_console_mirror: true,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.with_timestamps = enabled;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_console_mirror(mut self, enabled: bool) -> Self {
        self.show_console_mirror = enabled;
        self
    }

    /// Configuration for a `-v` count.
    pub fn from_verbosity(verbosity: u8) -> Self {
        Self::default().with_level(LogLevel::from(verbosity))
    }

    /// Filter directives for this configuration.
    ///
    /// Third-party crates stay at `warn` unless tracing everything.
    pub fn directives(&self) -> String {
        let level = self.level.as_directive();
        let mut directives = match self.level {
            LogLevel::Trace | LogLevel::Off => level.to_string(),
            _ => format!("warn,dashguard={}", level),
        };
        if self.show_console_mirror && self.level != LogLevel::Off {
            directives.push_str(&format!(",{}=trace", CONSOLE_TARGET));
        }
        directives
    }

    fn env_filter(&self) -> Result<EnvFilter, ParseError> {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return Ok(EnvFilter::from_default_env());
        }
        EnvFilter::try_new(self.directives())
    }
}

/// Installs the global subscriber.
///
/// Does nothing if a subscriber is already installed, so tests and
/// embedding applications can call it freely.
///
/// # Examples
///
/// ```no_run
/// use dashguard::logging::{init_logging, LogLevel, LoggingConfig};
///
/// init_logging(LoggingConfig::new().with_level(LogLevel::Debug));
/// ```
pub fn init_logging(config: LoggingConfig) {
    let env_filter = match config.env_filter() {
        Ok(filter) => filter,
        Err(err) => {
            eprintln!("Invalid log filter ({}), falling back to warn", err);
            EnvFilter::new("warn")
        }
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(config.with_target);

    // A second call finds a subscriber already set; that is fine.
    let _ = if config.with_timestamps {
        subscriber.try_init()
    } else {
        subscriber.without_time().try_init()
    };
}
