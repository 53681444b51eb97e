//! The telemetry logger.
//!
//! `log()` is synchronous: it records the entry and hands delivery to a
//! detached tokio task. Entries the sink does not acknowledge go to a bounded
//! retry queue, which is drained serially with a pause between deliveries.
//! A failed redelivery stops the pass and puts the entry back at the head.

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::{
    user_id_from_auth_blob, KeyValueStore, MemoryStore, ProcessContext, RuntimeContext,
    AUTH_STORAGE_KEY, SESSION_ID_KEY,
};
use super::entry::{EntryLevel, ErrorLogEntry, LogStatistics, PerformanceSnapshot};
use super::sink::{DeliveryError, HttpSink, MemorySink, TelemetrySink};
use super::{TelemetryConfig, TelemetryResult};
use crate::error::{ErrorCategory, ErrorNormalizer, ParsedError, RawError, Severity};

/// Tracing target used to mirror entries in development mode.
pub const CONSOLE_TARGET: &str = "dashguard::console";

const UNKNOWN_USER_AGENT: &str = "unknown";
const UNKNOWN_URL: &str = "unknown";

/// Result of a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another pass was already running.
    Skipped,
    /// The retry queue was emptied.
    Completed,
    /// A redelivery failed; the entry is back at the head of the queue.
    Stalled,
    /// The logger was shut down during the pass.
    Cancelled,
}

#[derive(Debug, Default)]
struct LoggerState {
    logs: VecDeque<ErrorLogEntry>,
    retry_queue: VecDeque<ErrorLogEntry>,
    is_draining: bool,
    backoff_scheduled: bool,
    /// Step of the running backoff schedule; a successful delivery resets it.
    backoff_attempt: u32,
}

struct Inner {
    config: TelemetryConfig,
    sink: Arc<dyn TelemetrySink>,
    store: Arc<dyn KeyValueStore>,
    runtime: Arc<dyn RuntimeContext>,
    normalizer: ErrorNormalizer,
    state: Mutex<LoggerState>,
    started: Instant,
    shutdown: CancellationToken,
}

impl Inner {
    // The lock is never held across an await, so a poisoned guard still
    // protects consistent data.
    fn state(&self) -> MutexGuard<'_, LoggerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_store(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(err) => {
                debug!(key, error = %err, "Context store read failed");
                None
            }
        }
    }

    fn build_entry(&self, error: ParsedError, context: Option<Map<String, Value>>) -> ErrorLogEntry {
        let user_id = self
            .read_store(AUTH_STORAGE_KEY)
            .and_then(|blob| user_id_from_auth_blob(&blob));
        let session_id = self.read_store(SESSION_ID_KEY);
        let performance = PerformanceSnapshot {
            memory_bytes: self.runtime.memory_usage(),
            uptime_ms: self.started.elapsed().as_millis() as u64,
        };

        ErrorLogEntry {
            timestamp: Utc::now(),
            error,
            user_agent: self
                .runtime
                .user_agent()
                .unwrap_or_else(|| UNKNOWN_USER_AGENT.to_string()),
            url: self
                .runtime
                .current_url()
                .unwrap_or_else(|| UNKNOWN_URL.to_string()),
            user_id,
            session_id,
            additional_context: context.filter(|c| !c.is_empty()),
            performance: Some(performance),
        }
    }

    fn record(&self, entry: ErrorLogEntry) {
        let mut state = self.state();
        state.logs.push_back(entry);
        while state.logs.len() > self.config.max_logs {
            state.logs.pop_front();
        }
    }

    fn enqueue_retry(&self, entry: ErrorLogEntry) {
        let mut state = self.state();
        state.retry_queue.push_back(entry);
        while state.retry_queue.len() > self.config.max_retry {
            if let Some(dropped) = state.retry_queue.pop_front() {
                warn!(code = %dropped.error.code, "Retry queue full, dropping oldest entry");
            }
        }
    }

    fn requeue_front(&self, entry: ErrorLogEntry) {
        let mut state = self.state();
        if state.retry_queue.len() >= self.config.max_retry {
            warn!(code = %entry.error.code, "Retry queue full, dropping oldest entry");
            return;
        }
        state.retry_queue.push_front(entry);
    }

    fn pop_retry(&self) -> Option<ErrorLogEntry> {
        self.state().retry_queue.pop_front()
    }

    fn pending_retries(&self) -> usize {
        self.state().retry_queue.len()
    }

    fn reset_backoff(&self) {
        self.state().backoff_attempt = 1;
    }
}

/// Clears `is_draining` when a pass ends, even if its future is dropped.
struct DrainGuard<'a> {
    inner: &'a Inner,
}

impl<'a> DrainGuard<'a> {
    fn acquire(inner: &'a Inner) -> Option<Self> {
        let mut state = inner.state();
        if state.is_draining {
            return None;
        }
        state.is_draining = true;
        Some(Self { inner })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.inner.state().is_draining = false;
    }
}

/// Bounded error event log with resilient delivery.
///
/// Cloning is cheap; clones share the same buffer, queue and sink.
///
/// # Example
///
/// ```no_run
/// use dashguard::error::{ErrorCategory, ParsedError, Severity};
/// use dashguard::telemetry::{TelemetryConfig, TelemetryLogger};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TelemetryConfig::new().with_endpoint("https://telemetry.example.com/errors");
/// let logger = TelemetryLogger::from_config(config)?;
///
/// logger.log(
///     ParsedError::new("TIMEOUT", "Request timed out", ErrorCategory::Network, Severity::High),
///     None,
/// );
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TelemetryLogger {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TelemetryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("TelemetryLogger")
            .field("sink", &self.inner.sink.name())
            .field("logs", &state.logs.len())
            .field("retry_queue", &state.retry_queue.len())
            .field("is_draining", &state.is_draining)
            .finish()
    }
}

impl TelemetryLogger {
    /// Starts building a logger that delivers to `sink`.
    pub fn builder(sink: Arc<dyn TelemetrySink>) -> TelemetryLoggerBuilder {
        TelemetryLoggerBuilder::new(sink)
    }

    /// Builds a logger from configuration alone.
    ///
    /// Uses an [`HttpSink`] when an endpoint is configured and a
    /// [`MemorySink`] otherwise.
    pub fn from_config(config: TelemetryConfig) -> Result<Self, DeliveryError> {
        let sink: Arc<dyn TelemetrySink> = match config.endpoint.as_deref() {
            Some(endpoint) => Arc::new(HttpSink::new(endpoint)?),
            None => Arc::new(MemorySink::new()),
        };
        Ok(Self::builder(sink).config(config).build())
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.inner.config
    }

    // =========================================================================
    // Logging
    // =========================================================================

    /// Records `error` and starts delivering it in the background.
    ///
    /// Never blocks and never fails. Without a tokio runtime, or after
    /// [`shutdown`](Self::shutdown), the entry goes straight to the retry queue.
    pub fn log(&self, error: ParsedError, context: Option<Map<String, Value>>) {
        let entry = self.inner.build_entry(error, context);
        if self.inner.config.development {
            mirror_to_console(&entry);
        }
        self.inner.record(entry.clone());
        self.dispatch(entry);
    }

    /// Normalizes any error value and logs it.
    pub fn log_raw(&self, input: impl Into<RawError>, context: Option<Map<String, Value>>) {
        let parsed = self.inner.normalizer.parse_api_error(&input.into());
        self.log(parsed, context);
    }

    /// Logs an informational message.
    pub fn info(&self, message: impl Into<String>, context: Option<Map<String, Value>>) {
        let parsed = ParsedError::new("LOG_INFO", message, ErrorCategory::Unknown, Severity::Low);
        self.log(parsed, context);
    }

    /// Logs a warning.
    pub fn warning(&self, message: impl Into<String>, context: Option<Map<String, Value>>) {
        let parsed =
            ParsedError::new("LOG_WARNING", message, ErrorCategory::Unknown, Severity::Medium);
        self.log(parsed, context);
    }

    /// Logs an error message, optionally with the error that caused it.
    ///
    /// The attached error supplies code, category and status; its own message
    /// moves to the front of `details`. Severity is at least `high`.
    pub fn error(
        &self,
        message: impl Into<String>,
        attached: Option<RawError>,
        context: Option<Map<String, Value>>,
    ) {
        let message = message.into();
        let parsed = match attached {
            Some(raw) => {
                let mut parsed = self.inner.normalizer.parse_api_error(&raw);
                parsed.severity = parsed.severity.max(Severity::High);
                if !message.trim().is_empty() && parsed.message != message {
                    let cause = std::mem::replace(&mut parsed.message, message);
                    parsed.details.retain(|d| d != &cause);
                    parsed.details.insert(0, cause);
                }
                parsed
            }
            None => ParsedError::new("LOG_ERROR", message, ErrorCategory::Unknown, Severity::High),
        };
        self.log(parsed, context);
    }

    fn dispatch(&self, entry: ErrorLogEntry) {
        if self.inner.shutdown.is_cancelled() {
            self.inner.enqueue_retry(entry);
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                let logger = self.clone();
                handle.spawn(async move {
                    logger.deliver(entry).await;
                });
            }
            Err(_) => {
                debug!(code = %entry.error.code, "No async runtime, queueing entry for retry");
                self.inner.enqueue_retry(entry);
            }
        }
    }

    async fn deliver(&self, entry: ErrorLogEntry) {
        match self.attempt(&entry).await {
            Ok(()) => {
                self.inner.reset_backoff();
                if self.inner.pending_retries() > 0 {
                    self.drain_and_schedule().await;
                }
            }
            Err(err) => {
                warn!(
                    code = %entry.error.code,
                    sink = self.inner.sink.name(),
                    error = %err,
                    "Telemetry delivery failed, queueing for retry"
                );
                self.inner.enqueue_retry(entry);
                self.drain_and_schedule().await;
            }
        }
    }

    /// One delivery attempt, bounded by the configured timeout.
    async fn attempt(&self, entry: &ErrorLogEntry) -> Result<(), DeliveryError> {
        let token = self.inner.shutdown.child_token();
        let timeout = self.inner.config.delivery_timeout();

        let result = tokio::select! {
            result = self.inner.sink.send(entry, token.clone()) => result,
            _ = tokio::time::sleep(timeout) => Err(DeliveryError::Timeout(timeout)),
            _ = self.inner.shutdown.cancelled() => Err(DeliveryError::Cancelled),
        };

        token.cancel();
        result
    }

    // =========================================================================
    // Draining
    // =========================================================================

    /// Runs one drain pass in-line.
    ///
    /// Returns [`DrainOutcome::Skipped`] if a pass is already running.
    pub async fn drain(&self) -> DrainOutcome {
        let Some(_guard) = DrainGuard::acquire(&self.inner) else {
            return DrainOutcome::Skipped;
        };
        self.drain_pass().await
    }

    async fn drain_pass(&self) -> DrainOutcome {
        let mut delivered = 0usize;

        loop {
            if self.inner.shutdown.is_cancelled() {
                return DrainOutcome::Cancelled;
            }

            let Some(entry) = self.inner.pop_retry() else {
                break;
            };

            if let Err(err) = self.attempt(&entry).await {
                debug!(code = %entry.error.code, error = %err, "Redelivery failed, stopping drain");
                self.inner.requeue_front(entry);
                return match err {
                    DeliveryError::Cancelled => DrainOutcome::Cancelled,
                    _ => DrainOutcome::Stalled,
                };
            }

            delivered += 1;
            self.inner.reset_backoff();
            if self.inner.pending_retries() == 0 {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.inner.config.drain_interval()) => {}
                _ = self.inner.shutdown.cancelled() => return DrainOutcome::Cancelled,
            }
        }

        if delivered > 0 {
            info!(delivered, "Retry queue drained");
        }
        DrainOutcome::Completed
    }

    async fn drain_and_schedule(&self) {
        if self.drain().await == DrainOutcome::Stalled {
            self.schedule_backoff();
        }
    }

    /// Schedules follow-up drains after a stalled pass.
    ///
    /// At most one schedule runs at a time. Each stalled pass moves to the
    /// next delay and any successful delivery moves back to the first one.
    /// The schedule ends when the queue empties, the attempts are used up, or
    /// the logger shuts down.
    fn schedule_backoff(&self) {
        let Some(strategy) = self.inner.config.retry_strategy() else {
            return;
        };
        let Ok(handle) = Handle::try_current() else {
            return;
        };

        {
            let mut state = self.inner.state();
            if state.backoff_scheduled {
                return;
            }
            state.backoff_scheduled = true;
            state.backoff_attempt = 1;
        }

        let logger = self.clone();
        handle.spawn(async move {
            let mut attempt = logger.inner.state().backoff_attempt;
            while strategy.allows(attempt) {
                let delay = strategy.calculate_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Scheduled retry drain");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = logger.inner.shutdown.cancelled() => break,
                }

                let outcome = logger.drain().await;
                let mut state = logger.inner.state();
                match outcome {
                    DrainOutcome::Completed | DrainOutcome::Cancelled => break,
                    DrainOutcome::Stalled => state.backoff_attempt += 1,
                    // Another pass holds the guard; check again after the same delay.
                    DrainOutcome::Skipped => {}
                }
                attempt = state.backoff_attempt;
            }

            if !strategy.allows(attempt) {
                warn!(
                    pending = logger.inner.pending_retries(),
                    "Scheduled retry drains exhausted, waiting for next log call"
                );
            }
            logger.inner.state().backoff_scheduled = false;
        });
    }

    /// Cancels in-flight deliveries and scheduled drains.
    ///
    /// Entries logged afterwards are kept in the retry queue.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// All buffered entries, oldest first.
    pub fn get_logs(&self) -> Vec<ErrorLogEntry> {
        self.inner.state().logs.iter().cloned().collect()
    }

    /// The last `count` entries, oldest first.
    pub fn get_recent_logs(&self, count: usize) -> Vec<ErrorLogEntry> {
        let state = self.inner.state();
        let skip = state.logs.len().saturating_sub(count);
        state.logs.iter().skip(skip).cloned().collect()
    }

    pub fn get_logs_by_code(&self, code: &str) -> Vec<ErrorLogEntry> {
        self.inner
            .state()
            .logs
            .iter()
            .filter(|entry| entry.error.code == code)
            .cloned()
            .collect()
    }

    /// Entries shown at the given presentation level.
    pub fn get_logs_by_severity(&self, level: EntryLevel) -> Vec<ErrorLogEntry> {
        self.inner
            .state()
            .logs
            .iter()
            .filter(|entry| level.includes(entry.error.severity))
            .cloned()
            .collect()
    }

    pub fn get_statistics(&self) -> LogStatistics {
        let state = self.inner.state();
        let cutoff = Utc::now() - chrono::Duration::hours(1);

        let mut by_code: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<Severity, usize> = HashMap::new();
        let mut last_hour = 0;

        for entry in &state.logs {
            *by_code.entry(entry.error.code.clone()).or_default() += 1;
            *by_severity.entry(entry.error.severity).or_default() += 1;
            if entry.timestamp >= cutoff {
                last_hour += 1;
            }
        }

        LogStatistics {
            total: state.logs.len(),
            by_code,
            by_severity,
            last_hour,
        }
    }

    // =========================================================================
    // Management
    // =========================================================================

    /// Empties the event buffer. The retry queue is left alone.
    pub fn clear_logs(&self) {
        self.inner.state().logs.clear();
    }

    /// The event buffer as pretty-printed JSON.
    pub fn export_logs(&self) -> String {
        let logs = self.get_logs();
        serde_json::to_string_pretty(&logs).unwrap_or_else(|err| {
            warn!(error = %err, "Failed to serialize logs for export");
            "[]".to_string()
        })
    }

    /// Writes the export to `error-logs-<timestamp>.json` under `dir`.
    ///
    /// The file is written to a temporary path and renamed into place.
    pub fn download_logs(&self, dir: &Path) -> TelemetryResult<PathBuf> {
        fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(&self.get_logs())?;
        let file_name = format!("error-logs-{}.json", Utc::now().format("%Y%m%dT%H%M%SZ"));
        let path = dir.join(file_name);
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;

        info!(path = %path.display(), "Exported error logs");
        Ok(path)
    }

    // =========================================================================
    // Retry queue
    // =========================================================================

    /// Snapshot of the retry queue, head first.
    pub fn retry_queue(&self) -> Vec<ErrorLogEntry> {
        self.inner.state().retry_queue.iter().cloned().collect()
    }

    pub fn pending_retries(&self) -> usize {
        self.inner.pending_retries()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.state().is_draining
    }
}

fn mirror_to_console(entry: &ErrorLogEntry) {
    let error = &entry.error;
    match entry.level() {
        EntryLevel::Info => info!(
            target: CONSOLE_TARGET,
            code = %error.code,
            category = %error.category,
            url = %entry.url,
            "{}",
            error.message
        ),
        EntryLevel::Warning => warn!(
            target: CONSOLE_TARGET,
            code = %error.code,
            category = %error.category,
            url = %entry.url,
            "{}",
            error.message
        ),
        EntryLevel::Error => tracing::error!(
            target: CONSOLE_TARGET,
            code = %error.code,
            category = %error.category,
            severity = %error.severity,
            url = %entry.url,
            details = ?error.details,
            "{}",
            error.message
        ),
    }
}

/// Builder for [`TelemetryLogger`].
pub struct TelemetryLoggerBuilder {
    sink: Arc<dyn TelemetrySink>,
    config: TelemetryConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    runtime: Option<Arc<dyn RuntimeContext>>,
    normalizer: Option<ErrorNormalizer>,
}

impl TelemetryLoggerBuilder {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            sink,
            config: TelemetryConfig::default(),
            store: None,
            runtime: None,
            normalizer: None,
        }
    }

    pub fn config(mut self, config: TelemetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Store holding the persisted auth blob and session id.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn runtime_context(mut self, runtime: Arc<dyn RuntimeContext>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn normalizer(mut self, normalizer: ErrorNormalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn build(self) -> TelemetryLogger {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);
        let runtime = self.runtime.unwrap_or_else(|| {
            Arc::new(ProcessContext::new(self.config.app_url.clone())) as Arc<dyn RuntimeContext>
        });

        TelemetryLogger {
            inner: Arc::new(Inner {
                sink: self.sink,
                store,
                runtime,
                normalizer: self.normalizer.unwrap_or_default(),
                state: Mutex::new(LoggerState::default()),
                started: Instant::now(),
                shutdown: CancellationToken::new(),
                config: self.config,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::telemetry::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedContext;

    impl RuntimeContext for FixedContext {
        fn user_agent(&self) -> Option<String> {
            Some("test-agent".to_string())
        }

        fn current_url(&self) -> Option<String> {
            Some("https://admin.example.com/users".to_string())
        }

        fn memory_usage(&self) -> Option<u64> {
            Some(1024)
        }
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("quota exceeded".to_string()))
        }
    }

    /// Never answers until the attempt is cancelled.
    #[derive(Default)]
    struct HangingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl TelemetrySink for HangingSink {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn send(
            &self,
            _entry: &ErrorLogEntry,
            cancel: CancellationToken,
        ) -> Result<(), DeliveryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            cancel.cancelled().await;
            Err(DeliveryError::Cancelled)
        }
    }

    /// Follows a fixed script of outcomes, then succeeds forever.
    struct ScriptedSink {
        script: Mutex<VecDeque<bool>>,
        attempts: AtomicUsize,
    }

    impl ScriptedSink {
        fn new(script: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                attempts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TelemetrySink for ScriptedSink {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(
            &self,
            _entry: &ErrorLogEntry,
            _cancel: CancellationToken,
        ) -> Result<(), DeliveryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
            if ok {
                Ok(())
            } else {
                Err(DeliveryError::Rejected(503))
            }
        }
    }

    /// Counts events emitted on the console mirror target.
    struct ConsoleCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ConsoleCounter {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if event.metadata().target() == CONSOLE_TARGET {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn console_events(development: bool) -> usize {
        use tracing_subscriber::layer::SubscriberExt;

        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(ConsoleCounter(count.clone()));
        let logger = logger_with(
            Arc::new(MemorySink::new()),
            quiet_config().with_development(development),
        );

        tracing::subscriber::with_default(subscriber, || {
            logger.info("opened", None);
            logger.warning("slow", None);
            logger.error("failed", None, None);
        });
        count.load(Ordering::SeqCst)
    }

    fn quiet_config() -> TelemetryConfig {
        TelemetryConfig::default().without_backoff()
    }

    fn logger_with(sink: Arc<dyn TelemetrySink>, config: TelemetryConfig) -> TelemetryLogger {
        TelemetryLogger::builder(sink)
            .config(config)
            .runtime_context(Arc::new(FixedContext))
            .build()
    }

    fn event(i: usize) -> ParsedError {
        ParsedError::new(
            format!("E{}", i),
            format!("event {}", i),
            ErrorCategory::Server,
            Severity::High,
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_keeps_most_recent_entries() {
        let sink = Arc::new(MemorySink::new());
        let logger = logger_with(sink.clone(), quiet_config());

        for i in 0..150 {
            logger.log(event(i), None);
        }

        let logs = logger.get_logs();
        assert_eq!(logs.len(), 100);
        assert_eq!(logs.first().unwrap().error.message, "event 50");
        assert_eq!(logs.last().unwrap().error.message, "event 149");

        settle().await;
        assert_eq!(sink.delivered().len(), 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_queue_caps_and_drops_oldest() {
        let sink = Arc::new(MemorySink::failing());
        let logger = logger_with(sink.clone(), quiet_config());

        for i in 0..60 {
            logger.log(event(i), None);
        }
        settle().await;

        let queue = logger.retry_queue();
        assert_eq!(queue.len(), 50);
        assert_eq!(queue.first().unwrap().error.message, "event 10");
        assert_eq!(queue.last().unwrap().error.message, "event 59");
        assert!(!logger.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_log_drains_queue() {
        let sink = Arc::new(MemorySink::failing());
        let logger = logger_with(sink.clone(), quiet_config());

        logger.log(event(1), None);
        settle().await;
        assert_eq!(logger.pending_retries(), 1);

        sink.set_failing(false);
        logger.log(event(2), None);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(logger.pending_retries(), 0);
        let codes: Vec<_> = sink.delivered().into_iter().map(|e| e.error.code).collect();
        assert_eq!(codes, vec!["E2", "E1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_drain_recovers_without_new_logs() {
        let sink = Arc::new(MemorySink::failing());
        let logger = logger_with(sink.clone(), TelemetryConfig::default());

        logger.log(event(1), None);
        settle().await;
        assert_eq!(logger.pending_retries(), 1);

        sink.set_failing(false);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(logger.pending_retries(), 0);
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_drains_stop_after_budget() {
        let sink = Arc::new(MemorySink::failing());
        let config = TelemetryConfig::default().with_backoff(
            Duration::from_secs(1),
            Duration::from_secs(60),
            2,
        );
        let logger = logger_with(sink.clone(), config);

        logger.log(event(1), None);
        tokio::time::sleep(Duration::from_secs(120)).await;

        // Initial attempt, the drain it triggers, and two scheduled drains.
        assert_eq!(sink.attempts(), 4);
        assert_eq!(logger.pending_retries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_restarts_backoff_schedule() {
        // Fails the first entry three times, accepts the second entry, then
        // fails twice more before recovering.
        let sink = ScriptedSink::new(&[false, false, false, true, false, false]);
        let config = TelemetryConfig::default().with_backoff(
            Duration::from_secs(1),
            Duration::from_secs(60),
            2,
        );
        let logger = logger_with(sink.clone(), config);

        logger.log(event(1), None);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);

        // Delivered directly, so the running schedule starts over.
        logger.log(event(2), None);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(logger.pending_retries(), 0);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_paces_deliveries() {
        let sink = Arc::new(MemorySink::failing());
        let logger = logger_with(sink.clone(), quiet_config());

        for i in 0..3 {
            logger.log(event(i), None);
        }
        settle().await;
        assert_eq!(logger.pending_retries(), 3);

        sink.set_failing(false);
        let start = tokio::time::Instant::now();
        assert_eq!(logger.drain().await, DrainOutcome::Completed);

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
        let messages: Vec<_> = sink.delivered().into_iter().map(|e| e.error.message).collect();
        assert_eq!(messages, vec!["event 0", "event 1", "event 2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_stops_on_first_failure() {
        let sink = Arc::new(MemorySink::failing());
        let logger = logger_with(sink.clone(), quiet_config());

        for i in 0..3 {
            logger.log(event(i), None);
        }
        settle().await;

        assert_eq!(logger.drain().await, DrainOutcome::Stalled);
        let queue = logger.retry_queue();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue[0].error.message, "event 0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_timeout_queues_entry() {
        let sink = Arc::new(HangingSink::default());
        let logger = logger_with(sink.clone(), quiet_config());

        logger.log(event(1), None);

        // First attempt times out at 5s, the drain's retry at 10s.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(logger.pending_retries(), 1);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_keeps_new_entries_queued() {
        let sink = Arc::new(MemorySink::new());
        let logger = logger_with(sink.clone(), quiet_config());

        logger.shutdown();
        assert!(logger.is_shutdown());
        logger.log(event(1), None);

        assert_eq!(logger.pending_retries(), 1);
        assert_eq!(logger.drain().await, DrainOutcome::Cancelled);
        settle().await;
        assert!(sink.delivered().is_empty());
    }

    #[test]
    fn test_log_without_runtime_queues_entry() {
        let sink = Arc::new(MemorySink::new());
        let logger = logger_with(sink.clone(), quiet_config());

        logger.log(event(1), None);

        assert_eq!(logger.get_logs().len(), 1);
        assert_eq!(logger.pending_retries(), 1);
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_severity_filter_and_statistics() {
        let logger = logger_with(Arc::new(MemorySink::new()), quiet_config());

        logger.info("started", None);
        logger.warning("slow response", None);
        logger.log(ParsedError::new("FORBIDDEN", "no", ErrorCategory::Permission, Severity::Critical), None);
        logger.log(ParsedError::new("BAD_REQUEST", "bad", ErrorCategory::Validation, Severity::High), None);

        let errors = logger.get_logs_by_severity(EntryLevel::Error);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.error.severity >= Severity::High));
        assert_eq!(logger.get_logs_by_severity(EntryLevel::Info).len(), 1);
        assert_eq!(logger.get_logs_by_severity(EntryLevel::Warning).len(), 1);
        assert_eq!(logger.get_logs_by_code("FORBIDDEN").len(), 1);

        let stats = logger.get_statistics();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.last_hour, 4);
        assert_eq!(stats.by_code.get("LOG_INFO"), Some(&1));
        assert_eq!(stats.by_severity.get(&Severity::Critical), Some(&1));
        assert_eq!(stats.by_severity.get(&Severity::Low), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_logs_keep_order() {
        let logger = logger_with(Arc::new(MemorySink::new()), quiet_config());

        logger.info("one", None);
        logger.info("two", None);
        logger.info("three", None);
        logger.error(
            "Saving user failed",
            Some(RawError::Api(ApiError::new(500, "database unavailable"))),
            None,
        );

        let levels: Vec<_> = logger.get_recent_logs(4).iter().map(|e| e.level()).collect();
        assert_eq!(
            levels,
            vec![EntryLevel::Info, EntryLevel::Info, EntryLevel::Info, EntryLevel::Error]
        );

        let last = logger.get_recent_logs(1).remove(0);
        assert_eq!(last.error.message, "Saving user failed");
        assert_eq!(last.error.details.first().map(String::as_str), Some("database unavailable"));
        assert_eq!(last.error.status_code, Some(500));
        assert_eq!(logger.get_recent_logs(10).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_raises_severity_to_high() {
        let logger = logger_with(Arc::new(MemorySink::new()), quiet_config());

        logger.error("Too fast", Some(RawError::Api(ApiError::new(429, "slow down"))), None);
        logger.error("Plain failure", None, None);

        let logs = logger.get_logs();
        assert_eq!(logs[0].error.code, "RATE_LIMITED");
        assert_eq!(logs[0].error.severity, Severity::High);
        assert_eq!(logs[1].error.code, "LOG_ERROR");
        assert_eq!(logs[1].level(), EntryLevel::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_raw_normalizes_input() {
        let logger = logger_with(Arc::new(MemorySink::new()), quiet_config());

        logger.log_raw("Network error: connection reset", None);
        logger.log_raw(serde_json::json!({"status": 503}), None);

        let logs = logger.get_logs();
        assert_eq!(logs[0].error.category, ErrorCategory::Network);
        assert_eq!(logs[1].error.code, "SERVICE_UNAVAILABLE");
        assert_eq!(logs[1].error.severity, Severity::Critical);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_enrichment() {
        let store = Arc::new(MemoryStore::new());
        store.set(AUTH_STORAGE_KEY, r#"{"state":{"user":{"id":"u-42"}}}"#);
        store.set(SESSION_ID_KEY, "s-7");

        let logger = TelemetryLogger::builder(Arc::new(MemorySink::new()))
            .config(quiet_config())
            .store(store.clone())
            .runtime_context(Arc::new(FixedContext))
            .build();

        let mut context = Map::new();
        context.insert("page".to_string(), Value::from("users"));
        logger.info("opened", Some(context));
        logger.info("no context", Some(Map::new()));

        let logs = logger.get_logs();
        let entry = &logs[0];
        assert_eq!(entry.user_id.as_deref(), Some("u-42"));
        assert_eq!(entry.session_id.as_deref(), Some("s-7"));
        assert_eq!(entry.user_agent, "test-agent");
        assert_eq!(entry.url, "https://admin.example.com/users");
        assert_eq!(entry.performance.as_ref().unwrap().memory_bytes, Some(1024));
        assert_eq!(entry.additional_context.as_ref().unwrap()["page"], "users");
        assert!(logs[1].additional_context.is_none());

        store.set(AUTH_STORAGE_KEY, "{not json");
        logger.info("malformed", None);
        assert!(logger.get_recent_logs(1)[0].user_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_store_still_logs() {
        let logger = TelemetryLogger::builder(Arc::new(MemorySink::new()))
            .config(quiet_config())
            .store(Arc::new(BrokenStore))
            .runtime_context(Arc::new(FixedContext))
            .build();

        logger.info("still here", None);

        let logs = logger.get_logs();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].user_id.is_none());
        assert!(logs[0].session_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_and_export() {
        let logger = logger_with(Arc::new(MemorySink::new()), quiet_config());
        assert_eq!(logger.export_logs(), "[]");

        logger.info("exported", None);
        let exported: Vec<ErrorLogEntry> = serde_json::from_str(&logger.export_logs()).unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].error.message, "exported");

        logger.clear_logs();
        assert!(logger.get_logs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_logs_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger_with(Arc::new(MemorySink::new()), quiet_config());
        logger.warning("to disk", None);

        let path = logger.download_logs(&dir.path().join("exports")).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("error-logs-"));
        assert!(name.ends_with(".json"));
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("to disk"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_console_mirror_only_in_development() {
        assert_eq!(console_events(true), 3);
        assert_eq!(console_events(false), 0);
    }

    #[test]
    fn test_from_config_picks_sink() {
        let logger = TelemetryLogger::from_config(TelemetryConfig::default()).unwrap();
        assert!(format!("{:?}", logger).contains("memory"));

        let logger = TelemetryLogger::from_config(
            TelemetryConfig::default().with_endpoint("http://127.0.0.1:9/ingest"),
        )
        .unwrap();
        assert!(format!("{:?}", logger).contains("http"));
    }
}
