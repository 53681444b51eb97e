//! Sliding-window rate limiting for outgoing actions.
//!
//! Each key keeps the instants of its admitted requests. Every call first
//! prunes instants older than the window, so state never grows past
//! `max_requests` entries per key. The limiter denies rather than failing:
//! callers check the boolean or the wait time before acting.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Source of the current instant. Injected so window expiry is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + offset
    }
}

/// A named request budget. Presets carry no behavior of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPreset {
    pub max_requests: usize,
    pub window: Duration,
}

impl RateLimitPreset {
    pub const fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

/// Sign-in and other authentication attempts: 5 per minute.
pub const AUTH: RateLimitPreset = RateLimitPreset::new(5, Duration::from_secs(60));
/// Password reset requests: 3 per hour.
pub const PASSWORD_RESET: RateLimitPreset = RateLimitPreset::new(3, Duration::from_secs(60 * 60));
/// Search queries: 30 per minute.
pub const SEARCH: RateLimitPreset = RateLimitPreset::new(30, Duration::from_secs(60));
/// Form submissions: 10 per minute.
pub const FORM_SUBMIT: RateLimitPreset = RateLimitPreset::new(10, Duration::from_secs(60));
/// Generic API calls: 100 per minute.
pub const API: RateLimitPreset = RateLimitPreset::new(100, Duration::from_secs(60));

/// Sliding-window admission control keyed by an arbitrary string.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    requests: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("keys", &self.lock().len())
            .finish()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Creates a limiter on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a limiter on a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admits the request and records it, or denies it without recording.
    pub fn can_make_request(&self, key: &str, max_requests: usize, window: Duration) -> bool {
        let now = self.clock.now();
        let mut requests = self.lock();
        let timestamps = requests.entry(key.to_string()).or_default();
        prune(timestamps, now, window);

        if timestamps.len() >= max_requests {
            tracing::debug!(key, max_requests, "rate limit reached");
            return false;
        }

        timestamps.push_back(now);
        true
    }

    /// Convenience form of [`RateLimiter::can_make_request`] for a preset.
    pub fn check(&self, key: &str, preset: RateLimitPreset) -> bool {
        self.can_make_request(key, preset.max_requests, preset.window)
    }

    /// How long until the next request for `key` would be admitted.
    ///
    /// Zero while under the limit.
    pub fn get_wait_time(&self, key: &str, max_requests: usize, window: Duration) -> Duration {
        let now = self.clock.now();
        let mut requests = self.lock();
        let timestamps = requests.entry(key.to_string()).or_default();
        prune(timestamps, now, window);

        if timestamps.len() < max_requests {
            return Duration::ZERO;
        }

        match timestamps.front() {
            Some(oldest) => window.saturating_sub(now.saturating_duration_since(*oldest)),
            None => Duration::ZERO,
        }
    }

    /// Requests still available in the current window.
    pub fn get_remaining_requests(&self, key: &str, max_requests: usize, window: Duration) -> usize {
        let now = self.clock.now();
        let mut requests = self.lock();
        let timestamps = requests.entry(key.to_string()).or_default();
        prune(timestamps, now, window);
        max_requests.saturating_sub(timestamps.len())
    }

    /// Forgets everything recorded for `key`.
    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Forgets every key.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Drops instants that fall outside the window ending at `now`.
fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.saturating_duration_since(*oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}
