//! Exponential schedule for follow-up retry drains.
//!
//! After a drain pass stops on a failed redelivery, the logger waits
//! `base_delay * 2^(attempt - 1)` (capped at `max_delay`) before trying
//! again, for at most `max_attempts` consecutive passes.

use std::time::Duration;

/// Configuration for scheduled drains with exponential backoff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryStrategy {
    /// Delay before the first scheduled drain.
    pub base_delay: Duration,
    /// Maximum delay cap for any scheduled drain.
    pub max_delay: Duration,
    /// Maximum number of consecutive scheduled drains.
    pub max_attempts: u32,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryStrategy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Delay before the given attempt (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.base_delay.min(self.max_delay);
        }

        let exponent = (attempt - 1).min(31); // Prevent overflow
        let multiplier = 1u64 << exponent;
        let base_millis = self.base_delay.as_millis() as u64;
        let delay_millis = base_millis.saturating_mul(multiplier);

        Duration::from_millis(delay_millis.min(self.max_delay.as_millis() as u64))
    }

    /// Whether the given attempt (1-based) is still within budget.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays() {
        let strategy = RetryStrategy::default();
        assert_eq!(strategy.calculate_delay(1), Duration::from_secs(1));
        assert_eq!(strategy.calculate_delay(2), Duration::from_secs(2));
        assert_eq!(strategy.calculate_delay(3), Duration::from_secs(4));
        assert_eq!(strategy.calculate_delay(4), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_capped() {
        let strategy = RetryStrategy::new(Duration::from_secs(10), Duration::from_secs(30), 10);
        assert_eq!(strategy.calculate_delay(3), Duration::from_secs(30));
        assert_eq!(strategy.calculate_delay(100), Duration::from_secs(30));
    }

    #[test]
    fn test_attempt_zero_uses_base() {
        let strategy = RetryStrategy::default();
        assert_eq!(strategy.calculate_delay(0), Duration::from_secs(1));
    }

    #[test]
    fn test_allows_respects_budget() {
        let strategy = RetryStrategy::new(Duration::from_secs(1), Duration::from_secs(60), 2);
        assert!(!strategy.allows(0));
        assert!(strategy.allows(1));
        assert!(strategy.allows(2));
        assert!(!strategy.allows(3));
    }
}
