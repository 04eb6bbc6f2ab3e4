use armada_remote::ApplyConfig;
use std::time::Duration;

/// How often and how patiently a chart update is retried after an
/// optimistic-concurrency conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; 0 means no limit.
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ApplyConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ApplyConfig) -> Self {
        Self {
            max_attempts: config.conflict_max_attempts,
            backoff: Duration::from_millis(config.conflict_backoff_ms),
            max_backoff: Duration::from_millis(config.conflict_backoff_max_ms),
        }
    }

    /// Retry immediately, forever.
    pub fn immediate() -> Self {
        Self {
            max_attempts: 0,
            backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn unbounded(&self) -> bool {
        self.max_attempts == 0
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn allows_retry(&self, attempt: u32) -> bool {
        self.unbounded() || attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt`: doubles from `backoff`
    /// and saturates at `max_backoff`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unbounded_with_backoff() {
        let policy = RetryPolicy::default();
        assert!(policy.unbounded());
        assert!(policy.allows_retry(10_000));
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(50), Duration::from_millis(5000));
    }

    #[test]
    fn bounded_policy_stops() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::immediate()
        };
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert_eq!(policy.delay(2), Duration::ZERO);
    }
}
