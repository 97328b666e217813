//! Timeout and retry settings shared by the collaborator clients.

use std::time::Duration;

use briefwise_shared::{LlmConfig, ResearchConfig};

/// How often and how patiently a client retries one logical call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1).
    pub max_attempts: u32,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Base of the exponential backoff used after rate limiting.
    pub backoff_base: Duration,
    /// Flat delay used after other retryable failures.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// `backoff_base * 2^attempt`, with `attempt` counted from 0.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Whether `attempt` (from 0) is the final one.
    pub fn is_last(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_attempts.max(1)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl From<&LlmConfig> for RetryPolicy {
    fn from(config: &LlmConfig) -> Self {
        let backoff_base = Duration::from_millis(config.backoff_base_ms);
        Self {
            max_attempts: config.max_attempts,
            timeout: Duration::from_secs(config.timeout_secs),
            backoff_base,
            retry_delay: backoff_base,
        }
    }
}

impl From<&ResearchConfig> for RetryPolicy {
    fn from(config: &ResearchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            timeout: Duration::from_secs(config.timeout_secs),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::from(&ResearchConfig::default());
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn research_defaults() {
        let policy = RetryPolicy::from(&ResearchConfig::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert!(!policy.is_last(1));
        assert!(policy.is_last(2));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            timeout: Duration::from_secs(1),
            backoff_base: Duration::ZERO,
            retry_delay: Duration::ZERO,
        };
        assert_eq!(policy.attempts(), 1);
        assert!(policy.is_last(0));
    }
}
