//! Bounded exponential backoff for chunk uploads.

use std::time::Duration;
use tokio::time::sleep;

use super::target::TargetError;

/// Chunk uploads get three attempts, matching the track-level
/// consecutive-failure budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const BASE_DELAY: Duration = Duration::from_millis(500);

pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: BASE_DELAY,
        }
    }

    /// `attempt` is zero-based: the attempt that just failed.
    pub fn should_retry(&self, attempt: u32, error: &TargetError) -> bool {
        if attempt + 1 >= self.max_attempts {
            return false;
        }
        error.is_retryable()
    }

    /// Delay before retry number `attempt + 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(multiplier)
    }

    pub async fn wait_before_retry(&self, attempt: u32) {
        let delay = self.delay(attempt);
        tracing::info!("retrying upload in {}ms (attempt {})", delay.as_millis(), attempt + 2);
        sleep(delay).await;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_respects_budget() {
        let policy = RetryPolicy::new(3);
        let err = TargetError::Timeout;
        assert!(policy.should_retry(0, &err));
        assert!(policy.should_retry(1, &err));
        assert!(!policy.should_retry(2, &err));
    }

    #[test]
    fn test_should_not_retry_fatal_errors() {
        let policy = RetryPolicy::new(3);
        assert!(!policy.should_retry(0, &TargetError::Authentication));
        assert!(!policy.should_retry(
            0,
            &TargetError::Rejected {
                status: 400,
                message: "bad offset".into()
            }
        ));
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy::new(5);
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(2), Duration::from_millis(2000));
    }
}
