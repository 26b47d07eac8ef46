//! Backoff and retry budget for failed operations

use std::time::Duration;

use offsync_domain::{FailureRecord, QueuedOperation, SyncConfig, SyncError};

/// Exponential backoff with an optional retry ceiling.
///
/// After the n-th failure the next attempt waits `base * 2^(n-1)`, capped at
/// `max_delay`. Once `retries` reaches `max_retries` the operation is
/// abandoned; `None` keeps retrying forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: Option<u32>) -> Self {
        Self { base_delay, max_delay, max_retries }
    }

    /// No backoff and no ceiling: failed operations are retried on every pass.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, None)
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.backoff_base(), config.backoff_max(), config.max_retries)
    }

    /// Delay before the next attempt, given the retry count after this failure.
    pub fn delay_for(&self, retries: u32) -> Duration {
        if retries == 0 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = (retries - 1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent).min(self.max_delay)
    }

    pub fn exhausted(&self, retries: u32) -> bool {
        self.max_retries.is_some_and(|max| retries >= max)
    }

    /// Failure record for `operation` failing with `error` at `now_ms`.
    pub fn failure_for(&self, operation: &QueuedOperation, error: &SyncError, now_ms: i64) -> FailureRecord {
        let retries = operation.retries.saturating_add(1);
        if self.exhausted(retries) {
            return FailureRecord::new(error.to_string(), None, true);
        }

        let delay = self.delay_for(retries);
        let next_attempt_at = (!delay.is_zero())
            .then(|| now_ms.saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)));
        FailureRecord::new(error.to_string(), next_attempt_at, false)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use offsync_domain::{NewOperation, OperationRequest};

    use super::*;

    fn operation_with_retries(retries: u32) -> QueuedOperation {
        let mut op = NewOperation::try_from(OperationRequest::delete("trabalhos", "t2"))
            .unwrap()
            .into_queued("op-1".into(), 0);
        op.retries = retries;
        op
    }

    #[test]
    fn delay_doubles_up_to_the_cap() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10), None);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(200), Duration::from_secs(10));
    }

    #[test]
    fn immediate_policy_never_defers_or_abandons() {
        let policy = RetryPolicy::immediate();
        let failure = policy.failure_for(&operation_with_retries(1_000), &SyncError::Cancelled, 5);
        assert_eq!(failure.next_attempt_at, None);
        assert!(!failure.abandon);
    }

    #[test]
    fn failure_schedules_next_attempt() {
        let policy = RetryPolicy::new(Duration::from_millis(500), Duration::from_secs(60), Some(5));
        let error = SyncError::from_status(500, "boom");
        let failure = policy.failure_for(&operation_with_retries(1), &error, 10_000);

        assert_eq!(failure.next_attempt_at, Some(11_000));
        assert!(!failure.abandon);
        assert!(failure.error.contains("500"));
    }

    #[test]
    fn abandons_when_budget_is_spent() {
        let policy = RetryPolicy::new(Duration::from_millis(500), Duration::from_secs(60), Some(3));
        let error = SyncError::Network("refused".into());

        assert!(!policy.failure_for(&operation_with_retries(1), &error, 0).abandon);
        let failure = policy.failure_for(&operation_with_retries(2), &error, 0);
        assert!(failure.abandon);
        assert_eq!(failure.next_attempt_at, None);
    }

    #[test]
    fn default_follows_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(900));
        assert_eq!(policy.max_retries, Some(10));
    }
}
