//! Exponential backoff bookkeeping for failing operations.
//!
//! Failures are recorded per `(namespace, operation, key)` in the store, so
//! backoff survives restarts. Nothing here sleeps: callers ask
//! [`RetryTracker::should_retry`] and skip the item when backoff forbids it,
//! leaving the retry to a later tick.

use anyhow::Result;
use std::time::Duration;
use tracing::debug;

use crate::storage::{RetryRecord, Storage};

/// Backoff policy: `min(max_delay, base_delay * 2^attempt_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay unit.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Create a policy.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay after the `attempt_count`-th consecutive failure.
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let max_ms = self.max_delay.as_millis().min(u64::MAX as u128) as u64;
        let scaled = base_ms.saturating_mul(2u64.saturating_pow(attempt_count));
        Duration::from_millis(scaled.min(max_ms))
    }

    /// Earliest retry time (unix ms) for a failure recorded at `now_ms`.
    pub fn next_retry_at(&self, now_ms: i64, attempt_count: u32) -> i64 {
        let delay = self.delay_for(attempt_count).as_millis().min(i64::MAX as u128) as i64;
        now_ms.saturating_add(delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(3600))
    }
}

/// Store-backed retry tracker.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    storage: Storage,
    policy: BackoffPolicy,
}

impl RetryTracker {
    /// Create a tracker over `storage`.
    pub fn new(storage: Storage, policy: BackoffPolicy) -> Self {
        Self { storage, policy }
    }

    /// The policy in use.
    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Whether the operation may run now.
    pub async fn should_retry(&self, namespace: &str, operation: &str, key: &str) -> Result<bool> {
        self.should_retry_at(namespace, operation, key, now_ms()).await
    }

    /// [`should_retry`](Self::should_retry) against an explicit clock.
    pub async fn should_retry_at(
        &self,
        namespace: &str,
        operation: &str,
        key: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let record = self
            .storage
            .get_retry_record(namespace, operation, key)
            .await?;

        Ok(match record {
            None => true,
            Some(record) => now_ms >= record.next_retry_at_ms,
        })
    }

    /// Record a failure and push the next retry time out.
    pub async fn record_failure(
        &self,
        namespace: &str,
        operation: &str,
        key: &str,
        error: &str,
    ) -> Result<RetryRecord> {
        self.record_failure_at(namespace, operation, key, error, now_ms())
            .await
    }

    /// [`record_failure`](Self::record_failure) against an explicit clock.
    pub async fn record_failure_at(
        &self,
        namespace: &str,
        operation: &str,
        key: &str,
        error: &str,
        now_ms: i64,
    ) -> Result<RetryRecord> {
        let policy = self.policy;
        let record = self
            .storage
            .record_retry_failure(namespace, operation, key, error, |attempt_count| {
                policy.next_retry_at(now_ms, attempt_count)
            })
            .await?;

        debug!(
            "{}/{} {} failed (attempt {}), next retry at {}: {}",
            namespace, operation, key, record.attempt_count, record.next_retry_at_ms, error
        );

        Ok(record)
    }

    /// Clear the failure history of an operation key.
    pub async fn record_success(&self, namespace: &str, operation: &str, key: &str) -> Result<()> {
        self.storage
            .delete_retry_record(namespace, operation, key)
            .await?;
        Ok(())
    }
}

/// Current unix time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::setup_storage;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60))
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let policy = policy();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(32));
        assert_eq!(policy.delay_for(6), Duration::from_secs(60));
        assert_eq!(policy.delay_for(200), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_backoff_is_monotonic_until_cap() {
        let (storage, _temp_db) = setup_storage().await;
        let tracker = RetryTracker::new(storage.clone(), policy());
        let now = 1_000_000;

        let mut previous = now;
        let mut last_delay = 0;
        for expected_attempt in 1..=10u32 {
            let record = tracker
                .record_failure_at("content", "fetch", "bafy", "timeout", now)
                .await
                .unwrap();
            assert_eq!(record.attempt_count, expected_attempt);

            let delay = record.next_retry_at_ms - now;
            assert!(delay <= 60_000);
            if delay < 60_000 {
                assert!(record.next_retry_at_ms > previous);
            }
            assert!(delay >= last_delay);
            last_delay = delay;
            previous = record.next_retry_at_ms;
        }
        assert_eq!(last_delay, 60_000);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_should_retry_respects_window() {
        let (storage, _temp_db) = setup_storage().await;
        let tracker = RetryTracker::new(storage.clone(), policy());
        let now = 5_000;

        assert!(tracker
            .should_retry_at("content", "fetch", "bafy", now)
            .await
            .unwrap());

        let record = tracker
            .record_failure_at("content", "fetch", "bafy", "502", now)
            .await
            .unwrap();
        assert_eq!(record.next_retry_at_ms, now + 2_000);

        assert!(!tracker
            .should_retry_at("content", "fetch", "bafy", now + 1_999)
            .await
            .unwrap());
        assert!(tracker
            .should_retry_at("content", "fetch", "bafy", now + 2_000)
            .await
            .unwrap());

        // Other keys are unaffected.
        assert!(tracker
            .should_retry_at("content", "fetch", "other", now)
            .await
            .unwrap());

        tracker.record_success("content", "fetch", "bafy").await.unwrap();
        assert!(tracker
            .should_retry_at("content", "fetch", "bafy", now)
            .await
            .unwrap());

        storage.close().await;
    }
}
