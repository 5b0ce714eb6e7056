//! Retry record storage operations.

use super::{RetryRecord, Storage};
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Get the retry record of an operation key.
    pub async fn get_retry_record(
        &self,
        namespace: &str,
        operation: &str,
        key: &str,
    ) -> Result<Option<RetryRecord>> {
        let row = sqlx::query(
            r#"
            SELECT namespace, operation, key, attempt_count, next_retry_at_ms, last_error
            FROM retry_records
            WHERE namespace = ? AND operation = ? AND key = ?
            "#,
        )
        .bind(namespace)
        .bind(operation)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch retry record")?;

        Ok(row.map(|row| RetryRecord {
            namespace: row.get("namespace"),
            operation: row.get("operation"),
            key: row.get("key"),
            attempt_count: row.get::<i64, _>("attempt_count") as u32,
            next_retry_at_ms: row.get("next_retry_at_ms"),
            last_error: row.get("last_error"),
        }))
    }

    /// Record one more failure of an operation key.
    ///
    /// Runs in a transaction: reads the current attempt count, increments
    /// it and asks `next_retry_at` for the new earliest retry time.
    pub async fn record_retry_failure<F>(
        &self,
        namespace: &str,
        operation: &str,
        key: &str,
        error: &str,
        next_retry_at: F,
    ) -> Result<RetryRecord>
    where
        F: FnOnce(u32) -> i64,
    {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let previous: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT attempt_count FROM retry_records
            WHERE namespace = ? AND operation = ? AND key = ?
            "#,
        )
        .bind(namespace)
        .bind(operation)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to read retry attempt count")?;

        let attempt_count = (previous.unwrap_or(0) as u32).saturating_add(1);
        let next_retry_at_ms = next_retry_at(attempt_count);

        sqlx::query(
            r#"
            INSERT INTO retry_records (
                namespace, operation, key, attempt_count, next_retry_at_ms, last_error
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(namespace, operation, key) DO UPDATE SET
                attempt_count = excluded.attempt_count,
                next_retry_at_ms = excluded.next_retry_at_ms,
                last_error = excluded.last_error
            "#,
        )
        .bind(namespace)
        .bind(operation)
        .bind(key)
        .bind(attempt_count as i64)
        .bind(next_retry_at_ms)
        .bind(error)
        .execute(&mut *tx)
        .await
        .context("Failed to write retry record")?;

        tx.commit().await.context("Failed to commit retry record")?;

        Ok(RetryRecord {
            namespace: namespace.to_string(),
            operation: operation.to_string(),
            key: key.to_string(),
            attempt_count,
            next_retry_at_ms,
            last_error: error.to_string(),
        })
    }

    /// Delete the retry record of an operation key. Returns `true` if one existed.
    pub async fn delete_retry_record(
        &self,
        namespace: &str,
        operation: &str,
        key: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM retry_records WHERE namespace = ? AND operation = ? AND key = ?",
        )
        .bind(namespace)
        .bind(operation)
        .bind(key)
        .execute(&self.pool)
        .await
        .context("Failed to delete retry record")?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::test_support::setup_storage;

    #[tokio::test]
    async fn test_failures_accumulate_until_cleared() {
        let (storage, _temp_db) = setup_storage().await;

        let first = storage
            .record_retry_failure("content", "fetch", "bafy", "timeout", |n| n as i64 * 1000)
            .await
            .unwrap();
        assert_eq!(first.attempt_count, 1);
        assert_eq!(first.next_retry_at_ms, 1000);

        let second = storage
            .record_retry_failure("content", "fetch", "bafy", "502", |n| n as i64 * 1000)
            .await
            .unwrap();
        assert_eq!(second.attempt_count, 2);

        let stored = storage
            .get_retry_record("content", "fetch", "bafy")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, second);

        assert!(storage.delete_retry_record("content", "fetch", "bafy").await.unwrap());
        assert!(!storage.delete_retry_record("content", "fetch", "bafy").await.unwrap());
        assert!(storage
            .get_retry_record("content", "fetch", "bafy")
            .await
            .unwrap()
            .is_none());

        storage.close().await;
    }
}
