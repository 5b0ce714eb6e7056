//! Content cache storage operations.

use super::{ContentCacheEntry, Storage};
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Get a cached blob by content id.
    pub async fn get_cached_content(&self, content_id: &str) -> Result<Option<ContentCacheEntry>> {
        let row = sqlx::query(
            "SELECT content_id, raw_content, fetched_at FROM content_cache WHERE content_id = ?",
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch cached content")?;

        Ok(row.map(|row| ContentCacheEntry {
            content_id: row.get("content_id"),
            raw_content: row.get("raw_content"),
            fetched_at: row.get("fetched_at"),
        }))
    }

    /// Store a blob. Content is immutable per id, so an existing entry is kept.
    pub async fn put_cached_content(&self, entry: &ContentCacheEntry) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO content_cache (content_id, raw_content, fetched_at)
            VALUES (?, ?, ?)
            ON CONFLICT(content_id) DO NOTHING
            "#,
        )
        .bind(&entry.content_id)
        .bind(&entry.raw_content)
        .bind(entry.fetched_at)
        .execute(&self.pool)
        .await
        .context("Failed to store cached content")?;

        Ok(result.rows_affected() > 0)
    }
}
