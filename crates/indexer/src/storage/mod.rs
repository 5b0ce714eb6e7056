//! Snapshot store for the roundmirror indexer.
//!
//! This module provides database operations for:
//! - Round snapshots (payload-hash idempotent upserts)
//! - Certificates, team rosters, eligibility and profiles
//! - Retry records (backoff bookkeeping)
//! - The content cache
//! - Event scan checkpoints
//!
//! Every write is a keyed upsert or delete. Re-applying the same record
//! leaves the stored row unchanged, and a write carrying an older
//! `last_updated_at` never replaces a newer one.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub mod cert;
pub mod checkpoint;
pub mod content;
pub mod eligibility;
pub mod profile;
pub mod retry;
pub mod round;
pub mod team;
pub mod types;

pub use types::*;

/// Database storage for the indexer.
///
/// Provides async access to SQLite database with connection pooling.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// This will create the database file if it doesn't exist.
    ///
    /// # Arguments
    /// * `database_url` - SQLite database URL (e.g., "sqlite://roundmirror.db")
    /// * `max_connections` - Pool upper bound (default 5)
    /// * `min_connections` - Pool lower bound (default 1)
    ///
    /// # Example
    /// ```no_run
    /// # use roundmirror_indexer::storage::Storage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = Storage::new("sqlite://roundmirror.db", None, None).await?;
    /// storage.run_migrations().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(5))
            .min_connections(min_connections.unwrap_or(1))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(
        path: P,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        Self::new(&database_url, max_connections, min_connections).await
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        Ok(DatabaseStats {
            round_count: self.count("round_snapshots").await?,
            cert_count: self.count("certs").await?,
            team_member_count: self.count("team_members").await?,
            eligibility_count: self.count("eligibility").await?,
            profile_count: self.count("profiles").await?,
            cached_content_count: self.count("content_cache").await?,
            pending_retry_count: self.count("retry_records").await?,
        })
    }

    async fn count(&self, table: &'static str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count {}", table))?;
        Ok(n as u64)
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Round snapshots
    pub round_count: u64,
    /// Certificates
    pub cert_count: u64,
    /// Team members
    pub team_member_count: u64,
    /// Eligibility rows
    pub eligibility_count: u64,
    /// Profiles
    pub profile_count: u64,
    /// Cached content blobs
    pub cached_content_count: u64,
    /// Operations currently in backoff
    pub pending_retry_count: u64,
}

/// Decode a 20-byte address column.
pub(crate) fn address_from_bytes(bytes: &[u8]) -> Result<Address> {
    if bytes.len() != 20 {
        anyhow::bail!("Invalid address column length: {}", bytes.len());
    }
    Ok(Address::from_slice(bytes))
}

/// Decode a nullable 20-byte address column.
pub(crate) fn optional_address(bytes: Option<Vec<u8>>) -> Result<Option<Address>> {
    bytes.map(|b| address_from_bytes(&b)).transpose()
}

/// Current unix time in seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}


#[cfg(test)]
mod tests {
    use super::test_support::setup_storage;
    use super::*;

    #[tokio::test]
    async fn test_storage_creation() {
        let (storage, _temp_db) = setup_storage().await;

        storage.health_check().await.unwrap();

        storage.close().await;
    }

    #[tokio::test]
    async fn test_database_stats_empty() {
        let (storage, _temp_db) = setup_storage().await;

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.round_count, 0);
        assert_eq!(stats.cert_count, 0);
        assert_eq!(stats.team_member_count, 0);
        assert_eq!(stats.eligibility_count, 0);
        assert_eq!(stats.profile_count, 0);
        assert_eq!(stats.cached_content_count, 0);
        assert_eq!(stats.pending_retry_count, 0);

        storage.close().await;
    }

    #[test]
    fn test_address_from_bytes_rejects_bad_length() {
        assert!(address_from_bytes(&[0u8; 19]).is_err());
        assert_eq!(
            address_from_bytes(&[0x11u8; 20]).unwrap(),
            Address::repeat_byte(0x11)
        );
    }
}
