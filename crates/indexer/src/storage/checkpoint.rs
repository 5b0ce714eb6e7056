//! Event scan checkpoints.

use super::{address_from_bytes, now_secs, ScanCheckpoint, Storage};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Next unscanned block for a source contract, if a scan has started.
    pub async fn get_checkpoint(&self, chain_id: u64, source: Address) -> Result<Option<u64>> {
        let next: Option<i64> = sqlx::query_scalar(
            "SELECT next_block FROM scan_checkpoints WHERE chain_id = ? AND source = ?",
        )
        .bind(chain_id as i64)
        .bind(source.as_slice())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch scan checkpoint")?;

        Ok(next.map(|n| n as u64))
    }

    /// Move a checkpoint forward. A lower `next_block` than the stored one
    /// is ignored, so checkpoints never move backwards.
    pub async fn advance_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<()> {
        self.advance_checkpoint_with_accounts(checkpoint, &[]).await
    }

    /// Record the accounts found below `next_block` and move the checkpoint
    /// in one transaction, so a committed checkpoint never hides an account
    /// that was not recorded.
    pub async fn advance_checkpoint_with_accounts(
        &self,
        checkpoint: &ScanCheckpoint,
        accounts: &[Address],
    ) -> Result<()> {
        let now = now_secs();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin checkpoint transaction")?;

        for account in accounts {
            sqlx::query(
                r#"
                INSERT INTO role_event_accounts (chain_id, source, account, first_seen_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(chain_id, source, account) DO NOTHING
                "#,
            )
            .bind(checkpoint.chain_id as i64)
            .bind(checkpoint.source.as_slice())
            .bind(account.as_slice())
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to record role event account")?;
        }

        sqlx::query(
            r#"
            INSERT INTO scan_checkpoints (chain_id, source, next_block, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chain_id, source) DO UPDATE SET
                next_block = excluded.next_block,
                updated_at = excluded.updated_at
            WHERE excluded.next_block > scan_checkpoints.next_block
            "#,
        )
        .bind(checkpoint.chain_id as i64)
        .bind(checkpoint.source.as_slice())
        .bind(checkpoint.next_block as i64)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to advance scan checkpoint")?;

        tx.commit()
            .await
            .context("Failed to commit checkpoint transaction")?;

        Ok(())
    }

    /// Every account a source's role events have named so far.
    pub async fn list_role_event_accounts(
        &self,
        chain_id: u64,
        source: Address,
    ) -> Result<Vec<Address>> {
        let rows: Vec<Vec<u8>> = sqlx::query_scalar(
            "SELECT account FROM role_event_accounts WHERE chain_id = ? AND source = ? ORDER BY account",
        )
        .bind(chain_id as i64)
        .bind(source.as_slice())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list role event accounts")?;

        rows.iter().map(|bytes| address_from_bytes(bytes)).collect()
    }

    /// All checkpoints, ordered by network then source.
    pub async fn list_checkpoints(&self) -> Result<Vec<ScanCheckpoint>> {
        let rows = sqlx::query(
            "SELECT chain_id, source, next_block FROM scan_checkpoints ORDER BY chain_id, source",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list scan checkpoints")?;

        rows.into_iter()
            .map(|row| {
                let source: Vec<u8> = row.get("source");
                Ok(ScanCheckpoint {
                    chain_id: row.get::<i64, _>("chain_id") as u64,
                    source: address_from_bytes(&source)?,
                    next_block: row.get::<i64, _>("next_block") as u64,
                })
            })
            .collect()
    }
}
