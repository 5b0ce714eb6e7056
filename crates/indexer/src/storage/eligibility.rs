//! Eligibility storage operations.

use super::{address_from_bytes, EligibilityRecord, Storage};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Upsert an eligibility record. Returns `true` if inserted or changed.
    pub async fn upsert_eligibility(&self, record: &EligibilityRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO eligibility (
                chain_id, iteration_id, account, eligible, cert_type,
                is_project, has_named_team_members, last_updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chain_id, iteration_id, account) DO UPDATE SET
                eligible = excluded.eligible,
                cert_type = excluded.cert_type,
                is_project = excluded.is_project,
                has_named_team_members = excluded.has_named_team_members,
                last_updated_at = excluded.last_updated_at
            WHERE excluded.last_updated_at >= eligibility.last_updated_at
              AND (eligibility.eligible IS NOT excluded.eligible
                OR eligibility.cert_type IS NOT excluded.cert_type
                OR eligibility.is_project IS NOT excluded.is_project
                OR eligibility.has_named_team_members IS NOT excluded.has_named_team_members)
            "#,
        )
        .bind(record.chain_id as i64)
        .bind(record.iteration_id as i64)
        .bind(record.account.as_slice())
        .bind(record.eligible)
        .bind(record.cert_type.as_deref())
        .bind(record.is_project)
        .bind(record.has_named_team_members)
        .bind(record.last_updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert eligibility")?;

        Ok(result.rows_affected() > 0)
    }

    /// Get the eligibility of one account.
    pub async fn get_eligibility(
        &self,
        chain_id: u64,
        iteration_id: u64,
        account: Address,
    ) -> Result<Option<EligibilityRecord>> {
        let row = sqlx::query(
            r#"
            SELECT chain_id, iteration_id, account, eligible, cert_type,
                   is_project, has_named_team_members, last_updated_at
            FROM eligibility
            WHERE chain_id = ? AND iteration_id = ? AND account = ?
            "#,
        )
        .bind(chain_id as i64)
        .bind(iteration_id as i64)
        .bind(account.as_slice())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch eligibility")?;

        row.map(Self::row_to_eligibility).transpose()
    }

    /// All eligibility records of an iteration.
    pub async fn list_eligibility(
        &self,
        chain_id: u64,
        iteration_id: u64,
    ) -> Result<Vec<EligibilityRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT chain_id, iteration_id, account, eligible, cert_type,
                   is_project, has_named_team_members, last_updated_at
            FROM eligibility
            WHERE chain_id = ? AND iteration_id = ?
            ORDER BY account
            "#,
        )
        .bind(chain_id as i64)
        .bind(iteration_id as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list eligibility")?;

        rows.into_iter().map(Self::row_to_eligibility).collect()
    }

    fn row_to_eligibility(row: sqlx::sqlite::SqliteRow) -> Result<EligibilityRecord> {
        let account: Vec<u8> = row.get("account");

        Ok(EligibilityRecord {
            chain_id: row.get::<i64, _>("chain_id") as u64,
            iteration_id: row.get::<i64, _>("iteration_id") as u64,
            account: address_from_bytes(&account)?,
            eligible: row.get("eligible"),
            cert_type: row.get("cert_type"),
            is_project: row.get("is_project"),
            has_named_team_members: row.get("has_named_team_members"),
            last_updated_at: row.get("last_updated_at"),
        })
    }
}
