//! Team roster storage operations.

use super::{address_from_bytes, Storage, TeamMemberRecord};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use roundmirror_core::MemberStatus;
use sqlx::Row;
use std::collections::HashSet;

impl Storage {
    /// Upsert a team member. Returns `true` if inserted or changed.
    pub async fn upsert_team_member(&self, member: &TeamMemberRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO team_members (
                chain_id, iteration_id, project, member, status, full_name, last_updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chain_id, iteration_id, project, member) DO UPDATE SET
                status = excluded.status,
                full_name = excluded.full_name,
                last_updated_at = excluded.last_updated_at
            WHERE excluded.last_updated_at >= team_members.last_updated_at
              AND (team_members.status IS NOT excluded.status
                OR team_members.full_name IS NOT excluded.full_name)
            "#,
        )
        .bind(member.chain_id as i64)
        .bind(member.iteration_id as i64)
        .bind(member.project.as_slice())
        .bind(member.member.as_slice())
        .bind(member.status.as_str())
        .bind(&member.full_name)
        .bind(member.last_updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert team member")?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete members of a roster that are absent from `roster`.
    ///
    /// Callers must only pass a roster that was fetched completely; the
    /// deletion is the visibility swap to the fresh roster. Returns the
    /// number of rows deleted.
    pub async fn delete_team_members_not_in(
        &self,
        chain_id: u64,
        iteration_id: u64,
        project: Address,
        roster: &[Address],
    ) -> Result<u64> {
        let keep: HashSet<Address> = roster.iter().copied().collect();

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let existing: Vec<Vec<u8>> = sqlx::query_scalar(
            r#"
            SELECT member FROM team_members
            WHERE chain_id = ? AND iteration_id = ? AND project = ?
            "#,
        )
        .bind(chain_id as i64)
        .bind(iteration_id as i64)
        .bind(project.as_slice())
        .fetch_all(&mut *tx)
        .await
        .context("Failed to list roster for deletion")?;

        let mut deleted = 0;
        for bytes in existing {
            let member = address_from_bytes(&bytes)?;
            if keep.contains(&member) {
                continue;
            }
            let result = sqlx::query(
                r#"
                DELETE FROM team_members
                WHERE chain_id = ? AND iteration_id = ? AND project = ? AND member = ?
                "#,
            )
            .bind(chain_id as i64)
            .bind(iteration_id as i64)
            .bind(project.as_slice())
            .bind(member.as_slice())
            .execute(&mut *tx)
            .await
            .context("Failed to delete team member")?;
            deleted += result.rows_affected();
        }

        tx.commit().await.context("Failed to commit roster deletion")?;

        Ok(deleted)
    }

    /// Members of one project roster, ordered by member address.
    pub async fn list_team_members(
        &self,
        chain_id: u64,
        iteration_id: u64,
        project: Address,
    ) -> Result<Vec<TeamMemberRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT chain_id, iteration_id, project, member, status, full_name, last_updated_at
            FROM team_members
            WHERE chain_id = ? AND iteration_id = ? AND project = ?
            ORDER BY member
            "#,
        )
        .bind(chain_id as i64)
        .bind(iteration_id as i64)
        .bind(project.as_slice())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list team members")?;

        rows.into_iter().map(Self::row_to_team_member).collect()
    }

    /// Distinct member accounts across all rosters of a network.
    pub async fn list_team_member_accounts(&self, chain_id: u64) -> Result<Vec<Address>> {
        let rows: Vec<Vec<u8>> = sqlx::query_scalar(
            "SELECT DISTINCT member FROM team_members WHERE chain_id = ? ORDER BY member",
        )
        .bind(chain_id as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list team member accounts")?;

        rows.iter().map(|b| address_from_bytes(b)).collect()
    }

    /// Whether a project has at least one approved member with a name.
    pub async fn has_named_team_members(
        &self,
        chain_id: u64,
        iteration_id: u64,
        project: Address,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM team_members
            WHERE chain_id = ? AND iteration_id = ? AND project = ?
              AND status = ? AND TRIM(full_name) <> ''
            "#,
        )
        .bind(chain_id as i64)
        .bind(iteration_id as i64)
        .bind(project.as_slice())
        .bind(MemberStatus::Approved.as_str())
        .fetch_one(&self.pool)
        .await
        .context("Failed to count named team members")?;

        Ok(count > 0)
    }

    fn row_to_team_member(row: sqlx::sqlite::SqliteRow) -> Result<TeamMemberRecord> {
        let project: Vec<u8> = row.get("project");
        let member: Vec<u8> = row.get("member");
        let status: String = row.get("status");

        Ok(TeamMemberRecord {
            chain_id: row.get::<i64, _>("chain_id") as u64,
            iteration_id: row.get::<i64, _>("iteration_id") as u64,
            project: address_from_bytes(&project)?,
            member: address_from_bytes(&member)?,
            status: status.parse()?,
            full_name: row.get("full_name"),
            last_updated_at: row.get("last_updated_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::setup_storage;

    fn member(byte: u8, status: MemberStatus, name: &str) -> TeamMemberRecord {
        TeamMemberRecord {
            chain_id: 1,
            iteration_id: 1,
            project: Address::repeat_byte(0xaa),
            member: Address::repeat_byte(byte),
            status,
            full_name: name.to_string(),
            last_updated_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_delete_members_not_in_roster() {
        let (storage, _temp_db) = setup_storage().await;
        let project = Address::repeat_byte(0xaa);

        for byte in 1..=3 {
            storage
                .upsert_team_member(&member(byte, MemberStatus::Approved, "Name"))
                .await
                .unwrap();
        }

        let roster = [Address::repeat_byte(1), Address::repeat_byte(3)];
        let deleted = storage
            .delete_team_members_not_in(1, 1, project, &roster)
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let members: Vec<Address> = storage
            .list_team_members(1, 1, project)
            .await
            .unwrap()
            .iter()
            .map(|m| m.member)
            .collect();
        assert_eq!(members, roster.to_vec());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_named_members_require_approval() {
        let (storage, _temp_db) = setup_storage().await;
        let project = Address::repeat_byte(0xaa);

        storage
            .upsert_team_member(&member(1, MemberStatus::Proposed, "Grace"))
            .await
            .unwrap();
        storage
            .upsert_team_member(&member(2, MemberStatus::Approved, "  "))
            .await
            .unwrap();
        assert!(!storage.has_named_team_members(1, 1, project).await.unwrap());

        let mut approved = member(1, MemberStatus::Approved, "Grace");
        approved.last_updated_at += 1;
        assert!(storage.upsert_team_member(&approved).await.unwrap());
        assert!(storage.has_named_team_members(1, 1, project).await.unwrap());

        storage.close().await;
    }
}
