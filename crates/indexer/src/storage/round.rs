//! Round snapshot storage operations.

use super::{address_from_bytes, optional_address, ProjectEntry, RoundSnapshot, Storage};
use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use roundmirror_core::hashing::payload_hash;
use roundmirror_core::tally::ScoreBreakdown;
use roundmirror_core::{
    EntityVotes, LifecycleState, Locks, ParticipationCounts, VotingMode, Winner,
};
use serde::Serialize;
use sqlx::Row;

/// Everything that identifies the observable content of a snapshot.
///
/// `last_observed_block` and `last_updated_at` are bookkeeping and do not
/// take part in the hash, so re-reading unchanged state at a later block is
/// a no-op for the payload.
#[derive(Serialize)]
struct SnapshotPayload<'a> {
    registry: &'a Address,
    jury_contract: &'a Address,
    pairing_contract: &'a Option<Address>,
    lifecycle_state: LifecycleState,
    window_start: u64,
    window_end: u64,
    voting_mode: VotingMode,
    mode_overridden: bool,
    locks: &'a Locks,
    winner: &'a Winner,
    entity_votes: &'a EntityVotes,
    participation: &'a ParticipationCounts,
    dev_rel_account: &'a Option<Address>,
    dao_hic_voters: &'a [Address],
    scores: &'a Option<ScoreBreakdown>,
    projects: &'a [ProjectEntry],
}

impl RoundSnapshot {
    /// Hash of the snapshot payload used for idempotent upserts.
    pub fn payload_hash(&self) -> Result<B256> {
        let payload = SnapshotPayload {
            registry: &self.registry,
            jury_contract: &self.jury_contract,
            pairing_contract: &self.pairing_contract,
            lifecycle_state: self.lifecycle_state,
            window_start: self.window_start,
            window_end: self.window_end,
            voting_mode: self.voting_mode,
            mode_overridden: self.mode_overridden,
            locks: &self.locks,
            winner: &self.winner,
            entity_votes: &self.entity_votes,
            participation: &self.participation,
            dev_rel_account: &self.dev_rel_account,
            dao_hic_voters: &self.dao_hic_voters,
            scores: &self.scores,
            projects: &self.projects,
        };
        let bytes = serde_json::to_vec(&payload).context("Failed to serialize snapshot payload")?;
        Ok(payload_hash(&bytes))
    }
}

const SNAPSHOT_COLUMNS: &str = r#"
    chain_id, iteration_id, round_id, registry, jury_contract, pairing_contract,
    lifecycle_state, window_start, window_end, voting_mode, mode_overridden,
    projects_locked, fully_locked, winner, has_winner, dev_rel_account,
    entity_votes_json, participation_json, dao_hic_voters_json, scores_json,
    projects_json, payload_hash, last_observed_block, last_updated_at
"#;

impl Storage {
    /// Upsert a round snapshot.
    ///
    /// Returns `true` if the stored payload changed. An identical payload
    /// only advances `last_observed_block`; a payload carrying an older
    /// `last_updated_at` than the stored one is ignored.
    pub async fn upsert_round_snapshot(&self, snapshot: &RoundSnapshot) -> Result<bool> {
        let hash = snapshot.payload_hash()?;

        let entity_votes_json = serde_json::to_string(&snapshot.entity_votes)?;
        let participation_json = serde_json::to_string(&snapshot.participation)?;
        let dao_hic_voters_json = serde_json::to_string(&snapshot.dao_hic_voters)?;
        let scores_json = snapshot
            .scores
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let projects_json = serde_json::to_string(&snapshot.projects)?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        let result = sqlx::query(
            r#"
            INSERT INTO round_snapshots (
                chain_id, iteration_id, round_id, registry, jury_contract, pairing_contract,
                lifecycle_state, window_start, window_end, voting_mode, mode_overridden,
                projects_locked, fully_locked, winner, has_winner, dev_rel_account,
                entity_votes_json, participation_json, dao_hic_voters_json, scores_json,
                projects_json, payload_hash, last_observed_block, last_updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chain_id, iteration_id, round_id) DO UPDATE SET
                registry = excluded.registry,
                jury_contract = excluded.jury_contract,
                pairing_contract = excluded.pairing_contract,
                lifecycle_state = excluded.lifecycle_state,
                window_start = excluded.window_start,
                window_end = excluded.window_end,
                voting_mode = excluded.voting_mode,
                mode_overridden = excluded.mode_overridden,
                projects_locked = excluded.projects_locked,
                fully_locked = excluded.fully_locked,
                winner = excluded.winner,
                has_winner = excluded.has_winner,
                dev_rel_account = excluded.dev_rel_account,
                entity_votes_json = excluded.entity_votes_json,
                participation_json = excluded.participation_json,
                dao_hic_voters_json = excluded.dao_hic_voters_json,
                scores_json = excluded.scores_json,
                projects_json = excluded.projects_json,
                payload_hash = excluded.payload_hash,
                last_observed_block = MAX(round_snapshots.last_observed_block, excluded.last_observed_block),
                last_updated_at = excluded.last_updated_at
            WHERE round_snapshots.payload_hash <> excluded.payload_hash
              AND excluded.last_updated_at >= round_snapshots.last_updated_at
            "#,
        )
        .bind(snapshot.chain_id as i64)
        .bind(snapshot.iteration_id as i64)
        .bind(snapshot.round_id as i64)
        .bind(snapshot.registry.as_slice())
        .bind(snapshot.jury_contract.as_slice())
        .bind(snapshot.pairing_contract.as_ref().map(|a| a.as_slice()))
        .bind(snapshot.lifecycle_state.as_str())
        .bind(snapshot.window_start as i64)
        .bind(snapshot.window_end as i64)
        .bind(snapshot.voting_mode.as_str())
        .bind(snapshot.mode_overridden)
        .bind(snapshot.locks.projects_locked)
        .bind(snapshot.locks.fully_locked)
        .bind(snapshot.winner.address.as_ref().map(|a| a.as_slice()))
        .bind(snapshot.winner.has_winner)
        .bind(snapshot.dev_rel_account.as_ref().map(|a| a.as_slice()))
        .bind(&entity_votes_json)
        .bind(&participation_json)
        .bind(&dao_hic_voters_json)
        .bind(scores_json.as_deref())
        .bind(&projects_json)
        .bind(hash.as_slice())
        .bind(snapshot.last_observed_block as i64)
        .bind(snapshot.last_updated_at)
        .execute(&mut *tx)
        .await
        .context("Failed to upsert round snapshot")?;

        sqlx::query(
            r#"
            UPDATE round_snapshots
            SET last_observed_block = ?
            WHERE chain_id = ? AND iteration_id = ? AND round_id = ?
              AND last_observed_block < ?
            "#,
        )
        .bind(snapshot.last_observed_block as i64)
        .bind(snapshot.chain_id as i64)
        .bind(snapshot.iteration_id as i64)
        .bind(snapshot.round_id as i64)
        .bind(snapshot.last_observed_block as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to advance round snapshot block")?;

        tx.commit().await.context("Failed to commit round snapshot")?;

        Ok(result.rows_affected() > 0)
    }

    /// Get one round snapshot.
    pub async fn get_round_snapshot(
        &self,
        chain_id: u64,
        iteration_id: u64,
        round_id: u64,
    ) -> Result<Option<RoundSnapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM round_snapshots WHERE chain_id = ? AND iteration_id = ? AND round_id = ?",
            SNAPSHOT_COLUMNS
        ))
        .bind(chain_id as i64)
        .bind(iteration_id as i64)
        .bind(round_id as i64)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch round snapshot")?;

        row.map(Self::row_to_round_snapshot).transpose()
    }

    /// List all round snapshots of a network, ordered by iteration and round.
    pub async fn list_round_snapshots(&self, chain_id: u64) -> Result<Vec<RoundSnapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM round_snapshots WHERE chain_id = ? ORDER BY iteration_id, round_id",
            SNAPSHOT_COLUMNS
        ))
        .bind(chain_id as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list round snapshots")?;

        rows.into_iter().map(Self::row_to_round_snapshot).collect()
    }

    /// Distinct `(iteration_id, project)` pairs across all stored rounds of a network.
    pub async fn list_round_projects(&self, chain_id: u64) -> Result<Vec<(u64, Address)>> {
        let mut pairs: Vec<(u64, Address)> = self
            .list_round_snapshots(chain_id)
            .await?
            .into_iter()
            .flat_map(|s| {
                let iteration_id = s.iteration_id;
                s.projects.into_iter().map(move |p| (iteration_id, p.address))
            })
            .collect();
        pairs.sort();
        pairs.dedup();
        Ok(pairs)
    }

    fn row_to_round_snapshot(row: sqlx::sqlite::SqliteRow) -> Result<RoundSnapshot> {
        let registry: Vec<u8> = row.get("registry");
        let jury: Vec<u8> = row.get("jury_contract");
        let lifecycle: String = row.get("lifecycle_state");
        let mode: String = row.get("voting_mode");
        let entity_votes_json: String = row.get("entity_votes_json");
        let participation_json: String = row.get("participation_json");
        let voters_json: String = row.get("dao_hic_voters_json");
        let scores_json: Option<String> = row.get("scores_json");
        let projects_json: String = row.get("projects_json");

        let winner_address = optional_address(row.get("winner"))?;
        let has_winner: bool = row.get("has_winner");

        Ok(RoundSnapshot {
            chain_id: row.get::<i64, _>("chain_id") as u64,
            iteration_id: row.get::<i64, _>("iteration_id") as u64,
            round_id: row.get::<i64, _>("round_id") as u64,
            registry: address_from_bytes(&registry)?,
            jury_contract: address_from_bytes(&jury)?,
            pairing_contract: optional_address(row.get("pairing_contract"))?,
            lifecycle_state: lifecycle.parse()?,
            window_start: row.get::<i64, _>("window_start") as u64,
            window_end: row.get::<i64, _>("window_end") as u64,
            voting_mode: mode.parse()?,
            mode_overridden: row.get("mode_overridden"),
            locks: Locks {
                projects_locked: row.get("projects_locked"),
                fully_locked: row.get("fully_locked"),
            },
            winner: Winner {
                address: winner_address,
                has_winner,
            },
            entity_votes: serde_json::from_str(&entity_votes_json)
                .context("Corrupt entity_votes_json")?,
            participation: serde_json::from_str(&participation_json)
                .context("Corrupt participation_json")?,
            dev_rel_account: optional_address(row.get("dev_rel_account"))?,
            dao_hic_voters: serde_json::from_str(&voters_json)
                .context("Corrupt dao_hic_voters_json")?,
            scores: scores_json
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .context("Corrupt scores_json")?,
            projects: serde_json::from_str(&projects_json).context("Corrupt projects_json")?,
            last_observed_block: row.get::<i64, _>("last_observed_block") as u64,
            last_updated_at: row.get("last_updated_at"),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::test_support::setup_storage;
    use alloy::primitives::U256;
    use roundmirror_core::tally::ProjectScore;

    pub(crate) fn sample_snapshot() -> RoundSnapshot {
        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);
        RoundSnapshot {
            chain_id: 11155111,
            iteration_id: 1,
            round_id: 2,
            registry: Address::repeat_byte(0x01),
            jury_contract: Address::repeat_byte(0x02),
            pairing_contract: Some(Address::repeat_byte(0x03)),
            lifecycle_state: LifecycleState::Ended,
            window_start: 1_700_000_000,
            window_end: 1_700_086_400,
            voting_mode: VotingMode::Weighted,
            mode_overridden: false,
            locks: Locks {
                projects_locked: true,
                fully_locked: false,
            },
            winner: Winner::project(a),
            entity_votes: EntityVotes {
                dev_rel: Some(a),
                dao_hic: Some(a),
                community: Some(b),
            },
            participation: ParticipationCounts {
                dev_rel: 1,
                dao_hic: 10,
                community: 100,
            },
            dev_rel_account: Some(Address::repeat_byte(0xde)),
            dao_hic_voters: vec![Address::repeat_byte(0x10), Address::repeat_byte(0x11)],
            scores: Some(ScoreBreakdown {
                scores: vec![
                    ProjectScore {
                        project: a,
                        score: U256::from(666u64),
                    },
                    ProjectScore {
                        project: b,
                        score: U256::from(333u64),
                    },
                ],
                total_possible: U256::from(999u64),
            }),
            projects: vec![
                ProjectEntry {
                    address: a,
                    metadata_cid: Some("bafy-a".to_string()),
                    metadata: Some(serde_json::json!({"name": "Project A"})),
                },
                ProjectEntry {
                    address: b,
                    metadata_cid: Some("bafy-b".to_string()),
                    metadata: None,
                },
            ],
            last_observed_block: 500,
            last_updated_at: 1_700_100_000,
        }
    }

    #[tokio::test]
    async fn test_round_snapshot_roundtrip() {
        let (storage, _temp_db) = setup_storage().await;
        let snapshot = sample_snapshot();

        assert!(storage.upsert_round_snapshot(&snapshot).await.unwrap());

        let stored = storage
            .get_round_snapshot(snapshot.chain_id, 1, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, snapshot);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_identical_upsert_is_noop() {
        let (storage, _temp_db) = setup_storage().await;
        let snapshot = sample_snapshot();

        assert!(storage.upsert_round_snapshot(&snapshot).await.unwrap());
        let first = storage.get_round_snapshot(snapshot.chain_id, 1, 2).await.unwrap();

        // Same payload, later wall clock: nothing observable changes.
        let mut again = snapshot.clone();
        again.last_updated_at += 60;
        assert!(!storage.upsert_round_snapshot(&again).await.unwrap());
        let second = storage.get_round_snapshot(snapshot.chain_id, 1, 2).await.unwrap();

        assert_eq!(first, second);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_unchanged_payload_advances_block_only() {
        let (storage, _temp_db) = setup_storage().await;
        let snapshot = sample_snapshot();
        storage.upsert_round_snapshot(&snapshot).await.unwrap();

        let mut later = snapshot.clone();
        later.last_observed_block = 900;
        later.last_updated_at += 60;
        assert!(!storage.upsert_round_snapshot(&later).await.unwrap());

        let stored = storage
            .get_round_snapshot(snapshot.chain_id, 1, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.last_observed_block, 900);
        assert_eq!(stored.last_updated_at, snapshot.last_updated_at);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_changed_payload_updates_and_stale_write_is_ignored() {
        let (storage, _temp_db) = setup_storage().await;
        let snapshot = sample_snapshot();
        storage.upsert_round_snapshot(&snapshot).await.unwrap();

        let mut locked = snapshot.clone();
        locked.locks.fully_locked = true;
        locked.lifecycle_state = LifecycleState::Locked;
        locked.last_updated_at += 60;
        assert!(storage.upsert_round_snapshot(&locked).await.unwrap());

        // An older write must not roll the row back.
        let mut stale = snapshot.clone();
        stale.window_end += 1;
        assert!(!storage.upsert_round_snapshot(&stale).await.unwrap());

        let stored = storage
            .get_round_snapshot(snapshot.chain_id, 1, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.lifecycle_state, LifecycleState::Locked);
        assert_eq!(stored.window_end, snapshot.window_end);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_list_round_projects_dedups() {
        let (storage, _temp_db) = setup_storage().await;
        let snapshot = sample_snapshot();
        storage.upsert_round_snapshot(&snapshot).await.unwrap();

        let mut other_round = snapshot.clone();
        other_round.round_id = 3;
        storage.upsert_round_snapshot(&other_round).await.unwrap();

        let pairs = storage.list_round_projects(snapshot.chain_id).await.unwrap();
        assert_eq!(
            pairs,
            vec![
                (1, Address::repeat_byte(0xaa)),
                (1, Address::repeat_byte(0xbb)),
            ]
        );

        storage.close().await;
    }
}
