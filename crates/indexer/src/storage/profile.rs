//! Profile storage operations.

use super::{address_from_bytes, ProfileRecord, Storage};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use sqlx::Row;

impl Storage {
    /// Upsert a profile. Returns `true` if inserted or changed.
    pub async fn upsert_profile(&self, profile: &ProfileRecord) -> Result<bool> {
        let profile_json = profile
            .profile
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize profile")?;

        let result = sqlx::query(
            r#"
            INSERT INTO profiles (chain_id, account, profile_cid, profile_json, last_updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chain_id, account) DO UPDATE SET
                profile_cid = excluded.profile_cid,
                profile_json = excluded.profile_json,
                last_updated_at = excluded.last_updated_at
            WHERE excluded.last_updated_at >= profiles.last_updated_at
              AND (profiles.profile_cid IS NOT excluded.profile_cid
                OR profiles.profile_json IS NOT excluded.profile_json)
            "#,
        )
        .bind(profile.chain_id as i64)
        .bind(profile.account.as_slice())
        .bind(profile.profile_cid.as_deref())
        .bind(profile_json)
        .bind(profile.last_updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert profile")?;

        Ok(result.rows_affected() > 0)
    }

    /// Get the profile of an account.
    pub async fn get_profile(&self, chain_id: u64, account: Address) -> Result<Option<ProfileRecord>> {
        let row = sqlx::query(
            r#"
            SELECT chain_id, account, profile_cid, profile_json, last_updated_at
            FROM profiles
            WHERE chain_id = ? AND account = ?
            "#,
        )
        .bind(chain_id as i64)
        .bind(account.as_slice())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch profile")?;

        row.map(|row| {
            let account: Vec<u8> = row.get("account");
            let profile_json: Option<String> = row.get("profile_json");
            Ok(ProfileRecord {
                chain_id: row.get::<i64, _>("chain_id") as u64,
                account: address_from_bytes(&account)?,
                profile_cid: row.get("profile_cid"),
                profile: profile_json
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .context("Invalid stored profile JSON")?,
                last_updated_at: row.get("last_updated_at"),
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::setup_storage;
    use serde_json::json;

    #[tokio::test]
    async fn test_profile_resolves_after_pending() {
        let (storage, _temp_db) = setup_storage().await;
        let account = Address::repeat_byte(0x10);

        let mut profile = ProfileRecord {
            chain_id: 1,
            account,
            profile_cid: Some("bafyprofile".to_string()),
            profile: None,
            last_updated_at: 10,
        };
        assert!(storage.upsert_profile(&profile).await.unwrap());
        assert!(!storage.upsert_profile(&profile).await.unwrap());

        profile.profile = Some(json!({"name": "Ada"}));
        profile.last_updated_at = 20;
        assert!(storage.upsert_profile(&profile).await.unwrap());

        let stored = storage.get_profile(1, account).await.unwrap().unwrap();
        assert_eq!(stored.profile.unwrap()["name"], "Ada");
        assert!(storage.get_profile(2, account).await.unwrap().is_none());

        storage.close().await;
    }
}
