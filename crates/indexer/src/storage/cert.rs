//! Certificate storage operations.

use super::{address_from_bytes, now_secs, optional_address, CertRecord, Storage};
use anyhow::{Context, Result};
use roundmirror_core::CertStatus;
use sqlx::Row;

impl Storage {
    /// Upsert a certificate.
    ///
    /// Returns `true` if the row was inserted or changed. Identical records
    /// and records older than the stored one are ignored.
    pub async fn upsert_cert(&self, cert: &CertRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO certs (
                chain_id, token_id, cert_contract, iteration_id, account,
                cert_type, status, request_time, middleware, template_cid,
                last_updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chain_id, token_id) DO UPDATE SET
                cert_contract = excluded.cert_contract,
                iteration_id = excluded.iteration_id,
                account = excluded.account,
                cert_type = excluded.cert_type,
                status = excluded.status,
                request_time = excluded.request_time,
                middleware = excluded.middleware,
                template_cid = excluded.template_cid,
                last_updated_at = excluded.last_updated_at
            WHERE excluded.last_updated_at >= certs.last_updated_at
              AND (certs.cert_contract IS NOT excluded.cert_contract
                OR certs.iteration_id IS NOT excluded.iteration_id
                OR certs.account IS NOT excluded.account
                OR certs.cert_type IS NOT excluded.cert_type
                OR certs.status IS NOT excluded.status
                OR certs.request_time IS NOT excluded.request_time
                OR certs.middleware IS NOT excluded.middleware
                OR certs.template_cid IS NOT excluded.template_cid)
            "#,
        )
        .bind(cert.chain_id as i64)
        .bind(cert.token_id as i64)
        .bind(cert.cert_contract.as_slice())
        .bind(cert.iteration_id as i64)
        .bind(cert.account.as_slice())
        .bind(&cert.cert_type)
        .bind(cert.status.as_str())
        .bind(cert.request_time as i64)
        .bind(cert.middleware.as_ref().map(|a| a.as_slice()))
        .bind(cert.template_cid.as_deref())
        .bind(cert.last_updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert cert")?;

        Ok(result.rows_affected() > 0)
    }

    /// Highest token id the scan has passed for a network (0 if none):
    /// the larger of the highest stored cert and the scan mark.
    pub async fn max_cert_token_id(&self, chain_id: u64) -> Result<u64> {
        let max: i64 = sqlx::query_scalar(
            r#"
            SELECT MAX(
                COALESCE((SELECT MAX(token_id) FROM certs WHERE chain_id = ?), 0),
                COALESCE((SELECT last_token_id FROM cert_scan_marks WHERE chain_id = ?), 0)
            )
            "#,
        )
        .bind(chain_id as i64)
        .bind(chain_id as i64)
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch max cert token id")?;

        Ok(max as u64)
    }

    /// Let the scan pass a token id that will never be stored as a cert.
    /// The mark only moves forward.
    pub async fn mark_cert_scanned(&self, chain_id: u64, token_id: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cert_scan_marks (chain_id, last_token_id, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(chain_id) DO UPDATE SET
                last_token_id = excluded.last_token_id,
                updated_at = excluded.updated_at
            WHERE excluded.last_token_id > cert_scan_marks.last_token_id
            "#,
        )
        .bind(chain_id as i64)
        .bind(token_id as i64)
        .bind(now_secs())
        .execute(&self.pool)
        .await
        .context("Failed to mark cert token scanned")?;

        Ok(())
    }

    /// Get one certificate.
    pub async fn get_cert(&self, chain_id: u64, token_id: u64) -> Result<Option<CertRecord>> {
        let row = sqlx::query(
            r#"
            SELECT chain_id, token_id, cert_contract, iteration_id, account,
                   cert_type, status, request_time, middleware, template_cid,
                   last_updated_at
            FROM certs
            WHERE chain_id = ? AND token_id = ?
            "#,
        )
        .bind(chain_id as i64)
        .bind(token_id as i64)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch cert")?;

        row.map(Self::row_to_cert_record).transpose()
    }

    /// Certificates whose status can still change (pending or requested).
    pub async fn list_non_final_certs(&self, chain_id: u64) -> Result<Vec<CertRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT chain_id, token_id, cert_contract, iteration_id, account,
                   cert_type, status, request_time, middleware, template_cid,
                   last_updated_at
            FROM certs
            WHERE chain_id = ? AND status IN (?, ?)
            ORDER BY token_id
            "#,
        )
        .bind(chain_id as i64)
        .bind(CertStatus::Pending.as_str())
        .bind(CertStatus::Requested.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list non-final certs")?;

        rows.into_iter().map(Self::row_to_cert_record).collect()
    }

    /// All certificates of a network, by token id.
    pub async fn list_certs(&self, chain_id: u64) -> Result<Vec<CertRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT chain_id, token_id, cert_contract, iteration_id, account,
                   cert_type, status, request_time, middleware, template_cid,
                   last_updated_at
            FROM certs
            WHERE chain_id = ?
            ORDER BY token_id
            "#,
        )
        .bind(chain_id as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list certs")?;

        rows.into_iter().map(Self::row_to_cert_record).collect()
    }

    fn row_to_cert_record(row: sqlx::sqlite::SqliteRow) -> Result<CertRecord> {
        let contract: Vec<u8> = row.get("cert_contract");
        let account: Vec<u8> = row.get("account");
        let status: String = row.get("status");

        Ok(CertRecord {
            chain_id: row.get::<i64, _>("chain_id") as u64,
            cert_contract: address_from_bytes(&contract)?,
            token_id: row.get::<i64, _>("token_id") as u64,
            iteration_id: row.get::<i64, _>("iteration_id") as u64,
            account: address_from_bytes(&account)?,
            cert_type: row.get("cert_type"),
            status: status.parse()?,
            request_time: row.get::<i64, _>("request_time") as u64,
            middleware: optional_address(row.get("middleware"))?,
            template_cid: row.get("template_cid"),
            last_updated_at: row.get("last_updated_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::setup_storage;
    use alloy::primitives::Address;

    fn cert(token_id: u64, status: CertStatus) -> CertRecord {
        CertRecord {
            chain_id: 1,
            cert_contract: Address::repeat_byte(0xce),
            token_id,
            iteration_id: 1,
            account: Address::repeat_byte(token_id as u8),
            cert_type: "participant".to_string(),
            status,
            request_time: 1_700_000_000,
            middleware: Some(Address::repeat_byte(0x4d)),
            template_cid: None,
            last_updated_at: 1_700_000_100,
        }
    }

    #[tokio::test]
    async fn test_cert_upsert_and_high_water_mark() {
        let (storage, _temp_db) = setup_storage().await;

        assert_eq!(storage.max_cert_token_id(1).await.unwrap(), 0);

        assert!(storage.upsert_cert(&cert(1, CertStatus::Minted)).await.unwrap());
        assert!(storage.upsert_cert(&cert(2, CertStatus::Requested)).await.unwrap());
        assert_eq!(storage.max_cert_token_id(1).await.unwrap(), 2);
        assert_eq!(storage.max_cert_token_id(2).await.unwrap(), 0);

        // Identical record: no change.
        assert!(!storage.upsert_cert(&cert(2, CertStatus::Requested)).await.unwrap());

        // An unreadable token moves the mark past the stored certs only.
        storage.mark_cert_scanned(1, 4).await.unwrap();
        assert_eq!(storage.max_cert_token_id(1).await.unwrap(), 4);
        storage.mark_cert_scanned(1, 3).await.unwrap();
        assert_eq!(storage.max_cert_token_id(1).await.unwrap(), 4);
        assert!(storage.upsert_cert(&cert(6, CertStatus::Minted)).await.unwrap());
        assert_eq!(storage.max_cert_token_id(1).await.unwrap(), 6);
        assert_eq!(storage.max_cert_token_id(2).await.unwrap(), 0);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_non_final_listing_follows_status() {
        let (storage, _temp_db) = setup_storage().await;

        storage.upsert_cert(&cert(1, CertStatus::Minted)).await.unwrap();
        storage.upsert_cert(&cert(2, CertStatus::Requested)).await.unwrap();
        storage.upsert_cert(&cert(3, CertStatus::Pending)).await.unwrap();
        storage.upsert_cert(&cert(4, CertStatus::Cancelled)).await.unwrap();

        let ids: Vec<u64> = storage
            .list_non_final_certs(1)
            .await
            .unwrap()
            .iter()
            .map(|c| c.token_id)
            .collect();
        assert_eq!(ids, vec![2, 3]);

        let mut minted = cert(2, CertStatus::Minted);
        minted.last_updated_at += 10;
        assert!(storage.upsert_cert(&minted).await.unwrap());

        let ids: Vec<u64> = storage
            .list_non_final_certs(1)
            .await
            .unwrap()
            .iter()
            .map(|c| c.token_id)
            .collect();
        assert_eq!(ids, vec![3]);

        let stored = storage.get_cert(1, 2).await.unwrap().unwrap();
        assert_eq!(stored.status, CertStatus::Minted);

        storage.close().await;
    }
}
