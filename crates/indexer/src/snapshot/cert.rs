//! Certificate snapshot indexer.
//!
//! Per network, in order:
//! 1. scan certificates above the stored high-water mark, passing over
//!    tokens whose reads revert
//! 2. re-read every stored certificate that is still pending or requested
//! 3. reconcile team rosters of every project seen in round snapshots
//! 4. reconcile eligibility through the iteration's middleware, using a
//!    checkpointed scan of role grant/revoke events to find new accounts;
//!    found accounts are stored with the checkpoint and stay candidates
//! 5. resolve profiles of certificate holders and team members
//!
//! Networks are processed one after another; reads that belong to one
//! certificate or one roster run concurrently.

use alloy::primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use roundmirror_core::CertStatus;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

use super::{SubIndexer, TickReport};
use crate::chain::{
    CertReader, ChainPoller, ChainPollerSet, FieldResult, RawCert, ReadError, SubIndexerKind,
};
use crate::content::{normalize_content_id, ContentCache};
use crate::storage::{
    now_secs, CertRecord, EligibilityRecord, ProfileRecord, ScanCheckpoint, Storage,
    TeamMemberRecord,
};

/// Mirrors certificates, rosters, eligibility and profiles.
#[derive(Clone)]
pub struct CertSnapshotIndexer {
    storage: Storage,
    content: ContentCache,
    pollers: ChainPollerSet,
    log_batch_size: u64,
}

/// Registry references of one iteration, read at most once per tick.
#[derive(Debug, Clone)]
struct IterationRefs {
    template_cid: FieldResult<Option<String>>,
    middleware: FieldResult<Option<Address>>,
}

/// Accounts an iteration's round snapshots know about.
#[derive(Debug, Default)]
struct IterationAccounts {
    people: BTreeSet<Address>,
    projects: BTreeSet<Address>,
}

/// Fresh value if read, stored value if the read was transient.
fn resolved<T: Clone>(result: &FieldResult<Option<T>>, stored: Option<T>) -> Option<T> {
    match result {
        Ok(value) => value.clone(),
        Err(ReadError::NotSupported(_)) => None,
        Err(_) => stored,
    }
}

impl CertSnapshotIndexer {
    /// Create the indexer. `log_batch_size` bounds the block span of one
    /// event query.
    pub fn new(
        storage: Storage,
        content: ContentCache,
        pollers: ChainPollerSet,
        log_batch_size: u64,
    ) -> Self {
        Self {
            storage,
            content,
            pollers,
            log_batch_size: log_batch_size.max(1),
        }
    }

    /// Index every active network, one at a time.
    pub async fn run_tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        for poller in self.pollers.active_for(SubIndexerKind::Certs) {
            let Some(reader) = poller.certs.as_deref() else {
                continue;
            };

            match self.index_network(poller, reader).await {
                Ok(network_report) => report.merge(network_report),
                Err(e) => {
                    warn!("Cert indexing failed for {}: {:#}", poller.name, e);
                    report.merge(TickReport::skipped_network());
                }
            }
        }

        info!("Cert tick complete: {}", report);
        Ok(report)
    }

    /// Index one network.
    pub async fn index_network(
        &self,
        poller: &ChainPoller,
        reader: &dyn CertReader,
    ) -> Result<TickReport> {
        if let Err(e) = reader.check_deployed().await {
            warn!("Skipping {} for certs: {}", poller.name, e);
            return Ok(TickReport::skipped_network());
        }

        let mut pass = NetworkPass {
            indexer: self,
            poller,
            reader,
            chain_id: reader.chain_id(),
            iterations: HashMap::new(),
            role_accounts: HashMap::new(),
            report: TickReport {
                networks_indexed: 1,
                ..TickReport::default()
            },
        };

        let scanned = pass.scan_new_certs().await?;
        pass.recheck_open_certs(&scanned).await?;
        pass.reconcile_teams().await?;
        pass.reconcile_eligibility().await?;
        pass.index_profiles().await?;

        debug!("{} certs: {}", poller.name, pass.report);
        Ok(pass.report)
    }
}

/// State of one network during one tick.
struct NetworkPass<'a> {
    indexer: &'a CertSnapshotIndexer,
    poller: &'a ChainPoller,
    reader: &'a dyn CertReader,
    chain_id: u64,
    iterations: HashMap<u64, IterationRefs>,
    role_accounts: HashMap<Address, Vec<Address>>,
    report: TickReport,
}

impl NetworkPass<'_> {
    fn storage(&self) -> &Storage {
        &self.indexer.storage
    }

    async fn iteration_refs(&mut self, iteration_id: u64) -> IterationRefs {
        if let Some(refs) = self.iterations.get(&iteration_id) {
            return refs.clone();
        }

        let (template_cid, middleware) = tokio::join!(
            self.reader.template_cid(iteration_id),
            self.reader.middleware(iteration_id),
        );
        let template_cid = template_cid.map(|cid| cid.as_deref().and_then(normalize_content_id));

        if let Ok(Some(cid)) = &template_cid {
            if self.indexer.content.get_or_fetch(cid).await.is_none() {
                debug!(
                    "{}: template {} of iteration {} not available yet",
                    self.poller.name, cid, iteration_id
                );
            }
        }

        let refs = IterationRefs {
            template_cid,
            middleware,
        };
        self.iterations.insert(iteration_id, refs.clone());
        refs
    }

    async fn read_cert(&self, token_id: u64) -> FieldResult<(RawCert, CertStatus)> {
        let (data, status) = tokio::join!(
            self.reader.cert(token_id),
            self.reader.cert_status(token_id)
        );
        Ok((data?, status?))
    }

    async fn store_cert(
        &mut self,
        token_id: u64,
        raw: RawCert,
        status: CertStatus,
        stored: Option<&CertRecord>,
    ) -> Result<()> {
        let refs = self.iteration_refs(raw.iteration_id).await;

        let record = CertRecord {
            chain_id: self.chain_id,
            cert_contract: self.reader.cert_registry(),
            token_id,
            iteration_id: raw.iteration_id,
            account: raw.account,
            cert_type: raw.cert_type,
            status,
            request_time: raw.request_time,
            middleware: resolved(&refs.middleware, stored.and_then(|s| s.middleware)),
            template_cid: resolved(
                &refs.template_cid,
                stored.and_then(|s| s.template_cid.clone()),
            ),
            last_updated_at: now_secs(),
        };

        let changed = self.storage().upsert_cert(&record).await?;
        self.report.record_write(changed);
        Ok(())
    }

    /// Fetch tokens above the high-water mark. A transient failure stops the
    /// scan so no readable id is ever skipped; a token whose reads revert is
    /// marked as passed.
    async fn scan_new_certs(&mut self) -> Result<HashSet<u64>> {
        let mut scanned = HashSet::new();

        let next_token_id = match self.reader.next_token_id().await {
            Ok(next) => next,
            Err(e) => {
                warn!("{}: cannot read next token id: {}", self.poller.name, e);
                self.report.skipped += 1;
                return Ok(scanned);
            }
        };

        let start = self.storage().max_cert_token_id(self.chain_id).await? + 1;
        for token_id in start..next_token_id {
            match self.read_cert(token_id).await {
                Ok((raw, status)) => {
                    self.store_cert(token_id, raw, status, None).await?;
                    scanned.insert(token_id);
                }
                Err(ReadError::NotSupported(e)) => {
                    warn!(
                        "{}: cert token {} unreadable, passing it: {}",
                        self.poller.name, token_id, e
                    );
                    self.storage()
                        .mark_cert_scanned(self.chain_id, token_id)
                        .await?;
                    self.report.skipped += 1;
                }
                Err(e) => {
                    warn!(
                        "{}: cert scan stopped at token {}: {}",
                        self.poller.name, token_id, e
                    );
                    self.report.skipped += 1;
                    break;
                }
            }
        }

        Ok(scanned)
    }

    async fn recheck_open_certs(&mut self, scanned: &HashSet<u64>) -> Result<()> {
        let open = self.storage().list_non_final_certs(self.chain_id).await?;

        for stored in open {
            if scanned.contains(&stored.token_id) {
                continue;
            }
            match self.read_cert(stored.token_id).await {
                Ok((raw, status)) => {
                    self.store_cert(stored.token_id, raw, status, Some(&stored))
                        .await?
                }
                Err(e) => {
                    debug!(
                        "{}: cert {} re-check failed: {}",
                        self.poller.name, stored.token_id, e
                    );
                    self.report.skipped += 1;
                }
            }
        }

        Ok(())
    }

    /// Upsert every readable member; delete absent members only when the
    /// whole roster was read.
    async fn reconcile_teams(&mut self) -> Result<()> {
        let pairs = self.storage().list_round_projects(self.chain_id).await?;

        for (iteration_id, project) in pairs {
            let roster = match self.reader.team_members(iteration_id, project).await {
                Ok(roster) => roster,
                Err(e) => {
                    debug!(
                        "{}: roster of {} (iteration {}) unavailable: {}",
                        self.poller.name, project, iteration_id, e
                    );
                    self.report.skipped += 1;
                    continue;
                }
            };

            let reads = join_all(
                roster
                    .iter()
                    .map(|member| self.reader.team_member(iteration_id, project, *member)),
            )
            .await;

            let mut complete = true;
            for (member, read) in roster.iter().zip(reads) {
                match read {
                    Ok(raw) => {
                        let record = TeamMemberRecord {
                            chain_id: self.chain_id,
                            iteration_id,
                            project,
                            member: *member,
                            status: raw.status,
                            full_name: raw.full_name,
                            last_updated_at: now_secs(),
                        };
                        let changed = self.storage().upsert_team_member(&record).await?;
                        self.report.record_write(changed);
                    }
                    Err(e) => {
                        debug!("{}: member {} of {}: {}", self.poller.name, member, project, e);
                        complete = false;
                        self.report.skipped += 1;
                    }
                }
            }

            if complete {
                let deleted = self
                    .storage()
                    .delete_team_members_not_in(self.chain_id, iteration_id, project, &roster)
                    .await?;
                self.report.deleted += deleted as usize;
            } else {
                warn!(
                    "{}: roster of {} (iteration {}) incomplete, not deleting absent members",
                    self.poller.name, project, iteration_id
                );
            }
        }

        Ok(())
    }

    /// Every account the middleware's role events have named, after
    /// scanning forward from its checkpoint.
    async fn role_event_accounts(&mut self, middleware: Address) -> Result<Vec<Address>> {
        if let Some(accounts) = self.role_accounts.get(&middleware) {
            return Ok(accounts.clone());
        }

        self.scan_role_events(middleware).await?;
        let accounts = self
            .storage()
            .list_role_event_accounts(self.chain_id, middleware)
            .await?;
        self.role_accounts.insert(middleware, accounts.clone());
        Ok(accounts)
    }

    /// Scan in chunks of `log_batch_size` blocks. The checkpoint moves past
    /// a chunk only when both event queries for it succeeded, and in the
    /// same transaction that records the chunk's accounts.
    async fn scan_role_events(&mut self, middleware: Address) -> Result<()> {
        let head = match self.reader.block_number().await {
            Ok(head) => head,
            Err(e) => {
                warn!("{}: cannot read block number: {}", self.poller.name, e);
                self.report.skipped += 1;
                return Ok(());
            }
        };

        let mut from = self
            .storage()
            .get_checkpoint(self.chain_id, middleware)
            .await?
            .unwrap_or(self.poller.event_start_block);
        let batch = self.indexer.log_batch_size;

        while from <= head {
            let to = head.min(from.saturating_add(batch - 1));

            let (granted, revoked) = tokio::join!(
                self.reader.role_granted_accounts(middleware, from, to),
                self.reader.role_revoked_accounts(middleware, from, to),
            );

            match (granted, revoked) {
                (Ok(granted), Ok(revoked)) => {
                    let accounts: Vec<Address> = granted
                        .into_iter()
                        .chain(revoked)
                        .collect::<BTreeSet<_>>()
                        .into_iter()
                        .collect();
                    self.storage()
                        .advance_checkpoint_with_accounts(
                            &ScanCheckpoint {
                                chain_id: self.chain_id,
                                source: middleware,
                                next_block: to + 1,
                            },
                            &accounts,
                        )
                        .await?;
                    from = to + 1;
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!(
                        "{}: role event scan of {} stopped at block {}: {}",
                        self.poller.name, middleware, from, e
                    );
                    self.report.skipped += 1;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Revalidate every candidate account of every iteration.
    async fn reconcile_eligibility(&mut self) -> Result<()> {
        let snapshots = self.storage().list_round_snapshots(self.chain_id).await?;

        let mut by_iteration: BTreeMap<u64, IterationAccounts> = BTreeMap::new();
        for snapshot in snapshots {
            let accounts = by_iteration.entry(snapshot.iteration_id).or_default();
            accounts.people.extend(snapshot.dev_rel_account);
            accounts.people.extend(snapshot.dao_hic_voters);
            accounts
                .projects
                .extend(snapshot.projects.iter().map(|p| p.address));
        }

        for (iteration_id, accounts) in by_iteration {
            let middleware = match self.iteration_refs(iteration_id).await.middleware {
                Ok(Some(middleware)) => middleware,
                Ok(None) => continue,
                Err(e) => {
                    debug!(
                        "{}: middleware of iteration {} unavailable: {}",
                        self.poller.name, iteration_id, e
                    );
                    self.report.skipped += 1;
                    continue;
                }
            };

            let mut candidates: BTreeSet<Address> = accounts.people.clone();
            candidates.extend(accounts.projects.iter().copied());
            candidates.extend(self.role_event_accounts(middleware).await?);
            candidates.extend(
                self.storage()
                    .list_eligibility(self.chain_id, iteration_id)
                    .await?
                    .into_iter()
                    .map(|record| record.account),
            );

            for account in candidates {
                let check = match self.reader.is_eligible(middleware, account).await {
                    Ok(check) => check,
                    Err(e) => {
                        debug!("{}: eligibility of {}: {}", self.poller.name, account, e);
                        self.report.skipped += 1;
                        continue;
                    }
                };

                let is_project = accounts.projects.contains(&account);
                let has_named_team_members = is_project
                    && self
                        .storage()
                        .has_named_team_members(self.chain_id, iteration_id, account)
                        .await?;

                let record = EligibilityRecord {
                    chain_id: self.chain_id,
                    iteration_id,
                    account,
                    eligible: check.eligible,
                    cert_type: check.cert_type,
                    is_project,
                    has_named_team_members,
                    last_updated_at: now_secs(),
                };
                let changed = self.storage().upsert_eligibility(&record).await?;
                self.report.record_write(changed);
            }
        }

        Ok(())
    }

    async fn index_profiles(&mut self) -> Result<()> {
        if !self.reader.supports_profiles() {
            return Ok(());
        }

        let mut accounts: BTreeSet<Address> = self
            .storage()
            .list_certs(self.chain_id)
            .await?
            .into_iter()
            .map(|cert| cert.account)
            .collect();
        accounts.extend(self.storage().list_team_member_accounts(self.chain_id).await?);

        for account in accounts {
            let profile_cid = match self.reader.profile_cid(account).await {
                Ok(cid) => cid.as_deref().and_then(normalize_content_id),
                Err(e) => {
                    debug!("{}: profile of {}: {}", self.poller.name, account, e);
                    self.report.skipped += 1;
                    continue;
                }
            };

            let profile = match &profile_cid {
                Some(cid) => self.indexer.content.get_or_fetch(cid).await,
                None => None,
            };

            let record = ProfileRecord {
                chain_id: self.chain_id,
                account,
                profile_cid,
                profile,
                last_updated_at: now_secs(),
            };
            let changed = self.storage().upsert_profile(&record).await?;
            self.report.record_write(changed);
        }

        Ok(())
    }
}

#[async_trait]
impl SubIndexer for CertSnapshotIndexer {
    fn kind(&self) -> SubIndexerKind {
        SubIndexerKind::Certs
    }

    async fn tick(&self) -> Result<TickReport> {
        self.run_tick().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_prefers_fresh_then_stored() {
        let stored = Some("old".to_string());

        assert_eq!(
            resolved(&Ok(Some("new".to_string())), stored.clone()),
            Some("new".to_string())
        );
        assert_eq!(resolved(&Ok(None), stored.clone()), None);
        assert_eq!(
            resolved::<String>(&Err(ReadError::Transient("t".into())), stored.clone()),
            stored
        );
        assert_eq!(
            resolved::<String>(&Err(ReadError::NotSupported("n".into())), stored),
            None
        );
    }
}
