//! Iteration snapshot indexer.
//!
//! Walks iterations and their rounds on every active network, reads the raw
//! round flags in one concurrent batch, derives lifecycle state and winner,
//! resolves project metadata through the content cache and upserts one
//! [`RoundSnapshot`] per round.
//!
//! Field fallback rules:
//! - a read the contract does not support resolves to the field's default
//! - a transient failure keeps the value stored by the previous snapshot
//! - a transient failure of a lifecycle-critical field (mode, activation,
//!   end flag, window, locks) on a round with no previous snapshot skips
//!   the round for this tick
//! - a stale activation or end flag is recovered from the stored lifecycle
//!   state only when no fresher higher-priority flag already decides it

use alloy::primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use roundmirror_core::tally::ScoreBreakdown;
use roundmirror_core::{
    consensus_winner, derive_lifecycle_partial, effective_mode, Entity, EntityVotes,
    LifecycleState, PartialRoundFlags, TallyOperation, VotingMode, Winner, FIRST_PROJECT_INDEX,
};
use tracing::{debug, info, warn};

use super::{SubIndexer, TickReport};
use crate::chain::{
    ChainPoller, ChainPollerSet, FieldResult, ReadError, RoundReader, RoundRef, SubIndexerKind,
};
use crate::content::{normalize_content_id, ContentCache};
use crate::storage::{now_secs, ProjectEntry, RoundSnapshot, Storage};

/// What happened to one round during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The stored payload changed.
    Written,
    /// Same payload as stored.
    Unchanged,
    /// Not enough fresh state to store anything.
    Skipped,
}

fn is_stale<T>(result: &FieldResult<T>) -> bool {
    matches!(result, Err(ReadError::Transient(_) | ReadError::NoCode(_)))
}

/// Per-field fallback against the previous snapshot of a round.
struct FieldResolver<'a> {
    label: &'a str,
    previous: Option<&'a RoundSnapshot>,
    missing: Vec<&'static str>,
}

impl<'a> FieldResolver<'a> {
    fn new(label: &'a str, previous: Option<&'a RoundSnapshot>) -> Self {
        Self {
            label,
            previous,
            missing: Vec::new(),
        }
    }

    fn field<T>(
        &mut self,
        name: &'static str,
        result: FieldResult<T>,
        carried: impl FnOnce(&RoundSnapshot) -> T,
        default: T,
    ) -> T {
        match result {
            Ok(value) => value,
            Err(ReadError::NotSupported(e)) => {
                debug!("{}: {} not supported ({}), using default", self.label, name, e);
                default
            }
            Err(e) => match self.previous {
                Some(previous) => {
                    debug!("{}: {} failed ({}), keeping stored value", self.label, name, e);
                    carried(previous)
                }
                None => default,
            },
        }
    }

    fn critical<T>(
        &mut self,
        name: &'static str,
        result: FieldResult<T>,
        carried: impl FnOnce(&RoundSnapshot) -> T,
        default: T,
    ) -> T {
        if self.previous.is_none() && is_stale(&result) {
            self.missing.push(name);
        }
        self.field(name, result, carried, default)
    }

    /// A raw flag that only feeds the lifecycle derivation. A stale read
    /// falls back to the value the stored state implies; `None` means that
    /// value cannot be recovered.
    fn flag(
        &mut self,
        name: &'static str,
        result: FieldResult<bool>,
        implied: impl FnOnce(&LifecycleState) -> Option<bool>,
    ) -> Option<bool> {
        match result {
            Ok(value) => Some(value),
            Err(ReadError::NotSupported(_)) => Some(false),
            Err(e) => {
                debug!("{}: {} failed ({})", self.label, name, e);
                match self.previous {
                    Some(previous) => implied(&previous.lifecycle_state),
                    None => {
                        self.missing.push(name);
                        None
                    }
                }
            }
        }
    }
}

/// Local tally from fresh inputs, when the remote tally is unavailable.
fn local_winner(
    operation: TallyOperation,
    fresh_votes: Option<&EntityVotes>,
    breakdown: Option<&FieldResult<ScoreBreakdown>>,
) -> Option<Winner> {
    match operation {
        TallyOperation::Consensus => fresh_votes.map(consensus_winner),
        TallyOperation::Weighted => match breakdown {
            Some(Ok(breakdown)) => Some(breakdown.winner()),
            _ => None,
        },
    }
}

/// Mirrors rounds into [`RoundSnapshot`] records.
#[derive(Clone)]
pub struct IterationSnapshotIndexer {
    storage: Storage,
    content: ContentCache,
    pollers: ChainPollerSet,
}

impl IterationSnapshotIndexer {
    /// Create the indexer.
    pub fn new(storage: Storage, content: ContentCache, pollers: ChainPollerSet) -> Self {
        Self {
            storage,
            content,
            pollers,
        }
    }

    /// Index every active network concurrently.
    pub async fn run_tick(&self) -> Result<TickReport> {
        let networks = self.pollers.active_for(SubIndexerKind::Iterations);
        let results = join_all(networks.iter().map(|poller| self.index_network(poller))).await;

        let mut report = TickReport::default();
        for (poller, result) in networks.iter().zip(results) {
            match result {
                Ok(network_report) => report.merge(network_report),
                Err(e) => {
                    warn!("Iteration indexing failed for {}: {:#}", poller.name, e);
                    report.merge(TickReport::skipped_network());
                }
            }
        }

        info!("Iteration tick complete: {}", report);
        Ok(report)
    }

    /// Index one network. Remote failures skip the network or the item;
    /// store failures are returned.
    pub async fn index_network(&self, poller: &ChainPoller) -> Result<TickReport> {
        let reader = poller.rounds.as_ref();

        if let Err(e) = reader.check_deployed().await {
            warn!("Skipping {} for iterations: {}", poller.name, e);
            return Ok(TickReport::skipped_network());
        }

        let block = match reader.block_number().await {
            Ok(block) => block,
            Err(e) => {
                warn!("Skipping {}: cannot read block number: {}", poller.name, e);
                return Ok(TickReport::skipped_network());
            }
        };

        let iteration_ids = match reader.iteration_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Skipping {}: cannot list iterations: {}", poller.name, e);
                return Ok(TickReport::skipped_network());
            }
        };

        let mut report = TickReport {
            networks_indexed: 1,
            ..TickReport::default()
        };

        for iteration_id in iteration_ids {
            let rounds = match reader.rounds(iteration_id).await {
                Ok(rounds) => rounds,
                Err(e) => {
                    warn!(
                        "{}: cannot list rounds of iteration {}: {}",
                        poller.name, iteration_id, e
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            for round in rounds {
                match self.index_round(reader, iteration_id, round, block).await? {
                    RoundOutcome::Written => report.written += 1,
                    RoundOutcome::Unchanged => report.unchanged += 1,
                    RoundOutcome::Skipped => report.skipped += 1,
                }
            }
        }

        debug!("{} at block {}: {}", poller.name, block, report);
        Ok(report)
    }

    /// Read, derive and store one round.
    pub async fn index_round(
        &self,
        reader: &dyn RoundReader,
        iteration_id: u64,
        round: RoundRef,
        block: u64,
    ) -> Result<RoundOutcome> {
        let chain_id = reader.chain_id();
        let jury = round.jury_contract;
        let label = format!(
            "chain {} iteration {} round {}",
            chain_id, iteration_id, round.round_id
        );

        let previous = self
            .storage
            .get_round_snapshot(chain_id, iteration_id, round.round_id)
            .await?;

        let (
            mode_override,
            pairing_contract,
            contract_mode,
            is_active,
            voting_ended,
            window,
            locks,
            dev_rel_account,
            dao_hic_voters,
            dev_rel_vote,
            dao_hic_vote,
            community_vote,
            participation,
            project_count,
        ) = tokio::join!(
            reader.mode_override(iteration_id, round.round_id),
            reader.pairing_contract(jury),
            reader.voting_mode(jury),
            reader.is_active(jury),
            reader.voting_ended(jury),
            reader.voting_window(jury),
            reader.locks(jury),
            reader.dev_rel_account(jury),
            reader.dao_hic_voters(jury),
            reader.entity_vote(jury, Entity::DevRel),
            reader.entity_vote(jury, Entity::DaoHic),
            reader.entity_vote(jury, Entity::Community),
            reader.participation(jury),
            reader.project_count(jury),
        );

        let mut fields = FieldResolver::new(&label, previous.as_ref());

        let mode_override = fields.critical(
            "mode override",
            mode_override,
            |p| p.mode_overridden.then_some(p.voting_mode),
            None,
        );
        let contract_mode = match mode_override {
            Some(_) => contract_mode.unwrap_or(VotingMode::Consensus),
            None => fields.critical(
                "voting mode",
                contract_mode,
                |p| p.voting_mode,
                VotingMode::Consensus,
            ),
        };
        let voting_mode = effective_mode(contract_mode, mode_override);

        let (window_start, window_end) = fields.critical(
            "voting window",
            window,
            |p| (p.window_start, p.window_end),
            (0, 0),
        );
        let locks = fields.critical("locks", locks, |p| p.locks, Default::default());
        let is_active = fields.flag("isActive", is_active, LifecycleState::implied_is_active);
        let voting_ended = fields.flag(
            "votingEnded",
            voting_ended,
            LifecycleState::implied_voting_ended,
        );

        if !fields.missing.is_empty() {
            warn!(
                "Skipping {}: no stored snapshot and stale {}",
                label,
                fields.missing.join(", ")
            );
            return Ok(RoundOutcome::Skipped);
        }

        let Some(lifecycle_state) = derive_lifecycle_partial(&PartialRoundFlags {
            fully_locked: locks.fully_locked,
            voting_ended,
            is_active,
            window_start,
        }) else {
            warn!("Skipping {}: lifecycle undetermined from stale flags", label);
            return Ok(RoundOutcome::Skipped);
        };
        let ended = voting_ended.unwrap_or(lifecycle_state == LifecycleState::Locked);

        let pairing_contract =
            fields.field("pairing contract", pairing_contract, |p| p.pairing_contract, None);
        let dev_rel_account =
            fields.field("devRel account", dev_rel_account, |p| p.dev_rel_account, None);
        let dao_hic_voters = fields.field(
            "daoHic voters",
            dao_hic_voters,
            |p| p.dao_hic_voters.clone(),
            Vec::new(),
        );
        let participation = fields.field(
            "participation",
            participation,
            |p| p.participation,
            Default::default(),
        );

        let votes_fresh =
            !(is_stale(&dev_rel_vote) || is_stale(&dao_hic_vote) || is_stale(&community_vote));
        let mut entity_votes = EntityVotes::default();
        for (entity, vote) in [
            (Entity::DevRel, dev_rel_vote),
            (Entity::DaoHic, dao_hic_vote),
            (Entity::Community, community_vote),
        ] {
            let vote = fields.field(entity.as_str(), vote, |p| p.entity_votes.get(entity), None);
            entity_votes.set(entity, vote);
        }

        let operation = TallyOperation::for_mode(voting_mode);
        let winner_read = reader.winner(jury, operation).await;
        let breakdown = if voting_mode == VotingMode::Weighted && (ended || is_stale(&winner_read))
        {
            Some(reader.score_breakdown(jury).await)
        } else {
            None
        };

        let winner = match winner_read {
            Ok(winner) => winner,
            Err(ReadError::NotSupported(_)) => Winner::none(),
            Err(e) => {
                let fresh_votes = votes_fresh.then_some(&entity_votes);
                match local_winner(operation, fresh_votes, breakdown.as_ref()) {
                    Some(winner) => {
                        debug!("{}: tally read failed ({}), derived locally", label, e);
                        winner
                    }
                    None => previous.as_ref().map(|p| p.winner).unwrap_or_default(),
                }
            }
        };

        let scores = match breakdown {
            Some(Ok(breakdown)) if ended => Some(breakdown),
            Some(Err(ReadError::Transient(_) | ReadError::NoCode(_))) if ended => {
                previous.as_ref().and_then(|p| p.scores.clone())
            }
            _ => None,
        };

        let projects = self
            .resolve_projects(
                reader,
                &label,
                iteration_id,
                &round,
                project_count,
                previous.as_ref(),
            )
            .await;

        let snapshot = RoundSnapshot {
            chain_id,
            iteration_id,
            round_id: round.round_id,
            registry: reader.registry(),
            jury_contract: jury,
            pairing_contract,
            lifecycle_state,
            window_start,
            window_end,
            voting_mode,
            mode_overridden: mode_override.is_some(),
            locks,
            winner,
            entity_votes,
            participation,
            dev_rel_account,
            dao_hic_voters,
            scores,
            projects,
            last_observed_block: block,
            last_updated_at: now_secs(),
        };

        if self.storage.upsert_round_snapshot(&snapshot).await? {
            debug!("{}: stored ({})", label, lifecycle_state);
            Ok(RoundOutcome::Written)
        } else {
            Ok(RoundOutcome::Unchanged)
        }
    }

    /// Read the project list (all-or-nothing) and resolve metadata.
    async fn resolve_projects(
        &self,
        reader: &dyn RoundReader,
        label: &str,
        iteration_id: u64,
        round: &RoundRef,
        project_count: FieldResult<u64>,
        previous: Option<&RoundSnapshot>,
    ) -> Vec<ProjectEntry> {
        let carried = || previous.map(|p| p.projects.clone()).unwrap_or_default();

        let count = match project_count {
            Ok(count) => count,
            Err(ReadError::NotSupported(_)) => 0,
            Err(e) => {
                debug!("{}: projectCount failed ({}), keeping stored projects", label, e);
                return carried();
            }
        };

        let reads = join_all(
            (FIRST_PROJECT_INDEX..FIRST_PROJECT_INDEX + count)
                .map(|index| reader.project_address(round.jury_contract, index)),
        )
        .await;
        let addresses = match reads.into_iter().collect::<FieldResult<Vec<Address>>>() {
            Ok(addresses) => addresses,
            Err(e) => {
                debug!("{}: project list incomplete ({}), keeping stored projects", label, e);
                return carried();
            }
        };

        if addresses.is_empty() {
            return Vec::new();
        }

        let stored_cid = |address: &Address| {
            previous
                .and_then(|p| p.projects.iter().find(|e| e.address == *address))
                .and_then(|e| e.metadata_cid.clone())
        };

        let cids: Vec<Option<String>> = match reader
            .project_metadata_cids(iteration_id, round.round_id, &addresses)
            .await
        {
            Ok(cids) => cids.iter().map(|c| normalize_content_id(c)).collect(),
            Err(ReadError::NotSupported(_)) => vec![None; addresses.len()],
            Err(e) => {
                debug!("{}: metadata ids failed ({}), keeping stored ids", label, e);
                addresses.iter().map(stored_cid).collect()
            }
        };

        let metadata = join_all(cids.iter().map(|cid| async move {
            match cid {
                Some(cid) => self.content.get_or_fetch(cid).await,
                None => None,
            }
        }))
        .await;

        addresses
            .into_iter()
            .zip(cids)
            .zip(metadata)
            .map(|((address, metadata_cid), metadata)| ProjectEntry {
                address,
                metadata_cid,
                metadata,
            })
            .collect()
    }
}

#[async_trait]
impl SubIndexer for IterationSnapshotIndexer {
    fn kind(&self) -> SubIndexerKind {
        SubIndexerKind::Iterations
    }

    async fn tick(&self) -> Result<TickReport> {
        self.run_tick().await
    }
}
