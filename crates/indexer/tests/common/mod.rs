//! In-memory remote reads and content for driving the sub-indexers.

#![allow(dead_code)]

use alloy::primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use roundmirror_core::tally::ScoreBreakdown;
use roundmirror_core::{
    CertStatus, Entity, LifecycleState, Locks, ParticipationCounts, TallyOperation, VotingMode,
    Winner,
};
use roundmirror_indexer::chain::{
    CertReader, ChainPoller, ChainPollerSet, EligibilityCheck, FieldResult, RawCert,
    RawTeamMember, ReadError, RoundReader, RoundRef,
};
use roundmirror_indexer::content::{ContentCache, ContentFetcher};
use roundmirror_indexer::retry::{BackoffPolicy, RetryTracker};
use roundmirror_indexer::storage::{ProjectEntry, RoundSnapshot, Storage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::NamedTempFile;

pub const CHAIN_ID: u64 = 11155111;

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn transient() -> ReadError {
    ReadError::Transient("connection reset".to_string())
}

pub fn not_supported() -> ReadError {
    ReadError::NotSupported("execution reverted".to_string())
}

/// Storage, content cache and fetcher over a temporary database.
pub struct Harness {
    pub storage: Storage,
    pub fetcher: Arc<MockFetcher>,
    pub content: ContentCache,
    _temp_db: NamedTempFile,
}

pub async fn harness() -> Harness {
    let temp_db = NamedTempFile::new().unwrap();
    let storage = Storage::new_with_path(temp_db.path(), None, None)
        .await
        .unwrap();
    storage.run_migrations().await.unwrap();

    let fetcher = Arc::new(MockFetcher::default());
    let retry = RetryTracker::new(
        storage.clone(),
        BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(3600)),
    );
    let content = ContentCache::new(storage.clone(), retry, fetcher.clone());

    Harness {
        storage,
        fetcher,
        content,
        _temp_db: temp_db,
    }
}

pub fn poller(
    chain_id: u64,
    rounds: Arc<MockRoundReader>,
    certs: Option<Arc<MockCertReader>>,
) -> ChainPoller {
    ChainPoller {
        chain_id,
        name: format!("chain-{}", chain_id),
        event_start_block: 0,
        rounds,
        certs: certs.map(|c| c as Arc<dyn CertReader>),
    }
}

pub fn poller_set(pollers: Vec<ChainPoller>) -> ChainPollerSet {
    ChainPollerSet::new(pollers, None)
}

// ---------------------------------------------------------------------------
// Content

/// Content fetcher backed by a map; unknown ids fail.
#[derive(Default)]
pub struct MockFetcher {
    blobs: Mutex<HashMap<String, String>>,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn insert(&self, content_id: &str, json: &str) {
        self.blobs
            .lock()
            .unwrap()
            .insert(content_id.to_string(), json.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    async fn fetch(&self, content_id: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.blobs
            .lock()
            .unwrap()
            .get(content_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("gateway timeout for {}", content_id))
    }
}

// ---------------------------------------------------------------------------
// Rounds

/// Raw state of one jury contract.
#[derive(Debug, Clone)]
pub struct JuryState {
    pub pairing_contract: FieldResult<Option<Address>>,
    pub voting_mode: FieldResult<VotingMode>,
    pub is_active: FieldResult<bool>,
    pub voting_ended: FieldResult<bool>,
    pub window: FieldResult<(u64, u64)>,
    pub locks: FieldResult<Locks>,
    pub dev_rel_account: FieldResult<Option<Address>>,
    pub dao_hic_voters: FieldResult<Vec<Address>>,
    pub votes: HashMap<Entity, FieldResult<Option<Address>>>,
    pub participation: FieldResult<ParticipationCounts>,
    pub project_count: Option<FieldResult<u64>>,
    pub projects: Vec<Address>,
    pub failing_project_index: Option<u64>,
    pub consensus_winner: FieldResult<Winner>,
    pub weighted_winner: FieldResult<Winner>,
    pub breakdown: FieldResult<ScoreBreakdown>,
}

impl JuryState {
    /// An open consensus round with two projects and no votes.
    pub fn active() -> Self {
        Self {
            pairing_contract: Ok(None),
            voting_mode: Ok(VotingMode::Consensus),
            is_active: Ok(true),
            voting_ended: Ok(false),
            window: Ok((1_700_000_000, 1_700_086_400)),
            locks: Ok(Locks::default()),
            dev_rel_account: Ok(Some(addr(0xd1))),
            dao_hic_voters: Ok(vec![addr(0xd2), addr(0xd3)]),
            votes: Entity::ALL.iter().map(|e| (*e, Ok(None))).collect(),
            participation: Ok(ParticipationCounts::default()),
            project_count: None,
            projects: vec![addr(0xa1), addr(0xa2)],
            failing_project_index: None,
            consensus_winner: Ok(Winner::none()),
            weighted_winner: Ok(Winner::none()),
            breakdown: Err(not_supported()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoundState {
    pub registry: Address,
    pub deployed: FieldResult<()>,
    pub block: u64,
    pub iterations: FieldResult<Vec<u64>>,
    pub rounds: HashMap<u64, Vec<RoundRef>>,
    pub overrides: HashMap<(u64, u64), FieldResult<Option<VotingMode>>>,
    pub juries: HashMap<Address, JuryState>,
    pub metadata_cids: HashMap<Address, String>,
    pub metadata_error: Option<ReadError>,
    pub winner_calls: Vec<TallyOperation>,
}

pub struct MockRoundReader {
    chain_id: u64,
    state: Mutex<RoundState>,
}

impl MockRoundReader {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(RoundState {
                registry: addr(0x10),
                deployed: Ok(()),
                block: 1_000,
                iterations: Ok(Vec::new()),
                rounds: HashMap::new(),
                overrides: HashMap::new(),
                juries: HashMap::new(),
                metadata_cids: HashMap::new(),
                metadata_error: None,
                winner_calls: Vec::new(),
            }),
        }
    }

    /// One iteration with one round backed by `jury`.
    pub fn with_round(chain_id: u64, iteration_id: u64, round_id: u64, jury: JuryState) -> Self {
        let reader = Self::new(chain_id);
        reader.add_round(iteration_id, round_id, jury_address(round_id), jury);
        reader
    }

    pub fn add_round(&self, iteration_id: u64, round_id: u64, jury_contract: Address, jury: JuryState) {
        let mut guard = self.state();
        let state = &mut *guard;
        if let Ok(iterations) = &mut state.iterations {
            if !iterations.contains(&iteration_id) {
                iterations.push(iteration_id);
            }
        }
        state.rounds.entry(iteration_id).or_default().push(RoundRef {
            round_id,
            jury_contract,
        });
        state.juries.insert(jury_contract, jury);
    }

    pub fn state(&self) -> MutexGuard<'_, RoundState> {
        self.state.lock().unwrap()
    }

    /// Mutate the jury of `round_id` (created by [`Self::with_round`]).
    pub fn jury(&self, round_id: u64, f: impl FnOnce(&mut JuryState)) {
        let mut state = self.state();
        let jury = state
            .juries
            .get_mut(&jury_address(round_id))
            .expect("jury exists");
        f(jury);
    }

    fn read<T>(&self, jury: Address, f: impl FnOnce(&JuryState) -> FieldResult<T>) -> FieldResult<T> {
        match self.state().juries.get(&jury) {
            Some(state) => f(state),
            None => Err(ReadError::NoCode(jury)),
        }
    }
}

pub fn jury_address(round_id: u64) -> Address {
    addr(0x70 + round_id as u8)
}

#[async_trait]
impl RoundReader for MockRoundReader {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn registry(&self) -> Address {
        self.state().registry
    }

    async fn check_deployed(&self) -> FieldResult<()> {
        self.state().deployed.clone()
    }

    async fn block_number(&self) -> FieldResult<u64> {
        Ok(self.state().block)
    }

    async fn iteration_ids(&self) -> FieldResult<Vec<u64>> {
        self.state().iterations.clone()
    }

    async fn rounds(&self, iteration_id: u64) -> FieldResult<Vec<RoundRef>> {
        Ok(self
            .state()
            .rounds
            .get(&iteration_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mode_override(
        &self,
        iteration_id: u64,
        round_id: u64,
    ) -> FieldResult<Option<VotingMode>> {
        self.state()
            .overrides
            .get(&(iteration_id, round_id))
            .cloned()
            .unwrap_or(Ok(None))
    }

    async fn project_metadata_cids(
        &self,
        _iteration_id: u64,
        _round_id: u64,
        projects: &[Address],
    ) -> FieldResult<Vec<String>> {
        let state = self.state();
        if let Some(e) = &state.metadata_error {
            return Err(e.clone());
        }
        Ok(projects
            .iter()
            .map(|p| state.metadata_cids.get(p).cloned().unwrap_or_default())
            .collect())
    }

    async fn pairing_contract(&self, jury: Address) -> FieldResult<Option<Address>> {
        self.read(jury, |j| j.pairing_contract.clone())
    }

    async fn voting_mode(&self, jury: Address) -> FieldResult<VotingMode> {
        self.read(jury, |j| j.voting_mode.clone())
    }

    async fn is_active(&self, jury: Address) -> FieldResult<bool> {
        self.read(jury, |j| j.is_active.clone())
    }

    async fn voting_ended(&self, jury: Address) -> FieldResult<bool> {
        self.read(jury, |j| j.voting_ended.clone())
    }

    async fn voting_window(&self, jury: Address) -> FieldResult<(u64, u64)> {
        self.read(jury, |j| j.window.clone())
    }

    async fn locks(&self, jury: Address) -> FieldResult<Locks> {
        self.read(jury, |j| j.locks.clone())
    }

    async fn dev_rel_account(&self, jury: Address) -> FieldResult<Option<Address>> {
        self.read(jury, |j| j.dev_rel_account.clone())
    }

    async fn dao_hic_voters(&self, jury: Address) -> FieldResult<Vec<Address>> {
        self.read(jury, |j| j.dao_hic_voters.clone())
    }

    async fn entity_vote(&self, jury: Address, entity: Entity) -> FieldResult<Option<Address>> {
        self.read(jury, |j| j.votes.get(&entity).cloned().unwrap_or(Ok(None)))
    }

    async fn participation(&self, jury: Address) -> FieldResult<ParticipationCounts> {
        self.read(jury, |j| j.participation.clone())
    }

    async fn project_count(&self, jury: Address) -> FieldResult<u64> {
        self.read(jury, |j| {
            j.project_count
                .clone()
                .unwrap_or(Ok(j.projects.len() as u64))
        })
    }

    async fn project_address(&self, jury: Address, index: u64) -> FieldResult<Address> {
        self.read(jury, |j| {
            if j.failing_project_index == Some(index) {
                return Err(transient());
            }
            index
                .checked_sub(1)
                .and_then(|i| j.projects.get(i as usize).copied())
                .ok_or_else(not_supported)
        })
    }

    async fn winner(&self, jury: Address, operation: TallyOperation) -> FieldResult<Winner> {
        self.state().winner_calls.push(operation);
        self.read(jury, |j| match operation {
            TallyOperation::Consensus => j.consensus_winner.clone(),
            TallyOperation::Weighted => j.weighted_winner.clone(),
        })
    }

    async fn score_breakdown(&self, jury: Address) -> FieldResult<ScoreBreakdown> {
        self.read(jury, |j| j.breakdown.clone())
    }
}

// ---------------------------------------------------------------------------
// Certs

#[derive(Debug, Clone)]
pub struct CertState {
    pub deployed: FieldResult<()>,
    pub block: FieldResult<u64>,
    pub next_token_id: FieldResult<u64>,
    pub certs: HashMap<u64, FieldResult<RawCert>>,
    pub statuses: HashMap<u64, FieldResult<CertStatus>>,
    pub templates: HashMap<u64, FieldResult<Option<String>>>,
    pub middleware: HashMap<u64, FieldResult<Option<Address>>>,
    pub rosters: HashMap<(u64, Address), FieldResult<Vec<Address>>>,
    pub members: HashMap<(u64, Address, Address), FieldResult<RawTeamMember>>,
    pub eligibility: HashMap<Address, FieldResult<EligibilityCheck>>,
    /// `(block, account)` pairs.
    pub granted: Vec<(u64, Address)>,
    pub revoked: Vec<(u64, Address)>,
    /// Event queries starting at one of these blocks fail.
    pub failing_log_from: Vec<u64>,
    pub log_queries: Vec<(u64, u64)>,
    pub profiles: Option<HashMap<Address, Option<String>>>,
    pub cert_reads: Vec<u64>,
}

pub struct MockCertReader {
    chain_id: u64,
    state: Mutex<CertState>,
}

impl MockCertReader {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(CertState {
                deployed: Ok(()),
                block: Ok(1_000),
                next_token_id: Ok(1),
                certs: HashMap::new(),
                statuses: HashMap::new(),
                templates: HashMap::new(),
                middleware: HashMap::new(),
                rosters: HashMap::new(),
                members: HashMap::new(),
                eligibility: HashMap::new(),
                granted: Vec::new(),
                revoked: Vec::new(),
                failing_log_from: Vec::new(),
                log_queries: Vec::new(),
                profiles: None,
                cert_reads: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, CertState> {
        self.state.lock().unwrap()
    }

    /// Register the next token and bump `next_token_id`.
    pub fn mint(&self, token_id: u64, iteration_id: u64, account: Address, status: CertStatus) {
        let mut state = self.state();
        state.certs.insert(
            token_id,
            Ok(RawCert {
                iteration_id,
                account,
                cert_type: "builder".to_string(),
                request_time: 1_700_000_000 + token_id,
            }),
        );
        state.statuses.insert(token_id, Ok(status));
        let next = state.next_token_id.clone().unwrap_or(1).max(token_id + 1);
        state.next_token_id = Ok(next);
    }

    pub fn set_member(
        &self,
        iteration_id: u64,
        project: Address,
        member: Address,
        read: FieldResult<RawTeamMember>,
    ) {
        self.state()
            .members
            .insert((iteration_id, project, member), read);
    }

    fn events(
        &self,
        from_block: u64,
        to_block: u64,
        pick: impl FnOnce(&CertState) -> &Vec<(u64, Address)>,
    ) -> FieldResult<Vec<Address>> {
        let mut state = self.state();
        state.log_queries.push((from_block, to_block));
        if state.failing_log_from.contains(&from_block) {
            return Err(transient());
        }
        Ok(pick(&state)
            .iter()
            .filter(|(block, _)| (from_block..=to_block).contains(block))
            .map(|(_, account)| *account)
            .collect())
    }
}

pub fn named(name: &str) -> RawTeamMember {
    RawTeamMember {
        status: roundmirror_core::MemberStatus::Approved,
        full_name: name.to_string(),
    }
}

#[async_trait]
impl CertReader for MockCertReader {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn cert_registry(&self) -> Address {
        addr(0x20)
    }

    async fn check_deployed(&self) -> FieldResult<()> {
        self.state().deployed.clone()
    }

    async fn block_number(&self) -> FieldResult<u64> {
        self.state().block.clone()
    }

    async fn next_token_id(&self) -> FieldResult<u64> {
        self.state().next_token_id.clone()
    }

    async fn cert(&self, token_id: u64) -> FieldResult<RawCert> {
        let mut state = self.state();
        state.cert_reads.push(token_id);
        state.certs.get(&token_id).cloned().unwrap_or_else(|| Err(transient()))
    }

    async fn cert_status(&self, token_id: u64) -> FieldResult<CertStatus> {
        self.state()
            .statuses
            .get(&token_id)
            .cloned()
            .unwrap_or_else(|| Err(transient()))
    }

    async fn template_cid(&self, iteration_id: u64) -> FieldResult<Option<String>> {
        self.state()
            .templates
            .get(&iteration_id)
            .cloned()
            .unwrap_or(Ok(None))
    }

    async fn middleware(&self, iteration_id: u64) -> FieldResult<Option<Address>> {
        self.state()
            .middleware
            .get(&iteration_id)
            .cloned()
            .unwrap_or(Ok(None))
    }

    async fn team_members(&self, iteration_id: u64, project: Address) -> FieldResult<Vec<Address>> {
        self.state()
            .rosters
            .get(&(iteration_id, project))
            .cloned()
            .unwrap_or(Ok(Vec::new()))
    }

    async fn team_member(
        &self,
        iteration_id: u64,
        project: Address,
        member: Address,
    ) -> FieldResult<RawTeamMember> {
        self.state()
            .members
            .get(&(iteration_id, project, member))
            .cloned()
            .unwrap_or_else(|| Err(transient()))
    }

    async fn is_eligible(&self, _middleware: Address, account: Address) -> FieldResult<EligibilityCheck> {
        self.state()
            .eligibility
            .get(&account)
            .cloned()
            .unwrap_or(Ok(EligibilityCheck {
                eligible: false,
                cert_type: None,
            }))
    }

    async fn role_granted_accounts(
        &self,
        _middleware: Address,
        from_block: u64,
        to_block: u64,
    ) -> FieldResult<Vec<Address>> {
        self.events(from_block, to_block, |s| &s.granted)
    }

    async fn role_revoked_accounts(
        &self,
        _middleware: Address,
        from_block: u64,
        to_block: u64,
    ) -> FieldResult<Vec<Address>> {
        self.events(from_block, to_block, |s| &s.revoked)
    }

    fn supports_profiles(&self) -> bool {
        self.state().profiles.is_some()
    }

    async fn profile_cid(&self, account: Address) -> FieldResult<Option<String>> {
        match &self.state().profiles {
            Some(profiles) => Ok(profiles.get(&account).cloned().flatten()),
            None => Err(not_supported()),
        }
    }
}

// ---------------------------------------------------------------------------
// Stored fixtures

/// A stored round snapshot listing `projects`, used to seed the cert
/// indexer's roster and eligibility passes.
pub fn seeded_snapshot(iteration_id: u64, round_id: u64, projects: &[Address]) -> RoundSnapshot {
    RoundSnapshot {
        chain_id: CHAIN_ID,
        iteration_id,
        round_id,
        registry: addr(0x10),
        jury_contract: jury_address(round_id),
        pairing_contract: None,
        lifecycle_state: LifecycleState::Active,
        window_start: 1_700_000_000,
        window_end: 1_700_086_400,
        voting_mode: VotingMode::Consensus,
        mode_overridden: false,
        locks: Locks::default(),
        winner: Winner::none(),
        entity_votes: Default::default(),
        participation: Default::default(),
        dev_rel_account: Some(addr(0xd1)),
        dao_hic_voters: vec![addr(0xd2)],
        scores: None,
        projects: projects
            .iter()
            .map(|p| ProjectEntry {
                address: *p,
                metadata_cid: None,
                metadata: None,
            })
            .collect(),
        last_observed_block: 1_000,
        last_updated_at: 1_700_000_000,
    }
}
