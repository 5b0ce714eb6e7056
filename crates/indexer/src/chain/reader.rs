//! Read traits the sub-indexers consume.
//!
//! Each method maps to one remote call, so callers decide how to fan out
//! and how to fall back per field.

use alloy::primitives::Address;
use async_trait::async_trait;
use roundmirror_core::tally::ScoreBreakdown;
use roundmirror_core::{
    CertStatus, Entity, Locks, MemberStatus, ParticipationCounts, TallyOperation, VotingMode,
    Winner,
};

use super::{FieldResult, ReadError};

/// A round as listed by the iteration registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundRef {
    /// Round id within the iteration.
    pub round_id: u64,
    /// Jury contract of the round.
    pub jury_contract: Address,
}

/// Certificate data as returned by the cert registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCert {
    /// Iteration id.
    pub iteration_id: u64,
    /// Holder account.
    pub account: Address,
    /// Certificate type label.
    pub cert_type: String,
    /// Request time (unix seconds).
    pub request_time: u64,
}

/// Team member data as returned by the cert registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTeamMember {
    /// Review status.
    pub status: MemberStatus,
    /// Full name (may be empty).
    pub full_name: String,
}

/// Middleware answer for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityCheck {
    /// Whether the account is currently eligible.
    pub eligible: bool,
    /// Certificate type the account qualifies for, if any.
    pub cert_type: Option<String>,
}

/// Round state reads for one network.
#[async_trait]
pub trait RoundReader: Send + Sync {
    /// Chain id of the network.
    fn chain_id(&self) -> u64;

    /// Iteration registry address.
    fn registry(&self) -> Address;

    /// Fails with [`ReadError::NoCode`] if the registry has no bytecode.
    async fn check_deployed(&self) -> FieldResult<()>;

    /// Latest block number.
    async fn block_number(&self) -> FieldResult<u64>;

    /// Iteration ids known to the registry.
    async fn iteration_ids(&self) -> FieldResult<Vec<u64>>;

    /// Rounds of one iteration.
    async fn rounds(&self, iteration_id: u64) -> FieldResult<Vec<RoundRef>>;

    /// Per-round voting mode override set on the registry.
    async fn mode_override(&self, iteration_id: u64, round_id: u64)
        -> FieldResult<Option<VotingMode>>;

    /// Metadata content ids of `projects`, in the same order.
    async fn project_metadata_cids(
        &self,
        iteration_id: u64,
        round_id: u64,
        projects: &[Address],
    ) -> FieldResult<Vec<String>>;

    /// Paired contract of a jury round.
    async fn pairing_contract(&self, jury: Address) -> FieldResult<Option<Address>>;

    /// Voting mode reported by the jury contract.
    async fn voting_mode(&self, jury: Address) -> FieldResult<VotingMode>;

    /// Whether voting is open.
    async fn is_active(&self, jury: Address) -> FieldResult<bool>;

    /// Whether voting has been closed.
    async fn voting_ended(&self, jury: Address) -> FieldResult<bool>;

    /// Voting window `(start, end)` in unix seconds.
    async fn voting_window(&self, jury: Address) -> FieldResult<(u64, u64)>;

    /// Lock flags.
    async fn locks(&self, jury: Address) -> FieldResult<Locks>;

    /// DevRel account.
    async fn dev_rel_account(&self, jury: Address) -> FieldResult<Option<Address>>;

    /// DAO HIC voters.
    async fn dao_hic_voters(&self, jury: Address) -> FieldResult<Vec<Address>>;

    /// Current effective vote of one entity.
    async fn entity_vote(&self, jury: Address, entity: Entity) -> FieldResult<Option<Address>>;

    /// Votes cast inside each entity.
    async fn participation(&self, jury: Address) -> FieldResult<ParticipationCounts>;

    /// Number of projects.
    async fn project_count(&self, jury: Address) -> FieldResult<u64>;

    /// Project at a 1-indexed position.
    async fn project_address(&self, jury: Address, index: u64) -> FieldResult<Address>;

    /// Winner as computed by the contract for `operation`.
    async fn winner(&self, jury: Address, operation: TallyOperation) -> FieldResult<Winner>;

    /// Weighted score breakdown.
    async fn score_breakdown(&self, jury: Address) -> FieldResult<ScoreBreakdown>;
}

/// Certificate, roster, eligibility and profile reads for one network.
#[async_trait]
pub trait CertReader: Send + Sync {
    /// Chain id of the network.
    fn chain_id(&self) -> u64;

    /// Cert registry address.
    fn cert_registry(&self) -> Address;

    /// Fails with [`ReadError::NoCode`] if the cert registry has no bytecode.
    async fn check_deployed(&self) -> FieldResult<()>;

    /// Latest block number.
    async fn block_number(&self) -> FieldResult<u64>;

    /// Next token id the registry will assign.
    async fn next_token_id(&self) -> FieldResult<u64>;

    /// Certificate data.
    async fn cert(&self, token_id: u64) -> FieldResult<RawCert>;

    /// Certificate status.
    async fn cert_status(&self, token_id: u64) -> FieldResult<CertStatus>;

    /// Certificate template content id of an iteration.
    async fn template_cid(&self, iteration_id: u64) -> FieldResult<Option<String>>;

    /// Eligibility middleware of an iteration.
    async fn middleware(&self, iteration_id: u64) -> FieldResult<Option<Address>>;

    /// Roster of a project.
    async fn team_members(&self, iteration_id: u64, project: Address) -> FieldResult<Vec<Address>>;

    /// One roster entry.
    async fn team_member(
        &self,
        iteration_id: u64,
        project: Address,
        member: Address,
    ) -> FieldResult<RawTeamMember>;

    /// Middleware eligibility answer for an account.
    async fn is_eligible(&self, middleware: Address, account: Address)
        -> FieldResult<EligibilityCheck>;

    /// Accounts named by `RoleGranted` events in `[from_block, to_block]`.
    async fn role_granted_accounts(
        &self,
        middleware: Address,
        from_block: u64,
        to_block: u64,
    ) -> FieldResult<Vec<Address>>;

    /// Accounts named by `RoleRevoked` events in `[from_block, to_block]`.
    async fn role_revoked_accounts(
        &self,
        middleware: Address,
        from_block: u64,
        to_block: u64,
    ) -> FieldResult<Vec<Address>>;

    /// Whether a profile registry is configured.
    fn supports_profiles(&self) -> bool;

    /// Profile content id of an account. Networks without a profile
    /// registry answer [`ReadError::NotSupported`].
    async fn profile_cid(&self, account: Address) -> FieldResult<Option<String>>;
}

/// Empty strings are absent values.
pub(crate) fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Zero addresses are absent values.
pub(crate) fn non_zero(address: Address) -> Option<Address> {
    if address.is_zero() {
        None
    } else {
        Some(address)
    }
}

/// Convert a contract-side uint into a `u64`, rejecting overflow.
pub(crate) fn to_u64(what: &str, value: alloy::primitives::U256) -> FieldResult<u64> {
    u64::try_from(value).map_err(|_| ReadError::NotSupported(format!("{} out of range", what)))
}
