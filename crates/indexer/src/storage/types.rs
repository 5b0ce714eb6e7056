//! Database types for the indexer storage layer.

use alloy::primitives::Address;
use roundmirror_core::tally::ScoreBreakdown;
use roundmirror_core::{
    CertStatus, EntityVotes, LifecycleState, Locks, MemberStatus, ParticipationCounts,
    VotingMode, Winner,
};
use serde::{Deserialize, Serialize};

/// One project of a round, with its resolved metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    /// Project address.
    pub address: Address,
    /// Metadata content id registered for the project, if any.
    pub metadata_cid: Option<String>,
    /// Resolved metadata document (`None` = not available yet).
    pub metadata: Option<serde_json::Value>,
}

/// A round snapshot as stored in the database.
///
/// Keyed by `(chain_id, iteration_id, round_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSnapshot {
    /// Chain id of the network.
    pub chain_id: u64,
    /// Iteration id.
    pub iteration_id: u64,
    /// Round id within the iteration.
    pub round_id: u64,
    /// Iteration registry the round was discovered through.
    pub registry: Address,
    /// Jury (voting) contract of the round.
    pub jury_contract: Address,
    /// Paired badge contract, if known.
    pub pairing_contract: Option<Address>,
    /// Derived lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Voting window start (unix seconds, 0 = unscheduled).
    pub window_start: u64,
    /// Voting window end (unix seconds).
    pub window_end: u64,
    /// Effective voting mode.
    pub voting_mode: VotingMode,
    /// Whether `voting_mode` comes from a registry override.
    pub mode_overridden: bool,
    /// Lock flags.
    pub locks: Locks,
    /// Tally winner.
    pub winner: Winner,
    /// Effective vote of each entity.
    pub entity_votes: EntityVotes,
    /// Votes cast inside each entity.
    pub participation: ParticipationCounts,
    /// DevRel account of the round.
    pub dev_rel_account: Option<Address>,
    /// DAO HIC voter list.
    pub dao_hic_voters: Vec<Address>,
    /// Weighted score breakdown (only once voting ended in weighted mode).
    pub scores: Option<ScoreBreakdown>,
    /// Projects in contract order.
    pub projects: Vec<ProjectEntry>,
    /// Block at which the raw state was read.
    pub last_observed_block: u64,
    /// Unix timestamp of the last payload change.
    pub last_updated_at: i64,
}

/// A certificate record.
///
/// Keyed by `(chain_id, token_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRecord {
    /// Chain id.
    pub chain_id: u64,
    /// Cert registry contract.
    pub cert_contract: Address,
    /// Token id.
    pub token_id: u64,
    /// Iteration the certificate belongs to.
    pub iteration_id: u64,
    /// Holder account.
    pub account: Address,
    /// Certificate type label.
    pub cert_type: String,
    /// Request status.
    pub status: CertStatus,
    /// Request time (unix seconds).
    pub request_time: u64,
    /// Eligibility middleware used for the request.
    pub middleware: Option<Address>,
    /// Certificate template content id for the iteration.
    pub template_cid: Option<String>,
    /// Unix timestamp of the last change.
    pub last_updated_at: i64,
}

/// A team member of a project.
///
/// Keyed by `(chain_id, iteration_id, project, member)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamMemberRecord {
    /// Chain id.
    pub chain_id: u64,
    /// Iteration id.
    pub iteration_id: u64,
    /// Project address.
    pub project: Address,
    /// Member address.
    pub member: Address,
    /// Review status.
    pub status: MemberStatus,
    /// Full name as registered (may be empty).
    pub full_name: String,
    /// Unix timestamp of the last change.
    pub last_updated_at: i64,
}

impl TeamMemberRecord {
    /// Approved member with a non-empty name.
    pub fn is_named(&self) -> bool {
        self.status == MemberStatus::Approved && !self.full_name.trim().is_empty()
    }
}

/// Certificate eligibility of an account for an iteration.
///
/// Keyed by `(chain_id, iteration_id, account)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityRecord {
    /// Chain id.
    pub chain_id: u64,
    /// Iteration id.
    pub iteration_id: u64,
    /// Account.
    pub account: Address,
    /// Whether the middleware currently accepts the account.
    pub eligible: bool,
    /// Certificate type the account qualifies for.
    pub cert_type: Option<String>,
    /// Account is a project of the iteration.
    pub is_project: bool,
    /// Project has at least one approved, named team member.
    pub has_named_team_members: bool,
    /// Unix timestamp of the last change.
    pub last_updated_at: i64,
}

/// A resolved profile.
///
/// Keyed by `(chain_id, account)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRecord {
    /// Chain id.
    pub chain_id: u64,
    /// Account.
    pub account: Address,
    /// Profile content id, if registered.
    pub profile_cid: Option<String>,
    /// Resolved profile document.
    pub profile: Option<serde_json::Value>,
    /// Unix timestamp of the last change.
    pub last_updated_at: i64,
}

/// Backoff bookkeeping for one failing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRecord {
    /// Namespace (e.g. `content`).
    pub namespace: String,
    /// Operation within the namespace (e.g. `fetch`).
    pub operation: String,
    /// Key of the failing item (e.g. a content id).
    pub key: String,
    /// Consecutive failures.
    pub attempt_count: u32,
    /// Earliest retry time (unix milliseconds).
    pub next_retry_at_ms: i64,
    /// Last error message.
    pub last_error: String,
}

/// A cached content-addressed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentCacheEntry {
    /// Content id.
    pub content_id: String,
    /// Raw content as fetched.
    pub raw_content: String,
    /// Unix timestamp of the fetch.
    pub fetched_at: i64,
}

/// Incremental event scan progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCheckpoint {
    /// Chain id.
    pub chain_id: u64,
    /// Contract whose events are scanned.
    pub source: Address,
    /// Next block that has not been scanned yet.
    pub next_block: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_member_requires_approval_and_name() {
        let mut member = TeamMemberRecord {
            chain_id: 1,
            iteration_id: 1,
            project: Address::repeat_byte(1),
            member: Address::repeat_byte(2),
            status: MemberStatus::Approved,
            full_name: "Ada Lovelace".to_string(),
            last_updated_at: 0,
        };
        assert!(member.is_named());

        member.full_name = "   ".to_string();
        assert!(!member.is_named());

        member.full_name = "Ada Lovelace".to_string();
        member.status = MemberStatus::Proposed;
        assert!(!member.is_named());
    }

    #[test]
    fn test_project_entry_json_shape() {
        let entry = ProjectEntry {
            address: Address::repeat_byte(0xab),
            metadata_cid: Some("bafy".to_string()),
            metadata: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["metadata_cid"], "bafy");
        assert!(json["metadata"].is_null());

        let back: ProjectEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
