//! Core domain types for roundmirror.
//!
//! Every enum here has a stable string form used by the storage layer
//! (`as_str` / `FromStr`) and a raw on-chain form where one exists
//! (`from_raw`).

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Lifecycle state of a voting round.
///
/// Derived from raw on-chain flags by [`crate::lifecycle::derive_lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Contract exists but no voting window has been set.
    Deployed,
    /// A voting window has been scheduled.
    Activated,
    /// Voting is currently open.
    Active,
    /// Voting has ended.
    Ended,
    /// The round is fully locked; nothing can change any more.
    Locked,
}

impl LifecycleState {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Deployed => "deployed",
            LifecycleState::Activated => "activated",
            LifecycleState::Active => "active",
            LifecycleState::Ended => "ended",
            LifecycleState::Locked => "locked",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deployed" => Ok(LifecycleState::Deployed),
            "activated" => Ok(LifecycleState::Activated),
            "active" => Ok(LifecycleState::Active),
            "ended" => Ok(LifecycleState::Ended),
            "locked" => Ok(LifecycleState::Locked),
            other => Err(CoreError::InvalidLifecycleState(other.to_string())),
        }
    }
}

/// Tally algorithm selected for a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMode {
    /// Two of three entities must agree on the same project.
    Consensus,
    /// Each entity contributes a third of the weight, split proportionally.
    Weighted,
}

impl VotingMode {
    /// Decode the `uint8` mode value reported by a round contract.
    pub fn from_raw(raw: u8) -> Result<Self, CoreError> {
        match raw {
            0 => Ok(VotingMode::Consensus),
            1 => Ok(VotingMode::Weighted),
            other => Err(CoreError::InvalidVotingMode(other)),
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            VotingMode::Consensus => "consensus",
            VotingMode::Weighted => "weighted",
        }
    }
}

impl fmt::Display for VotingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VotingMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consensus" => Ok(VotingMode::Consensus),
            "weighted" => Ok(VotingMode::Weighted),
            other => Err(CoreError::InvalidVotingModeName(other.to_string())),
        }
    }
}

/// One of the three fixed voter blocs of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    /// The single developer-relations account.
    DevRel,
    /// The DAO "high intensity contributor" voter list.
    DaoHic,
    /// Community token holders.
    Community,
}

impl Entity {
    /// All entities in tally order.
    pub const ALL: [Entity; 3] = [Entity::DevRel, Entity::DaoHic, Entity::Community];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::DevRel => "dev_rel",
            Entity::DaoHic => "dao_hic",
            Entity::Community => "community",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Entity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev_rel" => Ok(Entity::DevRel),
            "dao_hic" => Ok(Entity::DaoHic),
            "community" => Ok(Entity::Community),
            other => Err(CoreError::InvalidEntity(other.to_string())),
        }
    }
}

/// Certificate request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertStatus {
    /// Created, waiting for the holder to request.
    Pending,
    /// Requested, waiting for minting.
    Requested,
    /// Minted (final).
    Minted,
    /// Cancelled (final unless re-requested, which the indexer observes
    /// through the non-final re-check of the new token).
    Cancelled,
}

impl CertStatus {
    /// Decode the `uint8` status reported by the cert registry.
    pub fn from_raw(raw: u8) -> Result<Self, CoreError> {
        match raw {
            0 => Ok(CertStatus::Pending),
            1 => Ok(CertStatus::Requested),
            2 => Ok(CertStatus::Minted),
            3 => Ok(CertStatus::Cancelled),
            other => Err(CoreError::InvalidCertStatus(other.to_string())),
        }
    }

    /// Whether the status can still change on-chain.
    pub fn is_final(&self) -> bool {
        matches!(self, CertStatus::Minted | CertStatus::Cancelled)
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CertStatus::Pending => "pending",
            CertStatus::Requested => "requested",
            CertStatus::Minted => "minted",
            CertStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CertStatus::Pending),
            "requested" => Ok(CertStatus::Requested),
            "minted" => Ok(CertStatus::Minted),
            "cancelled" => Ok(CertStatus::Cancelled),
            other => Err(CoreError::InvalidCertStatus(other.to_string())),
        }
    }
}

/// Status of a proposed team member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    /// Proposed by the project, not yet reviewed.
    Proposed,
    /// Approved.
    Approved,
    /// Rejected.
    Rejected,
}

impl MemberStatus {
    /// Decode the `uint8` status reported by the cert registry.
    pub fn from_raw(raw: u8) -> Result<Self, CoreError> {
        match raw {
            0 => Ok(MemberStatus::Proposed),
            1 => Ok(MemberStatus::Approved),
            2 => Ok(MemberStatus::Rejected),
            other => Err(CoreError::InvalidMemberStatus(other.to_string())),
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Proposed => "proposed",
            MemberStatus::Approved => "approved",
            MemberStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(MemberStatus::Proposed),
            "approved" => Ok(MemberStatus::Approved),
            "rejected" => Ok(MemberStatus::Rejected),
            other => Err(CoreError::InvalidMemberStatus(other.to_string())),
        }
    }
}

/// Outcome of a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Winner {
    /// Winning project, if any.
    pub address: Option<Address>,
    /// Whether the round has a winner.
    pub has_winner: bool,
}

impl Winner {
    /// A round with no winner.
    pub const fn none() -> Self {
        Self {
            address: None,
            has_winner: false,
        }
    }

    /// A round won by `address`.
    pub const fn project(address: Address) -> Self {
        Self {
            address: Some(address),
            has_winner: true,
        }
    }

    /// Normalize a raw `(address, hasWinner)` pair as returned by a round contract.
    ///
    /// A zero address or a false flag both mean "no winner".
    pub fn from_raw(address: Address, has_winner: bool) -> Self {
        if has_winner && !address.is_zero() {
            Self::project(address)
        } else {
            Self::none()
        }
    }
}

/// The effective vote of each entity (`None` = that entity has not voted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityVotes {
    /// DevRel vote.
    pub dev_rel: Option<Address>,
    /// DAO HIC majority vote.
    pub dao_hic: Option<Address>,
    /// Community majority vote.
    pub community: Option<Address>,
}

impl EntityVotes {
    /// Get the vote of one entity.
    pub fn get(&self, entity: Entity) -> Option<Address> {
        match entity {
            Entity::DevRel => self.dev_rel,
            Entity::DaoHic => self.dao_hic,
            Entity::Community => self.community,
        }
    }

    /// Set the vote of one entity. Zero addresses are stored as "no vote".
    pub fn set(&mut self, entity: Entity, vote: Option<Address>) {
        let vote = vote.filter(|a| !a.is_zero());
        match entity {
            Entity::DevRel => self.dev_rel = vote,
            Entity::DaoHic => self.dao_hic = vote,
            Entity::Community => self.community = vote,
        }
    }
}

/// Number of votes cast inside each entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipationCounts {
    /// DevRel votes cast (0 or 1).
    pub dev_rel: u64,
    /// DAO HIC votes cast.
    pub dao_hic: u64,
    /// Community votes cast.
    pub community: u64,
}

/// Lock flags of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Locks {
    /// The project list can no longer change.
    pub projects_locked: bool,
    /// The whole round is frozen.
    pub fully_locked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_str_conversion() {
        for state in [
            LifecycleState::Deployed,
            LifecycleState::Activated,
            LifecycleState::Active,
            LifecycleState::Ended,
            LifecycleState::Locked,
        ] {
            assert_eq!(state.as_str().parse::<LifecycleState>().unwrap(), state);
        }
        assert!("closed".parse::<LifecycleState>().is_err());
    }

    #[test]
    fn test_voting_mode_from_raw() {
        assert_eq!(VotingMode::from_raw(0).unwrap(), VotingMode::Consensus);
        assert_eq!(VotingMode::from_raw(1).unwrap(), VotingMode::Weighted);
        assert_eq!(
            VotingMode::from_raw(7).unwrap_err(),
            CoreError::InvalidVotingMode(7)
        );
    }

    #[test]
    fn test_cert_status_finality() {
        assert!(!CertStatus::Pending.is_final());
        assert!(!CertStatus::Requested.is_final());
        assert!(CertStatus::Minted.is_final());
        assert!(CertStatus::Cancelled.is_final());
        assert_eq!(CertStatus::from_raw(3).unwrap(), CertStatus::Cancelled);
        assert!(CertStatus::from_raw(4).is_err());
        assert_eq!("requested".parse::<CertStatus>().unwrap(), CertStatus::Requested);
    }

    #[test]
    fn test_member_status_conversion() {
        assert_eq!(MemberStatus::from_raw(1).unwrap(), MemberStatus::Approved);
        assert_eq!(
            "rejected".parse::<MemberStatus>().unwrap(),
            MemberStatus::Rejected
        );
        assert!(MemberStatus::from_raw(9).is_err());
    }

    #[test]
    fn test_winner_from_raw_zero_address() {
        assert_eq!(Winner::from_raw(Address::ZERO, true), Winner::none());
        let a = Address::repeat_byte(0x0a);
        assert_eq!(Winner::from_raw(a, false), Winner::none());
        assert_eq!(Winner::from_raw(a, true), Winner::project(a));
    }

    #[test]
    fn test_entity_votes_zero_is_no_vote() {
        let mut votes = EntityVotes::default();
        votes.set(Entity::DaoHic, Some(Address::ZERO));
        assert_eq!(votes.get(Entity::DaoHic), None);
        votes.set(Entity::Community, Some(Address::repeat_byte(1)));
        assert_eq!(votes.get(Entity::Community), Some(Address::repeat_byte(1)));
    }

    #[test]
    fn test_winner_serde_shape() {
        let json = serde_json::to_value(Winner::none()).unwrap();
        assert_eq!(json["has_winner"], false);
        assert!(json["address"].is_null());
    }
}
