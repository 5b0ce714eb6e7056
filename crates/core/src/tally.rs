//! Tally algorithms.
//!
//! The round contracts compute winners themselves; the indexer has to
//! request the tally matching the round's effective voting mode. The
//! algorithms are reproduced here so the indexer can select the right
//! operation and derive a winner locally from fresh inputs when the remote
//! tally read is unavailable.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::{CONSENSUS_QUORUM, ENTITY_COUNT, SCORE_SCALE};
use crate::types::{Entity, EntityVotes, VotingMode, Winner};

/// Remote tally operation to request for a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TallyOperation {
    /// `getWinnerConsensus()`
    Consensus,
    /// `getWinnerWeighted()`
    Weighted,
}

impl TallyOperation {
    /// Select the tally operation for a voting mode.
    pub fn for_mode(mode: VotingMode) -> Self {
        match mode {
            VotingMode::Consensus => TallyOperation::Consensus,
            VotingMode::Weighted => TallyOperation::Weighted,
        }
    }
}

/// Resolve the mode a round actually tallies with.
///
/// A per-round override always takes precedence over the contract-reported
/// mode.
pub fn effective_mode(contract_mode: VotingMode, mode_override: Option<VotingMode>) -> VotingMode {
    mode_override.unwrap_or(contract_mode)
}

/// Consensus tally: a project wins if at least two entity votes agree on it.
///
/// # Example
///
/// ```
/// use alloy_primitives::Address;
/// use roundmirror_core::tally::consensus_winner;
/// use roundmirror_core::{EntityVotes, Winner};
///
/// let a = Address::repeat_byte(0xaa);
/// let b = Address::repeat_byte(0xbb);
///
/// let votes = EntityVotes { dev_rel: Some(a), dao_hic: Some(a), community: Some(b) };
/// assert_eq!(consensus_winner(&votes), Winner::project(a));
///
/// let votes = EntityVotes { dev_rel: Some(a), dao_hic: Some(b), community: None };
/// assert_eq!(consensus_winner(&votes), Winner::none());
/// ```
pub fn consensus_winner(votes: &EntityVotes) -> Winner {
    let mut counts: BTreeMap<Address, usize> = BTreeMap::new();
    for entity in Entity::ALL {
        if let Some(project) = votes.get(entity) {
            *counts.entry(project).or_default() += 1;
        }
    }

    // With three voters at most one project can reach a quorum of two.
    counts
        .into_iter()
        .find(|(_, n)| *n >= CONSENSUS_QUORUM)
        .map(|(project, _)| Winner::project(project))
        .unwrap_or_else(Winner::none)
}

/// Score of one project in weighted mode, in [`SCORE_SCALE`] fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectScore {
    /// Project address.
    pub project: Address,
    /// Total score.
    pub score: U256,
}

impl ProjectScore {
    /// Score as a fraction of the total possible weight (lossy).
    pub fn as_fraction(&self, total_possible: U256) -> f64 {
        if total_possible.is_zero() {
            return 0.0;
        }
        u256_to_f64(self.score) / u256_to_f64(total_possible)
    }
}

/// Full weighted score breakdown of a round.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Per-project scores in contract order.
    pub scores: Vec<ProjectScore>,
    /// Score a project would get with every entity's full share.
    pub total_possible: U256,
}

impl ScoreBreakdown {
    /// Winner under the weighted rule (strictly highest, ties ⇒ none).
    pub fn winner(&self) -> Winner {
        weighted_winner(&self.scores)
    }
}

/// Weighted winner: the project with the strictly highest non-zero score.
///
/// An exact tie at the top score yields no winner.
pub fn weighted_winner(scores: &[ProjectScore]) -> Winner {
    let mut best: Option<&ProjectScore> = None;
    let mut tied = false;

    for entry in scores {
        match best {
            None => best = Some(entry),
            Some(current) if entry.score > current.score => {
                best = Some(entry);
                tied = false;
            }
            Some(current) if entry.score == current.score => tied = true,
            Some(_) => {}
        }
    }

    match best {
        Some(top) if !tied && !top.score.is_zero() => Winner::project(top.project),
        _ => Winner::none(),
    }
}

/// Vote distribution inside one entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityDistribution {
    votes: BTreeMap<Address, u64>,
}

impl EntityDistribution {
    /// Create an empty distribution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` votes for `project`.
    pub fn add(&mut self, project: Address, count: u64) -> &mut Self {
        *self.votes.entry(project).or_default() += count;
        self
    }

    /// Total votes cast inside the entity.
    pub fn total(&self) -> u64 {
        self.votes.values().sum()
    }

    /// Votes for one project.
    pub fn votes_for(&self, project: &Address) -> u64 {
        self.votes.get(project).copied().unwrap_or(0)
    }
}

impl FromIterator<(Address, u64)> for EntityDistribution {
    fn from_iter<T: IntoIterator<Item = (Address, u64)>>(iter: T) -> Self {
        let mut dist = Self::new();
        for (project, count) in iter {
            dist.add(project, count);
        }
        dist
    }
}

/// Weighted tally over the three entities.
///
/// Each entity contributes at most `SCORE_SCALE / 3`, split among projects
/// in proportion to the entity's internal votes. An entity with no votes
/// contributes nothing.
///
/// # Example
///
/// ```
/// use alloy_primitives::Address;
/// use roundmirror_core::tally::{weighted_scores, EntityDistribution};
///
/// let a = Address::repeat_byte(0xaa);
/// let b = Address::repeat_byte(0xbb);
///
/// let dev_rel: EntityDistribution = [(a, 1)].into_iter().collect();
/// let dao_hic: EntityDistribution = [(a, 6), (b, 4)].into_iter().collect();
/// let community: EntityDistribution = [(a, 40), (b, 60)].into_iter().collect();
///
/// let breakdown = weighted_scores(&[a, b], &dev_rel, &dao_hic, &community);
/// assert_eq!(breakdown.winner().address, Some(a));
/// ```
pub fn weighted_scores(
    projects: &[Address],
    dev_rel: &EntityDistribution,
    dao_hic: &EntityDistribution,
    community: &EntityDistribution,
) -> ScoreBreakdown {
    let share = SCORE_SCALE / U256::from(ENTITY_COUNT);

    let scores = projects
        .iter()
        .map(|project| {
            let score = [dev_rel, dao_hic, community]
                .into_iter()
                .map(|dist| entity_contribution(share, dist, project))
                .fold(U256::ZERO, |acc, c| acc + c);
            ProjectScore {
                project: *project,
                score,
            }
        })
        .collect();

    ScoreBreakdown {
        scores,
        total_possible: share * U256::from(ENTITY_COUNT),
    }
}

fn entity_contribution(share: U256, dist: &EntityDistribution, project: &Address) -> U256 {
    let total = dist.total();
    if total == 0 {
        return U256::ZERO;
    }
    share * U256::from(dist.votes_for(project)) / U256::from(total)
}

fn u256_to_f64(value: U256) -> f64 {
    // Scores fit comfortably in f64's exponent range; precision loss is fine for display.
    value.to_string().parse::<f64>().unwrap_or(f64::MAX)
}
