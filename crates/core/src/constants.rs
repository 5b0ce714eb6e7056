//! Shared constants.

use alloy_primitives::U256;

/// Fixed-point scale of weighted scores: a score of `SCORE_SCALE` is 100%.
///
/// Matches the 18-decimal fixed point used by the round contracts.
pub const SCORE_SCALE: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Number of voting entities per round.
pub const ENTITY_COUNT: u64 = 3;

/// Agreeing entity votes required for a consensus winner.
pub const CONSENSUS_QUORUM: usize = 2;

/// Project positions in a round contract start at 1.
pub const FIRST_PROJECT_INDEX: u64 = 1;
