//! # roundmirror core
//!
//! Domain types and pure derivations shared by the roundmirror indexer.
//!
//! ## Features
//!
//! - **Types**: lifecycle states, voting modes, entities, certificate and
//!   team member statuses, winners and vote summaries
//! - **Lifecycle**: priority-ordered derivation of a round's state from raw flags
//! - **Tally**: consensus and weighted winner rules, and selection of the
//!   remote tally operation for a round's effective mode
//! - **Hashing**: keccak256 payload hashing for idempotent snapshot writes

#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod hashing;
pub mod lifecycle;
pub mod tally;
pub mod types;

// Re-export commonly used items
pub use constants::*;
pub use error::{CoreError, Result};
pub use lifecycle::{derive_lifecycle, derive_lifecycle_partial, PartialRoundFlags, RoundFlags};
pub use tally::{consensus_winner, effective_mode, weighted_winner, TallyOperation};
pub use types::*;

// Re-export Alloy primitives for convenience
pub use alloy_primitives::{Address, B256, U256};
