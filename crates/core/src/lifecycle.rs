//! Round lifecycle derivation.
//!
//! Raw flags are read independently and can be observed mid-transition
//! (for example `votingEnded == true` while `isActive` still reports
//! `true`). The derivation is a strict priority order so every combination
//! of flags maps to exactly one state.

use serde::{Deserialize, Serialize};

use crate::types::LifecycleState;

/// Raw lifecycle flags as read from a round contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoundFlags {
    /// `locked()`: the round is frozen.
    pub fully_locked: bool,
    /// `votingEnded()`.
    pub voting_ended: bool,
    /// `isActive()`.
    pub is_active: bool,
    /// `startTime()`; zero until the window is scheduled.
    pub window_start: u64,
}

/// Derive the lifecycle state of a round.
///
/// Priority, first match wins:
/// 1. fully locked → `Locked`
/// 2. voting ended → `Ended`
/// 3. active → `Active`
/// 4. window start set → `Activated`
/// 5. otherwise → `Deployed`
///
/// # Example
///
/// ```
/// use roundmirror_core::lifecycle::{derive_lifecycle, RoundFlags};
/// use roundmirror_core::LifecycleState;
///
/// let flags = RoundFlags {
///     fully_locked: false,
///     voting_ended: true,
///     is_active: true,
///     window_start: 1_700_000_000,
/// };
/// assert_eq!(derive_lifecycle(&flags), LifecycleState::Ended);
/// ```
pub fn derive_lifecycle(flags: &RoundFlags) -> LifecycleState {
    if flags.fully_locked {
        LifecycleState::Locked
    } else if flags.voting_ended {
        LifecycleState::Ended
    } else if flags.is_active {
        LifecycleState::Active
    } else if flags.window_start > 0 {
        LifecycleState::Activated
    } else {
        LifecycleState::Deployed
    }
}

/// Lifecycle flags where the volatile reads may be unknown this pass.
///
/// `None` marks a flag whose read failed and whose value cannot be
/// recovered from the stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartialRoundFlags {
    /// `locked()`: the round is frozen.
    pub fully_locked: bool,
    /// `votingEnded()`, if known.
    pub voting_ended: Option<bool>,
    /// `isActive()`, if known.
    pub is_active: Option<bool>,
    /// `startTime()`; zero until the window is scheduled.
    pub window_start: u64,
}

/// Walk the same priority chain as [`derive_lifecycle`] with unknown flags.
///
/// Returns `None` only when the first flag that would decide the state is
/// unknown. A known higher-priority flag always wins over an unknown lower
/// one, so a fresh `fully_locked` yields `Locked` whatever the rest reads.
pub fn derive_lifecycle_partial(flags: &PartialRoundFlags) -> Option<LifecycleState> {
    if flags.fully_locked {
        return Some(LifecycleState::Locked);
    }
    if flags.voting_ended? {
        return Some(LifecycleState::Ended);
    }
    if flags.is_active? {
        return Some(LifecycleState::Active);
    }
    Some(if flags.window_start > 0 {
        LifecycleState::Activated
    } else {
        LifecycleState::Deployed
    })
}

impl LifecycleState {
    /// `votingEnded` as it must have read when this state was derived.
    pub fn implied_voting_ended(&self) -> Option<bool> {
        match self {
            LifecycleState::Locked => None,
            LifecycleState::Ended => Some(true),
            LifecycleState::Active | LifecycleState::Activated | LifecycleState::Deployed => {
                Some(false)
            }
        }
    }

    /// `isActive` as it must have read when this state was derived.
    pub fn implied_is_active(&self) -> Option<bool> {
        match self {
            LifecycleState::Locked | LifecycleState::Ended => None,
            LifecycleState::Active => Some(true),
            LifecycleState::Activated | LifecycleState::Deployed => Some(false),
        }
    }
}
