//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Unknown lifecycle state string.
    #[error("Invalid lifecycle state: {0}")]
    InvalidLifecycleState(String),

    /// Raw voting mode value outside the known range.
    #[error("Invalid voting mode: {0} (must be 0 = consensus or 1 = weighted)")]
    InvalidVotingMode(u8),

    /// Unknown voting mode string.
    #[error("Invalid voting mode name: {0}")]
    InvalidVotingModeName(String),

    /// Raw certificate status outside the known range.
    #[error("Invalid certificate status: {0}")]
    InvalidCertStatus(String),

    /// Raw team member status outside the known range.
    #[error("Invalid team member status: {0}")]
    InvalidMemberStatus(String),

    /// Unknown entity name.
    #[error("Invalid entity: {0}")]
    InvalidEntity(String),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
