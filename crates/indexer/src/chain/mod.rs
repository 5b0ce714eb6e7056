//! Remote ledger read surface.
//!
//! This module provides:
//! - Contract bindings for the iteration registry, jury rounds, cert
//!   registry, eligibility middleware and profile registry
//! - The [`RoundReader`] and [`CertReader`] traits the sub-indexers read through
//! - Their alloy implementations over HTTP JSON-RPC
//! - The per-network poller set
//!
//! Every remote read returns a [`FieldResult`], so one failing call never
//! erases the outcome of the others.

pub mod contracts;
pub mod evm;
pub mod poller;
pub mod reader;

pub use evm::{EvmCertReader, EvmRoundReader};
pub use poller::{ChainPoller, ChainPollerSet, SubIndexerKind};
pub use reader::*;

use alloy::primitives::Address;
use alloy::transports::TransportError;

/// Classified failure of a single remote read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// The contract does not expose the capability (missing function,
    /// revert, undecodable return). Callers fall back to the default.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Network or node failure. Callers keep the previous value and retry
    /// on a later tick.
    #[error("transient: {0}")]
    Transient(String),

    /// No bytecode at the address. The whole network is skipped this tick.
    #[error("no contract code at {0}")]
    NoCode(Address),
}

impl ReadError {
    /// Whether the error is a [`ReadError::NotSupported`].
    pub fn is_not_supported(&self) -> bool {
        matches!(self, ReadError::NotSupported(_))
    }
}

/// Outcome of one remote read.
pub type FieldResult<T> = Result<T, ReadError>;

/// Map a contract call error onto [`ReadError`].
pub(crate) fn classify_call_error(what: &str, err: alloy::contract::Error) -> ReadError {
    use alloy::contract::Error as CallError;

    let message = format!("{}: {}", what, err);
    match &err {
        CallError::UnknownFunction(_)
        | CallError::UnknownSelector(_)
        | CallError::AbiError(_) => ReadError::NotSupported(message),
        CallError::TransportError(e) if is_revert(e) => ReadError::NotSupported(message),
        _ => ReadError::Transient(message),
    }
}

/// Map a provider-level error (block number, code, logs) onto [`ReadError`].
pub(crate) fn classify_transport_error(what: &str, err: TransportError) -> ReadError {
    ReadError::Transient(format!("{}: {}", what, err))
}

fn is_revert(err: &TransportError) -> bool {
    err.as_error_resp()
        .map(|payload| payload.code == 3 || payload.message.contains("revert"))
        .unwrap_or(false)
}
