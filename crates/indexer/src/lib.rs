//! Snapshot indexer for on-chain voting rounds and certificates.
//!
//! This crate provides:
//! - Round snapshots per iteration, with derived lifecycle and tally winner
//! - Certificate, team roster, eligibility and profile mirrors
//! - A content cache over an IPFS gateway with persisted retry backoff
//! - A per-sub-indexer scheduler with an in-flight guard
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  roundmirror-indexer                         │
//! │                                              │
//! │  ┌───────────┐        ┌───────────┐          │
//! │  │ Scheduler │        │ Scheduler │          │
//! │  │ (60s)     │        │ (120s)    │          │
//! │  └─────┬─────┘        └─────┬─────┘          │
//! │        │                    │                │
//! │  ┌─────▼──────────┐   ┌─────▼──────────┐     │
//! │  │ Iteration      │   │ Cert           │ ← EVM RPC
//! │  │ indexer        │   │ indexer        │     │
//! │  └─────┬────┬─────┘   └────┬────┬──────┘     │
//! │        │    └──────┬───────┘    │            │
//! │        │    ┌──────▼───────┐    │            │
//! │        │    │ ContentCache │ ← IPFS gateway  │
//! │        │    └──────┬───────┘    │            │
//! │        │           │            │            │
//! │      ┌─▼───────────▼────────────▼─┐          │
//! │      │      Storage (SQLite)      │          │
//! │      └────────────────────────────┘          │
//! └──────────────────────────────────────────────┘
//!                    │
//!                    ▼  read accessors
//!            downstream consumers
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod config;
pub mod content;
pub mod retry;
pub mod scheduler;
pub mod snapshot;
pub mod storage;

// Re-export common types
pub use roundmirror_core::*;
