//! Per-network remote read handles.

use anyhow::Result;
use std::fmt;
use std::sync::Arc;

use super::evm::RpcClient;
use super::{CertReader, EvmCertReader, EvmRoundReader, RoundReader};
use crate::config::Config;

/// Which sub-indexer is asking for networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubIndexerKind {
    /// Iteration snapshot indexer.
    Iterations,
    /// Certificate snapshot indexer.
    Certs,
}

impl SubIndexerKind {
    /// Stable name used in logs and on the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubIndexerKind::Iterations => "iterations",
            SubIndexerKind::Certs => "certs",
        }
    }
}

impl fmt::Display for SubIndexerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read handles for one configured network.
#[derive(Clone)]
pub struct ChainPoller {
    /// Chain id.
    pub chain_id: u64,
    /// Display name.
    pub name: String,
    /// First block of the role event scan.
    pub event_start_block: u64,
    /// Round reads.
    pub rounds: Arc<dyn RoundReader>,
    /// Certificate reads, when a cert registry is configured.
    pub certs: Option<Arc<dyn CertReader>>,
}

impl fmt::Debug for ChainPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainPoller")
            .field("chain_id", &self.chain_id)
            .field("name", &self.name)
            .field("event_start_block", &self.event_start_block)
            .field("certs", &self.certs.is_some())
            .finish()
    }
}

/// All configured networks, optionally narrowed to a single one.
#[derive(Debug, Clone, Default)]
pub struct ChainPollerSet {
    pollers: Vec<ChainPoller>,
    single_network: Option<u64>,
}

impl ChainPollerSet {
    /// Build from explicit pollers.
    pub fn new(pollers: Vec<ChainPoller>, single_network: Option<u64>) -> Self {
        Self {
            pollers,
            single_network,
        }
    }

    /// Open one RPC connection per configured network.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut pollers = Vec::with_capacity(config.networks.len());

        for network in &config.networks {
            let rpc = RpcClient::new(&network.rpc_url)?;

            let rounds: Arc<dyn RoundReader> = Arc::new(EvmRoundReader::new(
                network.chain_id,
                network.iteration_registry,
                rpc.clone(),
            ));
            let certs = network.cert_registry.map(|registry| {
                Arc::new(EvmCertReader::new(
                    network.chain_id,
                    registry,
                    network.profile_registry,
                    rpc.clone(),
                )) as Arc<dyn CertReader>
            });

            pollers.push(ChainPoller {
                chain_id: network.chain_id,
                name: network.label(),
                event_start_block: network.event_start_block,
                rounds,
                certs,
            });
        }

        Ok(Self::new(pollers, config.single_network))
    }

    /// Networks the given sub-indexer should walk this tick.
    ///
    /// Honors `single_network`. The cert indexer only sees networks with a
    /// cert registry.
    pub fn active_for(&self, kind: SubIndexerKind) -> Vec<&ChainPoller> {
        self.pollers
            .iter()
            .filter(|p| self.single_network.map_or(true, |id| id == p.chain_id))
            .filter(|p| match kind {
                SubIndexerKind::Iterations => true,
                SubIndexerKind::Certs => p.certs.is_some(),
            })
            .collect()
    }

    /// All configured networks.
    pub fn all(&self) -> &[ChainPoller] {
        &self.pollers
    }
}
