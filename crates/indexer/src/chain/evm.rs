//! alloy implementations of the read traits over HTTP JSON-RPC.

use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use async_trait::async_trait;
use roundmirror_core::tally::{ProjectScore, ScoreBreakdown};
use roundmirror_core::{
    CertStatus, Entity, Locks, MemberStatus, ParticipationCounts, TallyOperation, VotingMode,
    Winner,
};
use tracing::warn;

use super::contracts::{
    CertRegistry, EligibilityMiddleware, IterationRegistry, JuryRound, ProfileRegistry,
};
use super::reader::{non_empty, non_zero, to_u64};
use super::{
    classify_call_error, classify_transport_error, CertReader, EligibilityCheck, FieldResult,
    RawCert, RawTeamMember, ReadError, RoundReader, RoundRef,
};

type HttpProvider = RootProvider<Http<Client>>;

/// HTTP JSON-RPC connection to one network.
#[derive(Clone)]
pub struct RpcClient {
    provider: HttpProvider,
}

impl RpcClient {
    /// Connect to `rpc_url`.
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self { provider })
    }

    fn provider(&self) -> HttpProvider {
        self.provider.clone()
    }

    async fn block_number(&self) -> FieldResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| classify_transport_error("eth_blockNumber", e))
    }

    async fn check_code(&self, address: Address) -> FieldResult<()> {
        let code = self
            .provider
            .get_code_at(address)
            .await
            .map_err(|e| classify_transport_error("eth_getCode", e))?;

        if code.is_empty() {
            return Err(ReadError::NoCode(address));
        }
        Ok(())
    }

    async fn logs(&self, filter: &Filter) -> FieldResult<Vec<Log>> {
        self.provider
            .get_logs(filter)
            .await
            .map_err(|e| classify_transport_error("eth_getLogs", e))
    }
}

fn entity_index(entity: Entity) -> u8 {
    match entity {
        Entity::DevRel => 0,
        Entity::DaoHic => 1,
        Entity::Community => 2,
    }
}

fn invalid(what: &str, err: impl std::fmt::Display) -> ReadError {
    ReadError::NotSupported(format!("{}: {}", what, err))
}

/// [`RoundReader`] over an iteration registry and its jury contracts.
#[derive(Clone)]
pub struct EvmRoundReader {
    chain_id: u64,
    registry: Address,
    rpc: RpcClient,
}

impl EvmRoundReader {
    /// Create a reader.
    pub fn new(chain_id: u64, registry: Address, rpc: RpcClient) -> Self {
        Self {
            chain_id,
            registry,
            rpc,
        }
    }

    fn registry_contract(&self) -> IterationRegistry::IterationRegistryInstance<Http<Client>, HttpProvider> {
        IterationRegistry::new(self.registry, self.rpc.provider())
    }

    fn jury(&self, jury: Address) -> JuryRound::JuryRoundInstance<Http<Client>, HttpProvider> {
        JuryRound::new(jury, self.rpc.provider())
    }
}

#[async_trait]
impl RoundReader for EvmRoundReader {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn registry(&self) -> Address {
        self.registry
    }

    async fn check_deployed(&self) -> FieldResult<()> {
        self.rpc.check_code(self.registry).await
    }

    async fn block_number(&self) -> FieldResult<u64> {
        self.rpc.block_number().await
    }

    async fn iteration_ids(&self) -> FieldResult<Vec<u64>> {
        let ids = self
            .registry_contract()
            .getIterationIds()
            .call()
            .await
            .map_err(|e| classify_call_error("getIterationIds", e))?
            ._0;

        ids.into_iter().map(|id| to_u64("iteration id", id)).collect()
    }

    async fn rounds(&self, iteration_id: u64) -> FieldResult<Vec<RoundRef>> {
        let rounds = self
            .registry_contract()
            .getRounds(U256::from(iteration_id))
            .call()
            .await
            .map_err(|e| classify_call_error("getRounds", e))?
            ._0;

        rounds
            .into_iter()
            .map(|round| {
                Ok(RoundRef {
                    round_id: to_u64("round id", round.roundId)?,
                    jury_contract: round.jury,
                })
            })
            .collect()
    }

    async fn mode_override(
        &self,
        iteration_id: u64,
        round_id: u64,
    ) -> FieldResult<Option<VotingMode>> {
        let result = self
            .registry_contract()
            .getVotingModeOverride(U256::from(iteration_id), U256::from(round_id))
            .call()
            .await
            .map_err(|e| classify_call_error("getVotingModeOverride", e))?;

        if !result.isSet {
            return Ok(None);
        }
        VotingMode::from_raw(result.mode)
            .map(Some)
            .map_err(|e| invalid("getVotingModeOverride", e))
    }

    async fn project_metadata_cids(
        &self,
        iteration_id: u64,
        round_id: u64,
        projects: &[Address],
    ) -> FieldResult<Vec<String>> {
        let cids = self
            .registry_contract()
            .getProjectsMetadataCIDs(U256::from(iteration_id), U256::from(round_id), projects.to_vec())
            .call()
            .await
            .map_err(|e| classify_call_error("getProjectsMetadataCIDs", e))?
            ._0;

        if cids.len() != projects.len() {
            return Err(ReadError::NotSupported(format!(
                "getProjectsMetadataCIDs returned {} ids for {} projects",
                cids.len(),
                projects.len()
            )));
        }
        Ok(cids)
    }

    async fn pairing_contract(&self, jury: Address) -> FieldResult<Option<Address>> {
        let address = self
            .jury(jury)
            .pairingContract()
            .call()
            .await
            .map_err(|e| classify_call_error("pairingContract", e))?
            ._0;
        Ok(non_zero(address))
    }

    async fn voting_mode(&self, jury: Address) -> FieldResult<VotingMode> {
        let raw = self
            .jury(jury)
            .votingMode()
            .call()
            .await
            .map_err(|e| classify_call_error("votingMode", e))?
            ._0;
        VotingMode::from_raw(raw).map_err(|e| invalid("votingMode", e))
    }

    async fn is_active(&self, jury: Address) -> FieldResult<bool> {
        Ok(self
            .jury(jury)
            .isActive()
            .call()
            .await
            .map_err(|e| classify_call_error("isActive", e))?
            ._0)
    }

    async fn voting_ended(&self, jury: Address) -> FieldResult<bool> {
        Ok(self
            .jury(jury)
            .votingEnded()
            .call()
            .await
            .map_err(|e| classify_call_error("votingEnded", e))?
            ._0)
    }

    async fn voting_window(&self, jury: Address) -> FieldResult<(u64, u64)> {
        let contract = self.jury(jury);
        let start_call = contract.startTime();
        let end_call = contract.endTime();
        let (start, end) = tokio::join!(start_call.call(), end_call.call());

        let start = start.map_err(|e| classify_call_error("startTime", e))?._0;
        let end = end.map_err(|e| classify_call_error("endTime", e))?._0;
        Ok((to_u64("startTime", start)?, to_u64("endTime", end)?))
    }

    async fn locks(&self, jury: Address) -> FieldResult<Locks> {
        let contract = self.jury(jury);
        let projects_call = contract.projectsLocked();
        let locked_call = contract.locked();
        let (projects_locked, fully_locked) =
            tokio::join!(projects_call.call(), locked_call.call());

        Ok(Locks {
            projects_locked: projects_locked
                .map_err(|e| classify_call_error("projectsLocked", e))?
                ._0,
            fully_locked: fully_locked.map_err(|e| classify_call_error("locked", e))?._0,
        })
    }

    async fn dev_rel_account(&self, jury: Address) -> FieldResult<Option<Address>> {
        let address = self
            .jury(jury)
            .devRelAccount()
            .call()
            .await
            .map_err(|e| classify_call_error("devRelAccount", e))?
            ._0;
        Ok(non_zero(address))
    }

    async fn dao_hic_voters(&self, jury: Address) -> FieldResult<Vec<Address>> {
        Ok(self
            .jury(jury)
            .getDaoHicVoters()
            .call()
            .await
            .map_err(|e| classify_call_error("getDaoHicVoters", e))?
            ._0)
    }

    async fn entity_vote(&self, jury: Address, entity: Entity) -> FieldResult<Option<Address>> {
        let address = self
            .jury(jury)
            .getEntityVote(entity_index(entity))
            .call()
            .await
            .map_err(|e| classify_call_error("getEntityVote", e))?
            ._0;
        Ok(non_zero(address))
    }

    async fn participation(&self, jury: Address) -> FieldResult<ParticipationCounts> {
        let counts = self
            .jury(jury)
            .getVoteParticipationCounts()
            .call()
            .await
            .map_err(|e| classify_call_error("getVoteParticipationCounts", e))?;

        Ok(ParticipationCounts {
            dev_rel: to_u64("devRelCount", counts.devRelCount)?,
            dao_hic: to_u64("daoHicCount", counts.daoHicCount)?,
            community: to_u64("communityCount", counts.communityCount)?,
        })
    }

    async fn project_count(&self, jury: Address) -> FieldResult<u64> {
        let count = self
            .jury(jury)
            .projectCount()
            .call()
            .await
            .map_err(|e| classify_call_error("projectCount", e))?
            ._0;
        to_u64("projectCount", count)
    }

    async fn project_address(&self, jury: Address, index: u64) -> FieldResult<Address> {
        Ok(self
            .jury(jury)
            .projectAddress(U256::from(index))
            .call()
            .await
            .map_err(|e| classify_call_error("projectAddress", e))?
            ._0)
    }

    async fn winner(&self, jury: Address, operation: TallyOperation) -> FieldResult<Winner> {
        let contract = self.jury(jury);
        let (winner, has_winner) = match operation {
            TallyOperation::Consensus => {
                let r = contract
                    .getWinnerConsensus()
                    .call()
                    .await
                    .map_err(|e| classify_call_error("getWinnerConsensus", e))?;
                (r.winner, r.hasWinner)
            }
            TallyOperation::Weighted => {
                let r = contract
                    .getWinnerWeighted()
                    .call()
                    .await
                    .map_err(|e| classify_call_error("getWinnerWeighted", e))?;
                (r.winner, r.hasWinner)
            }
        };
        Ok(Winner::from_raw(winner, has_winner))
    }

    async fn score_breakdown(&self, jury: Address) -> FieldResult<ScoreBreakdown> {
        let r = self
            .jury(jury)
            .getWinnerWithScores()
            .call()
            .await
            .map_err(|e| classify_call_error("getWinnerWithScores", e))?;

        if r.projects.len() != r.scores.len() {
            return Err(ReadError::NotSupported(format!(
                "getWinnerWithScores returned {} scores for {} projects",
                r.scores.len(),
                r.projects.len()
            )));
        }

        Ok(ScoreBreakdown {
            scores: r
                .projects
                .into_iter()
                .zip(r.scores)
                .map(|(project, score)| ProjectScore { project, score })
                .collect(),
            total_possible: r.totalPossible,
        })
    }
}

/// [`CertReader`] over a cert registry, its middlewares and an optional
/// profile registry.
#[derive(Clone)]
pub struct EvmCertReader {
    chain_id: u64,
    cert_registry: Address,
    profile_registry: Option<Address>,
    rpc: RpcClient,
}

impl EvmCertReader {
    /// Create a reader.
    pub fn new(
        chain_id: u64,
        cert_registry: Address,
        profile_registry: Option<Address>,
        rpc: RpcClient,
    ) -> Self {
        Self {
            chain_id,
            cert_registry,
            profile_registry,
            rpc,
        }
    }

    fn registry_contract(&self) -> CertRegistry::CertRegistryInstance<Http<Client>, HttpProvider> {
        CertRegistry::new(self.cert_registry, self.rpc.provider())
    }

    async fn role_accounts<E: SolEvent + Send>(
        &self,
        middleware: Address,
        from_block: u64,
        to_block: u64,
        account_of: impl Fn(&E) -> Address + Send,
    ) -> FieldResult<Vec<Address>> {
        let filter = Filter::new()
            .address(middleware)
            .event_signature(E::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.rpc.logs(&filter).await?;

        let mut accounts = Vec::with_capacity(logs.len());
        for log in &logs {
            match E::decode_log(log.as_ref(), true) {
                Ok(event) => accounts.push(account_of(&event.data)),
                Err(e) => warn!("Failed to decode {} log: {}", E::SIGNATURE, e),
            }
        }
        Ok(accounts)
    }
}

#[async_trait]
impl CertReader for EvmCertReader {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn cert_registry(&self) -> Address {
        self.cert_registry
    }

    fn supports_profiles(&self) -> bool {
        self.profile_registry.is_some()
    }

    async fn check_deployed(&self) -> FieldResult<()> {
        self.rpc.check_code(self.cert_registry).await
    }

    async fn block_number(&self) -> FieldResult<u64> {
        self.rpc.block_number().await
    }

    async fn next_token_id(&self) -> FieldResult<u64> {
        let next = self
            .registry_contract()
            .nextTokenId()
            .call()
            .await
            .map_err(|e| classify_call_error("nextTokenId", e))?
            ._0;
        to_u64("nextTokenId", next)
    }

    async fn cert(&self, token_id: u64) -> FieldResult<RawCert> {
        let r = self
            .registry_contract()
            .getCert(U256::from(token_id))
            .call()
            .await
            .map_err(|e| classify_call_error("getCert", e))?;

        Ok(RawCert {
            iteration_id: to_u64("iteration", r.iteration)?,
            account: r.account,
            cert_type: r.certType,
            request_time: to_u64("requestTime", r.requestTime)?,
        })
    }

    async fn cert_status(&self, token_id: u64) -> FieldResult<CertStatus> {
        let raw = self
            .registry_contract()
            .certStatus(U256::from(token_id))
            .call()
            .await
            .map_err(|e| classify_call_error("certStatus", e))?
            ._0;
        CertStatus::from_raw(raw).map_err(|e| invalid("certStatus", e))
    }

    async fn template_cid(&self, iteration_id: u64) -> FieldResult<Option<String>> {
        let cid = self
            .registry_contract()
            .getTemplateCID(U256::from(iteration_id))
            .call()
            .await
            .map_err(|e| classify_call_error("getTemplateCID", e))?
            ._0;
        Ok(non_empty(cid))
    }

    async fn middleware(&self, iteration_id: u64) -> FieldResult<Option<Address>> {
        let address = self
            .registry_contract()
            .getMiddleware(U256::from(iteration_id))
            .call()
            .await
            .map_err(|e| classify_call_error("getMiddleware", e))?
            ._0;
        Ok(non_zero(address))
    }

    async fn team_members(&self, iteration_id: u64, project: Address) -> FieldResult<Vec<Address>> {
        Ok(self
            .registry_contract()
            .getTeamMembers(U256::from(iteration_id), project)
            .call()
            .await
            .map_err(|e| classify_call_error("getTeamMembers", e))?
            ._0)
    }

    async fn team_member(
        &self,
        iteration_id: u64,
        project: Address,
        member: Address,
    ) -> FieldResult<RawTeamMember> {
        let r = self
            .registry_contract()
            .getTeamMember(U256::from(iteration_id), project, member)
            .call()
            .await
            .map_err(|e| classify_call_error("getTeamMember", e))?;

        Ok(RawTeamMember {
            status: MemberStatus::from_raw(r.status).map_err(|e| invalid("getTeamMember", e))?,
            full_name: r.fullName,
        })
    }

    async fn is_eligible(
        &self,
        middleware: Address,
        account: Address,
    ) -> FieldResult<EligibilityCheck> {
        let r = EligibilityMiddleware::new(middleware, self.rpc.provider())
            .isEligible(account)
            .call()
            .await
            .map_err(|e| classify_call_error("isEligible", e))?;

        Ok(EligibilityCheck {
            eligible: r.eligible,
            cert_type: non_empty(r.certType),
        })
    }

    async fn role_granted_accounts(
        &self,
        middleware: Address,
        from_block: u64,
        to_block: u64,
    ) -> FieldResult<Vec<Address>> {
        self.role_accounts::<EligibilityMiddleware::RoleGranted>(
            middleware,
            from_block,
            to_block,
            |event| event.account,
        )
        .await
    }

    async fn role_revoked_accounts(
        &self,
        middleware: Address,
        from_block: u64,
        to_block: u64,
    ) -> FieldResult<Vec<Address>> {
        self.role_accounts::<EligibilityMiddleware::RoleRevoked>(
            middleware,
            from_block,
            to_block,
            |event| event.account,
        )
        .await
    }

    async fn profile_cid(&self, account: Address) -> FieldResult<Option<String>> {
        let Some(registry) = self.profile_registry else {
            return Err(ReadError::NotSupported("no profile registry configured".into()));
        };

        let cid = ProfileRegistry::new(registry, self.rpc.provider())
            .profileCID(account)
            .call()
            .await
            .map_err(|e| classify_call_error("profileCID", e))?
            ._0;
        Ok(non_empty(cid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_indices_match_contract_order() {
        assert_eq!(entity_index(Entity::DevRel), 0);
        assert_eq!(entity_index(Entity::DaoHic), 1);
        assert_eq!(entity_index(Entity::Community), 2);
    }

    #[test]
    fn test_rpc_client_rejects_invalid_url() {
        assert!(RpcClient::new("not a url").is_err());
        assert!(RpcClient::new("http://localhost:8545").is_ok());
    }
}
