//! Contract bindings for the remote read surface.

use alloy::sol;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract IterationRegistry {
        struct RoundInfo {
            uint256 roundId;
            address jury;
        }

        function getIterationIds() external view returns (uint256[]);
        function getRounds(uint256 iterationId) external view returns (RoundInfo[]);
        function getVotingModeOverride(uint256 iterationId, uint256 roundId)
            external view returns (bool isSet, uint8 mode);
        function getProjectsMetadataCIDs(uint256 iterationId, uint256 roundId, address[] projects)
            external view returns (string[]);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract JuryRound {
        function pairingContract() external view returns (address);
        function votingMode() external view returns (uint8);
        function isActive() external view returns (bool);
        function votingEnded() external view returns (bool);
        function startTime() external view returns (uint256);
        function endTime() external view returns (uint256);
        function projectsLocked() external view returns (bool);
        function locked() external view returns (bool);
        function devRelAccount() external view returns (address);
        function getDaoHicVoters() external view returns (address[]);
        function getEntityVote(uint8 entity) external view returns (address);
        function getVoteParticipationCounts()
            external view returns (uint256 devRelCount, uint256 daoHicCount, uint256 communityCount);
        function projectCount() external view returns (uint256);
        function projectAddress(uint256 index) external view returns (address);
        function getWinnerConsensus() external view returns (address winner, bool hasWinner);
        function getWinnerWeighted() external view returns (address winner, bool hasWinner);
        function getWinnerWithScores()
            external view returns (address[] projects, uint256[] scores, uint256 totalPossible);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract CertRegistry {
        function nextTokenId() external view returns (uint256);
        function getCert(uint256 tokenId)
            external view returns (uint256 iteration, address account, string certType, uint256 requestTime);
        function certStatus(uint256 tokenId) external view returns (uint8);
        function getTemplateCID(uint256 iteration) external view returns (string);
        function getMiddleware(uint256 iteration) external view returns (address);
        function getTeamMembers(uint256 iteration, address project) external view returns (address[]);
        function getTeamMember(uint256 iteration, address project, address member)
            external view returns (uint8 status, string fullName);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract EligibilityMiddleware {
        function isEligible(address account) external view returns (bool eligible, string certType);

        event RoleGranted(bytes32 indexed role, address indexed account, address indexed sender);
        event RoleRevoked(bytes32 indexed role, address indexed account, address indexed sender);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract ProfileRegistry {
        function profileCID(address account) external view returns (string);
    }
}
