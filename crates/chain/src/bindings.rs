//! Solidity bindings for the subset of the hub used by workers.

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IexecHubABILegacy {
        event TaskContribute(bytes32 indexed taskid, address indexed worker, bytes32 hash);
        event TaskReveal(bytes32 indexed taskid, address indexed worker, bytes32 digest);

        function contributeABILegacy(
            bytes32 taskid,
            bytes32 resultHash,
            bytes32 resultSeal,
            address enclaveChallenge,
            uint8 enclaveSignV,
            bytes32 enclaveSignR,
            bytes32 enclaveSignS,
            uint8 poolSignV,
            bytes32 poolSignR,
            bytes32 poolSignS
        ) external;

        function reveal(bytes32 taskid, bytes32 resultDigest) external;

        function viewTaskABILegacy(bytes32 taskid)
            external
            view
            returns (
                uint256 status,
                bytes32 dealid,
                uint256 idx,
                uint256 timeref,
                uint256 contributionDeadline,
                uint256 revealDeadline,
                uint256 finalDeadline,
                bytes32 consensusValue,
                uint256 revealCounter,
                uint256 winnerCounter,
                address[] contributors,
                bytes32 resultDigest,
                bytes results
            );

        function viewContributionABILegacy(bytes32 taskid, address worker)
            external
            view
            returns (uint256 status, bytes32 resultHash, bytes32 resultSeal, address enclaveChallenge);

        function viewAccountABILegacy(address account)
            external
            view
            returns (uint256 stake, uint256 locked);
    }
}
