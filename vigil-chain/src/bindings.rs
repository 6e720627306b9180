//! Solidity bindings for the agent factory and agent contracts.

use alloy::sol;

sol! {
    #[sol(rpc)]
    #[derive(Debug)]
    contract AgentFactory {
        event AgentCreated(address indexed agent, address indexed creator, bytes32 genomeRef, uint64 birthTime);

        function agentCount() external view returns (uint256);
        function agentsPage(uint256 offset, uint256 limit) external view returns (address[] memory);
    }

    #[sol(rpc)]
    #[derive(Debug)]
    contract LifeforceAgent {
        event Heartbeat(uint64 indexed heartbeatCount, bytes32 decisionRef, uint64 timestamp);
        event Decision(bytes32 indexed decisionRef, uint64 timestamp);

        function vitals() external view returns (
            bytes32 genomeRef,
            uint64 birthTime,
            uint64 lastHeartbeatAt,
            uint64 heartbeatCount,
            bool alive,
            uint256 balance,
            bytes32 lastDecisionRef,
            uint256 cumulativeCost
        );
        function creator() external view returns (address);
        function nominalInterval() external view returns (uint64);
        function declareAbandoned() external;
    }
}
