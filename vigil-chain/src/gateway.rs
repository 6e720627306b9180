//! Chain gateway contract.

use std::time::Duration;

use async_trait::async_trait;

use vigil_primitives::{
    AgentAddress, AgentSnapshot, DecisionRef, GenomeRef, MonitorResult,
};

/// An `AgentCreated` event observed on the factory contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreationEvent {
    /// Address of the freshly deployed agent.
    pub agent_address: AgentAddress,
    /// Account that deployed it.
    pub creator: AgentAddress,
    /// Genome artifact the agent was instantiated from.
    pub genome_ref: GenomeRef,
    /// Creation time, epoch seconds.
    pub birth_time: u64,
}

/// A `Heartbeat` event observed on an agent contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatEvent {
    /// Agent that emitted the heartbeat.
    pub agent_address: AgentAddress,
    /// Counter value after the heartbeat.
    pub heartbeat_count: u64,
    /// Decision artifact referenced by the heartbeat.
    pub decision_ref: DecisionRef,
    /// On-chain timestamp of the heartbeat, epoch seconds.
    pub timestamp: u64,
}

/// A decision artifact derived from indexed event logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionRecord {
    /// The recorded decision artifact.
    pub decision_ref: DecisionRef,
    /// Counter value when the decision rode a heartbeat, `None` for
    /// standalone decision events.
    pub heartbeat_count: Option<u64>,
    /// On-chain timestamp, epoch seconds.
    pub timestamp: u64,
    /// Block the event was emitted in.
    pub block_number: u64,
}

/// One page of range-polled events plus the cursor for the next poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainEvents<T> {
    /// Decoded events, in block order.
    pub events: Vec<T>,
    /// First block the next poll should start from.
    pub next_from_block: u64,
}

/// Read-only access to the agent factory and agent contracts.
///
/// Transient RPC failures are retried internally with exponential backoff
/// before surfacing as `transientChainFailure`. A malformed response is
/// `protocolMismatch` and is never retried. A missing agent is `Ok(None)`,
/// not an error: the agent set may shrink between enumeration and
/// snapshot.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Reads the agent's current on-chain state.
    async fn snapshot(&self, agent: AgentAddress) -> MonitorResult<Option<AgentSnapshot>>;

    /// Lists every agent the factory currently knows, each address exactly
    /// once. Registry pagination is hidden from the caller.
    async fn enumerate(&self) -> MonitorResult<Vec<AgentAddress>>;

    /// Reads the agent's advertised heartbeat cadence, when it exposes
    /// one. Sourced once per agent at first observation.
    async fn nominal_interval(&self, agent: AgentAddress) -> MonitorResult<Option<Duration>>;

    /// Reads the agent's creator account.
    async fn creator(&self, agent: AgentAddress) -> MonitorResult<Option<AgentAddress>>;

    /// Derives the agent's recent decision artifacts from event logs over
    /// the configured lookback window.
    async fn decisions(
        &self,
        agent: AgentAddress,
        limit: usize,
    ) -> MonitorResult<Vec<DecisionRecord>>;

    /// Current chain head.
    async fn latest_block(&self) -> MonitorResult<u64>;

    /// Polls factory creation events from `from_block` to the head.
    async fn creations_since(&self, from_block: u64) -> MonitorResult<ChainEvents<CreationEvent>>;

    /// Polls heartbeat events for the given agents from `from_block` to
    /// the head.
    async fn heartbeats_since(
        &self,
        from_block: u64,
        agents: &[AgentAddress],
    ) -> MonitorResult<ChainEvents<HeartbeatEvent>>;
}
