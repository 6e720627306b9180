//! Alloy-backed chain gateway.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use url::Url;

use vigil_primitives::{
    AgentAddress, AgentSnapshot, MonitorError, MonitorResult,
};

use crate::bindings::{AgentFactory, LifeforceAgent};
use crate::gateway::{ChainEvents, ChainGateway, CreationEvent, DecisionRecord, HeartbeatEvent};

/// Configuration for [`RpcChainGateway`].
#[derive(Debug, Clone)]
pub struct ChainConfig {
    endpoint: String,
    factory: AgentAddress,
    max_connections: usize,
    rpc_deadline: Duration,
    retry_attempts: u32,
    retry_initial: Duration,
    retry_cap: Duration,
    lookback_blocks: u64,
    max_block_range: u64,
    page_size: u64,
}

impl ChainConfig {
    /// Creates a configuration for the given RPC endpoint and factory
    /// contract.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, factory: AgentAddress) -> Self {
        Self {
            endpoint: endpoint.into(),
            factory,
            max_connections: 8,
            rpc_deadline: Duration::from_secs(30),
            retry_attempts: 3,
            retry_initial: Duration::from_secs(5),
            retry_cap: Duration::from_secs(60),
            lookback_blocks: 10_000,
            max_block_range: 2_000,
            page_size: 256,
        }
    }

    /// Caps the connection pool at `min(worker_count, max_rpc_connections)`.
    #[must_use]
    pub fn with_connection_cap(mut self, worker_count: usize, max_rpc_connections: usize) -> Self {
        self.max_connections = worker_count.min(max_rpc_connections).max(1);
        self
    }

    /// Sets the per-call deadline.
    #[must_use]
    pub const fn with_rpc_deadline(mut self, deadline: Duration) -> Self {
        self.rpc_deadline = deadline;
        self
    }

    /// Sets the lookback window for event-derived queries.
    #[must_use]
    pub const fn with_lookback_blocks(mut self, blocks: u64) -> Self {
        self.lookback_blocks = blocks;
        self
    }
}

/// Chain gateway over an HTTP JSON-RPC provider.
pub struct RpcChainGateway {
    provider: DynProvider,
    factory: Address,
    permits: Semaphore,
    config: ChainConfig,
}

impl RpcChainGateway {
    /// Connects to the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidInput`] when the endpoint URL does
    /// not parse.
    pub fn connect(config: ChainConfig) -> MonitorResult<Self> {
        let url: Url = config
            .endpoint
            .parse()
            .map_err(|err| MonitorError::invalid_input(format!("rpc endpoint: {err}")))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self {
            provider,
            factory: config.factory.into_inner(),
            permits: Semaphore::new(config.max_connections.max(1)),
            config,
        })
    }

    /// Runs one RPC operation with the gateway's deadline, retry, and
    /// connection-pool policy. Fatal errors short-circuit; transient ones
    /// back off exponentially with jitter.
    async fn with_retry<T, F, Fut>(&self, op: &str, call: F) -> MonitorResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = MonitorResult<T>>,
    {
        let mut delay = self.config.retry_initial;
        let mut last = MonitorError::transient_chain(format!("{op}: no attempt made"));

        for attempt in 1..=self.config.retry_attempts {
            let outcome = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| MonitorError::transient_chain("connection pool closed"))?;
                timeout(self.config.rpc_deadline, call()).await
            };

            match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if err.is_fatal() => return Err(err),
                Ok(Err(err)) => last = err,
                Err(_) => last = MonitorError::transient_chain(format!("{op} timed out")),
            }

            if attempt < self.config.retry_attempts {
                let backoff = jittered(delay);
                warn!(op, attempt, ?backoff, error = %last, "rpc attempt failed; backing off");
                sleep(backoff).await;
                delay = (delay * 2).min(self.config.retry_cap);
            }
        }

        Err(last)
    }

    async fn is_contract(&self, address: Address) -> bool {
        match self.provider.get_code_at(address).await {
            Ok(code) => !code.is_empty(),
            Err(_) => true,
        }
    }

    async fn range_logs(&self, filter: Filter) -> MonitorResult<Vec<Log>> {
        self.with_retry("getLogs", || {
            let provider = self.provider.clone();
            let filter = filter.clone();
            async move {
                provider
                    .get_logs(&filter)
                    .await
                    .map_err(|err| MonitorError::transient_chain(format!("getLogs: {err}")))
            }
        })
        .await
    }

    fn clamp_range(&self, from_block: u64, latest: u64) -> Option<(u64, u64)> {
        if from_block > latest {
            return None;
        }
        let to = latest.min(from_block.saturating_add(self.config.max_block_range));
        Some((from_block, to))
    }
}

fn jittered(delay: Duration) -> Duration {
    let factor = rand::rng().random_range(0.75..=1.25_f64);
    delay.mul_f64(factor)
}

fn classify_contract(op: &str, err: &alloy::contract::Error) -> MonitorError {
    match err {
        alloy::contract::Error::TransportError(inner) => {
            MonitorError::transient_chain(format!("{op}: {inner}"))
        }
        other => MonitorError::protocol_mismatch(format!("{op}: {other}")),
    }
}

fn to_u128(op: &str, value: alloy::primitives::U256) -> MonitorResult<u128> {
    u128::try_from(value)
        .map_err(|_| MonitorError::protocol_mismatch(format!("{op}: value exceeds u128")))
}

#[async_trait]
impl ChainGateway for RpcChainGateway {
    async fn snapshot(&self, agent: AgentAddress) -> MonitorResult<Option<AgentSnapshot>> {
        let contract = LifeforceAgent::new(agent.into_inner(), self.provider.clone());
        let vitals = self
            .with_retry("vitals", || {
                let contract = contract.clone();
                async move {
                    contract
                        .vitals()
                        .call()
                        .await
                        .map_err(|err| classify_contract("vitals", &err))
                }
            })
            .await;

        let vitals = match vitals {
            Ok(vitals) => vitals,
            Err(err) if err.is_fatal() => {
                // The agent set may shrink between enumeration and
                // snapshot; an empty account is absence, not corruption.
                if self.is_contract(agent.into_inner()).await {
                    return Err(err);
                }
                debug!(agent = %agent, "snapshot target is no longer a contract");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        Ok(Some(AgentSnapshot {
            genome_ref: vitals.genomeRef.into(),
            birth_time: vitals.birthTime,
            last_heartbeat_at: vitals.lastHeartbeatAt,
            heartbeat_count: vitals.heartbeatCount,
            alive: vitals.alive,
            balance: to_u128("vitals.balance", vitals.balance)?,
            last_decision_ref: vitals.lastDecisionRef.into(),
            cumulative_cost: to_u128("vitals.cumulativeCost", vitals.cumulativeCost)?,
        }))
    }

    async fn enumerate(&self) -> MonitorResult<Vec<AgentAddress>> {
        let factory = AgentFactory::new(self.factory, self.provider.clone());
        let count = self
            .with_retry("agentCount", || {
                let factory = factory.clone();
                async move {
                    factory
                        .agentCount()
                        .call()
                        .await
                        .map_err(|err| classify_contract("agentCount", &err))
                }
            })
            .await?;
        let count = to_u128("agentCount", count)?;

        let mut seen: HashSet<Address> = HashSet::new();
        let mut addresses = Vec::new();
        let mut offset: u128 = 0;
        while offset < count {
            let page = self
                .with_retry("agentsPage", || {
                    let factory = factory.clone();
                    let offset = alloy::primitives::U256::from(offset);
                    let limit = alloy::primitives::U256::from(self.config.page_size);
                    async move {
                        factory
                            .agentsPage(offset, limit)
                            .call()
                            .await
                            .map_err(|err| classify_contract("agentsPage", &err))
                    }
                })
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as u128;
            for address in page {
                if seen.insert(address) {
                    addresses.push(AgentAddress::from_inner(address));
                }
            }
        }
        Ok(addresses)
    }

    async fn nominal_interval(&self, agent: AgentAddress) -> MonitorResult<Option<Duration>> {
        let contract = LifeforceAgent::new(agent.into_inner(), self.provider.clone());
        let result = self
            .with_retry("nominalInterval", || {
                let contract = contract.clone();
                async move {
                    contract
                        .nominalInterval()
                        .call()
                        .await
                        .map_err(|err| classify_contract("nominalInterval", &err))
                }
            })
            .await;
        match result {
            Ok(0) => Ok(None),
            Ok(secs) => Ok(Some(Duration::from_secs(secs))),
            // Older agent generations never exposed a cadence.
            Err(err) if err.is_fatal() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn creator(&self, agent: AgentAddress) -> MonitorResult<Option<AgentAddress>> {
        let contract = LifeforceAgent::new(agent.into_inner(), self.provider.clone());
        let result = self
            .with_retry("creator", || {
                let contract = contract.clone();
                async move {
                    contract
                        .creator()
                        .call()
                        .await
                        .map_err(|err| classify_contract("creator", &err))
                }
            })
            .await;
        match result {
            Ok(address) => Ok(Some(AgentAddress::from_inner(address))),
            Err(err) if err.is_fatal() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn decisions(
        &self,
        agent: AgentAddress,
        limit: usize,
    ) -> MonitorResult<Vec<DecisionRecord>> {
        let latest = self.latest_block().await?;
        let from = latest.saturating_sub(self.config.lookback_blocks);
        let filter = Filter::new()
            .address(agent.into_inner())
            .from_block(from)
            .to_block(latest);
        let logs = self.range_logs(filter).await?;

        let mut records = Vec::new();
        for log in logs {
            let Some(topic0) = log.topic0() else { continue };
            let block_number = log.block_number.unwrap_or_default();
            if *topic0 == LifeforceAgent::Heartbeat::SIGNATURE_HASH {
                if let Ok(decoded) = log.log_decode::<LifeforceAgent::Heartbeat>() {
                    let event = decoded.inner.data;
                    records.push(DecisionRecord {
                        decision_ref: event.decisionRef.into(),
                        heartbeat_count: Some(event.heartbeatCount),
                        timestamp: event.timestamp,
                        block_number,
                    });
                }
            } else if *topic0 == LifeforceAgent::Decision::SIGNATURE_HASH {
                if let Ok(decoded) = log.log_decode::<LifeforceAgent::Decision>() {
                    let event = decoded.inner.data;
                    records.push(DecisionRecord {
                        decision_ref: event.decisionRef.into(),
                        heartbeat_count: None,
                        timestamp: event.timestamp,
                        block_number,
                    });
                }
            }
        }
        records.sort_by(|a, b| {
            b.block_number
                .cmp(&a.block_number)
                .then(b.timestamp.cmp(&a.timestamp))
        });
        records.truncate(limit);
        Ok(records)
    }

    async fn latest_block(&self) -> MonitorResult<u64> {
        self.with_retry("blockNumber", || {
            let provider = self.provider.clone();
            async move {
                provider
                    .get_block_number()
                    .await
                    .map_err(|err| MonitorError::transient_chain(format!("blockNumber: {err}")))
            }
        })
        .await
    }

    async fn creations_since(&self, from_block: u64) -> MonitorResult<ChainEvents<CreationEvent>> {
        let latest = self.latest_block().await?;
        let Some((from, to)) = self.clamp_range(from_block, latest) else {
            return Ok(ChainEvents {
                events: Vec::new(),
                next_from_block: from_block,
            });
        };

        let filter = Filter::new()
            .address(self.factory)
            .event_signature(AgentFactory::AgentCreated::SIGNATURE_HASH)
            .from_block(from)
            .to_block(to);
        let logs = self.range_logs(filter).await?;

        let mut events = Vec::new();
        for log in logs {
            match log.log_decode::<AgentFactory::AgentCreated>() {
                Ok(decoded) => {
                    let event = decoded.inner.data;
                    events.push(CreationEvent {
                        agent_address: AgentAddress::from_inner(event.agent),
                        creator: AgentAddress::from_inner(event.creator),
                        genome_ref: event.genomeRef.into(),
                        birth_time: event.birthTime,
                    });
                }
                Err(err) => {
                    warn!(?err, "undecodable AgentCreated log skipped");
                }
            }
        }
        Ok(ChainEvents {
            events,
            next_from_block: to + 1,
        })
    }

    async fn heartbeats_since(
        &self,
        from_block: u64,
        agents: &[AgentAddress],
    ) -> MonitorResult<ChainEvents<HeartbeatEvent>> {
        let latest = self.latest_block().await?;
        let Some((from, to)) = self.clamp_range(from_block, latest) else {
            return Ok(ChainEvents {
                events: Vec::new(),
                next_from_block: from_block,
            });
        };
        if agents.is_empty() {
            return Ok(ChainEvents {
                events: Vec::new(),
                next_from_block: to + 1,
            });
        }

        let addresses: Vec<Address> = agents.iter().map(|a| a.into_inner()).collect();
        let filter = Filter::new()
            .address(addresses)
            .event_signature(LifeforceAgent::Heartbeat::SIGNATURE_HASH)
            .from_block(from)
            .to_block(to);
        let logs = self.range_logs(filter).await?;

        let mut events = Vec::new();
        for log in logs {
            match log.log_decode::<LifeforceAgent::Heartbeat>() {
                Ok(decoded) => {
                    let agent_address = AgentAddress::from_inner(decoded.inner.address);
                    let event = decoded.inner.data;
                    events.push(HeartbeatEvent {
                        agent_address,
                        heartbeat_count: event.heartbeatCount,
                        decision_ref: event.decisionRef.into(),
                        timestamp: event.timestamp,
                    });
                }
                Err(err) => {
                    warn!(?err, "undecodable Heartbeat log skipped");
                }
            }
        }
        Ok(ChainEvents {
            events,
            next_from_block: to + 1,
        })
    }
}
