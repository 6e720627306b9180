//! Per-agent scheduling and observation state.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use vigil_primitives::{AgentAddress, DecisionRef, HealthLevel};

/// Mutable bookkeeping the monitor keeps per agent.
#[derive(Clone, Debug)]
pub struct TrackedAgent {
    /// The agent's contract address.
    pub address: AgentAddress,
    /// Creator account, when known.
    pub creator: Option<AgentAddress>,
    /// Expected heartbeat cadence, sourced once at first observation.
    pub nominal_interval: Duration,
    /// Highest heartbeat count seen so far, from snapshots or events.
    pub last_heartbeat_count: Option<u64>,
    /// Most recent decision artifact seen.
    pub last_decision_ref: Option<DecisionRef>,
    /// Level assigned by the last evaluation.
    pub last_level: Option<HealthLevel>,
    /// Set once the death event has been emitted; dead agents leave the
    /// scheduling rotation but stay queryable.
    pub dead: bool,
    /// Consecutive transient check failures.
    pub consecutive_failures: u32,
    /// Checks are skipped until this time, epoch seconds.
    pub deferred_until: Option<u64>,
    /// Consecutive ticks on which this agent's enqueue overflowed.
    pub overflow_streak: u32,
    /// Last balance-runway alert, epoch seconds.
    pub last_balance_alert_at: Option<u64>,
    /// A heartbeat event has verified the agent until this time, epoch
    /// seconds; the next scheduled check skips its RPC.
    pub verified_until: Option<u64>,
}

impl TrackedAgent {
    fn new(address: AgentAddress, nominal_interval: Duration, creator: Option<AgentAddress>) -> Self {
        Self {
            address,
            creator,
            nominal_interval,
            last_heartbeat_count: None,
            last_decision_ref: None,
            last_level: None,
            dead: false,
            consecutive_failures: 0,
            deferred_until: None,
            overflow_streak: 0,
            last_balance_alert_at: None,
            verified_until: None,
        }
    }
}

/// Outcome of comparing an observed heartbeat count against the stored
/// high-water mark.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CountObservation {
    /// First observation for this agent.
    First,
    /// The counter advanced; the stored mark was updated.
    Increased,
    /// The counter matches the stored mark.
    Unchanged,
    /// The observation is below the stored mark.
    Decreased,
}

/// Registry of every agent the monitor knows about. The scheduler owns the
/// rotation; readers receive cloned entries.
#[derive(Default)]
pub struct AgentTracker {
    inner: RwLock<HashMap<AgentAddress, TrackedAgent>>,
}

impl AgentTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an agent to the rotation. Returns `false` when it was already
    /// tracked.
    pub async fn register(
        &self,
        address: AgentAddress,
        nominal_interval: Duration,
        creator: Option<AgentAddress>,
    ) -> bool {
        let mut guard = self.inner.write().await;
        if guard.contains_key(&address) {
            return false;
        }
        guard.insert(address, TrackedAgent::new(address, nominal_interval, creator));
        debug!(agent = %address, "agent registered for monitoring");
        true
    }

    /// Returns a copy of the agent's entry.
    pub async fn entry(&self, address: AgentAddress) -> Option<TrackedAgent> {
        self.inner.read().await.get(&address).cloned()
    }

    /// Returns a copy of every entry.
    pub async fn all(&self) -> Vec<TrackedAgent> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Addresses eligible for the scheduling rotation: not dead and not
    /// inside a failure-backoff window.
    pub async fn schedulable(&self, now: u64) -> Vec<AgentAddress> {
        self.inner
            .read()
            .await
            .values()
            .filter(|entry| !entry.dead)
            .filter(|entry| entry.deferred_until.is_none_or(|until| until <= now))
            .map(|entry| entry.address)
            .collect()
    }

    /// Live (not dead) agent count.
    pub async fn alive_count(&self) -> usize {
        self.inner.read().await.values().filter(|e| !e.dead).count()
    }

    /// Dead agent count.
    pub async fn dead_count(&self) -> usize {
        self.inner.read().await.values().filter(|e| e.dead).count()
    }

    /// Total tracked agents.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Returns `true` when no agents are tracked.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Marks the agent dead, returning `true` only on the first call.
    pub async fn mark_dead(&self, address: AgentAddress) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get_mut(&address) {
            Some(entry) if !entry.dead => {
                entry.dead = true;
                true
            }
            _ => false,
        }
    }

    /// Compares and records a heartbeat count observation.
    pub async fn observe_count(&self, address: AgentAddress, count: u64) -> CountObservation {
        let mut guard = self.inner.write().await;
        let Some(entry) = guard.get_mut(&address) else {
            return CountObservation::First;
        };
        match entry.last_heartbeat_count {
            None => {
                entry.last_heartbeat_count = Some(count);
                CountObservation::First
            }
            Some(previous) if count > previous => {
                entry.last_heartbeat_count = Some(count);
                CountObservation::Increased
            }
            Some(previous) if count == previous => CountObservation::Unchanged,
            Some(_) => CountObservation::Decreased,
        }
    }

    /// Records a decision-ref observation, returning `true` when it
    /// changed from the previously stored one.
    pub async fn observe_decision(&self, address: AgentAddress, decision: DecisionRef) -> bool {
        let mut guard = self.inner.write().await;
        let Some(entry) = guard.get_mut(&address) else {
            return false;
        };
        if entry.last_decision_ref == Some(decision) {
            return false;
        }
        let first = entry.last_decision_ref.is_none();
        entry.last_decision_ref = Some(decision);
        !first
    }

    /// Stores the level assigned by an evaluation, returning the previous
    /// one.
    pub async fn set_level(&self, address: AgentAddress, level: HealthLevel) -> Option<HealthLevel> {
        let mut guard = self.inner.write().await;
        guard
            .get_mut(&address)
            .and_then(|entry| entry.last_level.replace(level))
    }

    /// Records a transient failure and computes the backoff deferral.
    /// Returns the consecutive-failure count.
    pub async fn note_failure(
        &self,
        address: AgentAddress,
        now: u64,
        base: Duration,
        cap: Duration,
    ) -> u32 {
        let mut guard = self.inner.write().await;
        let Some(entry) = guard.get_mut(&address) else {
            return 0;
        };
        entry.consecutive_failures += 1;
        let failures = entry.consecutive_failures;
        if failures >= 3 {
            let exponent = (failures - 3).min(16);
            let deferral = base
                .checked_mul(1_u32 << exponent)
                .unwrap_or(cap)
                .min(cap);
            entry.deferred_until = Some(now + deferral.as_secs());
        }
        failures
    }

    /// Clears failure bookkeeping after a successful check.
    pub async fn note_success(&self, address: AgentAddress) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.get_mut(&address) {
            entry.consecutive_failures = 0;
            entry.deferred_until = None;
        }
    }

    /// Records an enqueue overflow, returning the consecutive streak.
    pub async fn note_overflow(&self, address: AgentAddress) -> u32 {
        let mut guard = self.inner.write().await;
        guard.get_mut(&address).map_or(0, |entry| {
            entry.overflow_streak += 1;
            entry.overflow_streak
        })
    }

    /// Clears the overflow streak after a successful enqueue.
    pub async fn clear_overflow(&self, address: AgentAddress) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.get_mut(&address) {
            entry.overflow_streak = 0;
        }
    }

    /// Marks the agent verified by a heartbeat event until `until`.
    pub async fn mark_verified(&self, address: AgentAddress, until: u64) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.get_mut(&address) {
            entry.verified_until = Some(until);
        }
    }

    /// Returns `true` while a heartbeat event still vouches for the agent.
    pub async fn is_verified(&self, address: AgentAddress, now: u64) -> bool {
        let guard = self.inner.read().await;
        guard
            .get(&address)
            .and_then(|entry| entry.verified_until)
            .is_some_and(|until| until > now)
    }

    /// Records the balance-runway alert time.
    pub async fn set_balance_alert_at(&self, address: AgentAddress, now: u64) {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.get_mut(&address) {
            entry.last_balance_alert_at = Some(now);
        }
    }
}
