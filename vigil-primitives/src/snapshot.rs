//! Point-in-time views of an agent's on-chain and marketplace state.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::{DecisionRef, GenomeRef};

/// Read-only view of an agent contract's state at one block.
///
/// `heartbeat_count` is monotone non-decreasing for a living agent; a
/// decrease across two observations is a protocol mismatch, never accepted.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    /// Opaque reference to the agent's genome artifact.
    pub genome_ref: GenomeRef,
    /// Creation time, epoch seconds.
    pub birth_time: u64,
    /// Time of the most recent heartbeat, epoch seconds.
    pub last_heartbeat_at: u64,
    /// Monotone heartbeat counter.
    pub heartbeat_count: u64,
    /// Whether the contract still reports the agent as alive.
    pub alive: bool,
    /// Balance in USDC 6-decimal base units.
    pub balance: u128,
    /// Reference to the most recent decision artifact.
    pub last_decision_ref: DecisionRef,
    /// Cumulative operating cost in USDC 6-decimal base units.
    pub cumulative_cost: u128,
}

impl AgentSnapshot {
    /// Days of runway left at the current burn, `None` when no cost has
    /// accrued yet.
    #[must_use]
    pub fn runway_days(&self) -> Option<u128> {
        if self.cumulative_cost == 0 {
            return None;
        }
        Some(self.balance / self.cumulative_cost)
    }
}

/// Deployment state reported by the workload marketplace.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketplaceState {
    /// Container is running.
    Active,
    /// Container is provisioned but not running.
    Inactive,
    /// Deployment has been closed on the marketplace.
    Closed,
    /// The marketplace reports the deployment as failed.
    Error,
    /// The marketplace could not be queried or returned an unrecognized
    /// state.
    Unknown,
}

impl MarketplaceState {
    /// Returns `true` when the state signals the container is gone or
    /// broken.
    #[must_use]
    pub const fn is_down(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

impl Display for MarketplaceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Closed => "closed",
            Self::Error => "error",
            Self::Unknown => "unknown",
        })
    }
}

/// Derived liveness view, recomputed on demand and never persisted.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatStatus {
    /// Time of the most recent heartbeat, epoch seconds.
    pub last_heartbeat_at: u64,
    /// When the next heartbeat is nominally expected, epoch seconds.
    pub next_expected_at: u64,
    /// The contract-enforced hard deadline, epoch seconds.
    pub deadline_at: u64,
    /// Seconds until the hard deadline; negative once elapsed.
    pub time_until_deadline: i64,
    /// Whether the agent is currently inside its nominal window.
    pub healthy: bool,
    /// Marketplace state observed alongside the snapshot.
    pub marketplace_state: MarketplaceState,
}

impl HeartbeatStatus {
    /// Synthesizes the derived view from a fresh snapshot.
    #[must_use]
    pub fn derive(
        snapshot: &AgentSnapshot,
        nominal_interval: Duration,
        hard_deadline: Duration,
        now: u64,
        marketplace_state: MarketplaceState,
    ) -> Self {
        let next_expected_at = snapshot.last_heartbeat_at + nominal_interval.as_secs();
        let deadline_at = snapshot.last_heartbeat_at + hard_deadline.as_secs();
        #[allow(clippy::cast_possible_wrap)]
        let time_until_deadline = deadline_at as i64 - now as i64;
        Self {
            last_heartbeat_at: snapshot.last_heartbeat_at,
            next_expected_at,
            deadline_at,
            time_until_deadline,
            healthy: now < next_expected_at,
            marketplace_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(last_heartbeat_at: u64) -> AgentSnapshot {
        AgentSnapshot {
            genome_ref: GenomeRef::default(),
            birth_time: 0,
            last_heartbeat_at,
            heartbeat_count: 1,
            alive: true,
            balance: 70_000_000,
            last_decision_ref: DecisionRef::default(),
            cumulative_cost: 10_000_000,
        }
    }

    #[test]
    fn derives_healthy_status() {
        let status = HeartbeatStatus::derive(
            &snapshot(99_500),
            Duration::from_secs(21_600),
            Duration::from_secs(604_800),
            100_000,
            MarketplaceState::Active,
        );
        assert!(status.healthy);
        assert_eq!(status.next_expected_at, 121_100);
        assert_eq!(status.deadline_at, 704_300);
        assert_eq!(status.time_until_deadline, 604_300);
    }

    #[test]
    fn negative_remaining_after_deadline() {
        let status = HeartbeatStatus::derive(
            &snapshot(0),
            Duration::from_secs(21_600),
            Duration::from_secs(604_800),
            605_800,
            MarketplaceState::Unknown,
        );
        assert!(!status.healthy);
        assert_eq!(status.time_until_deadline, -1_000);
    }

    #[test]
    fn runway_requires_accrued_cost() {
        let mut s = snapshot(0);
        assert_eq!(s.runway_days(), Some(7));
        s.cumulative_cost = 0;
        assert_eq!(s.runway_days(), None);
    }

    #[test]
    fn down_states() {
        assert!(MarketplaceState::Closed.is_down());
        assert!(MarketplaceState::Error.is_down());
        assert!(!MarketplaceState::Unknown.is_down());
    }
}
