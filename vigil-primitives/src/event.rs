//! Fan-out event records delivered to subscribers.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::address::{AgentAddress, DecisionRef};
use crate::alert::Alert;
use crate::severity::{HealthLevel, Severity};

/// Broad classification of a [`MonitorEvent`], matching the wire-level
/// `type` field of the broadcast protocol.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A heartbeat was observed on chain.
    Heartbeat,
    /// A decision artifact was recorded without advancing the counter.
    Decision,
    /// The agent's derived health level changed.
    Status,
    /// The agent was observed dead on chain.
    Death,
    /// An operational error or alert concerning the agent.
    Error,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Heartbeat => "heartbeat",
            Self::Decision => "decision",
            Self::Status => "status",
            Self::Death => "death",
            Self::Error => "error",
        })
    }
}

/// Tagged union of everything the control plane broadcasts.
///
/// Timestamps are epoch milliseconds. Per agent, the hub guarantees
/// strictly increasing timestamps; across agents there is no ordering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MonitorEvent {
    /// A heartbeat advanced the agent's liveness counter.
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        /// Agent that emitted the heartbeat.
        agent_address: AgentAddress,
        /// Counter value after the heartbeat.
        heartbeat_count: u64,
        /// Decision artifact referenced by the heartbeat.
        decision_ref: DecisionRef,
        /// Emission time, epoch milliseconds.
        timestamp: u64,
    },
    /// A decision artifact was recorded.
    #[serde(rename_all = "camelCase")]
    Decision {
        /// Agent that recorded the decision.
        agent_address: AgentAddress,
        /// The recorded decision artifact.
        decision_ref: DecisionRef,
        /// Emission time, epoch milliseconds.
        timestamp: u64,
    },
    /// The agent's derived health level changed.
    #[serde(rename_all = "camelCase")]
    StatusChange {
        /// Agent whose level changed.
        agent_address: AgentAddress,
        /// Level after the change.
        level: HealthLevel,
        /// Incident severity for elevated levels.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        severity: Option<Severity>,
        /// Seconds until the hard deadline; negative once elapsed.
        remaining: i64,
        /// Emission time, epoch milliseconds.
        timestamp: u64,
    },
    /// The agent was observed dead; emitted exactly once per agent.
    #[serde(rename_all = "camelCase")]
    Death {
        /// The dead agent.
        agent_address: AgentAddress,
        /// Emission time, epoch milliseconds.
        timestamp: u64,
    },
    /// An operational error or alert.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Agent the error concerns.
        agent_address: AgentAddress,
        /// Human-readable description.
        message: String,
        /// Structured alert payload, when the error carries one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alert: Option<Alert>,
        /// Emission time, epoch milliseconds.
        timestamp: u64,
    },
}

impl MonitorEvent {
    /// Builds an error event carrying an alert payload.
    #[must_use]
    pub fn from_alert(alert: Alert) -> Self {
        Self::Error {
            agent_address: alert.agent_address,
            message: alert.message.clone(),
            timestamp: alert.timestamp,
            alert: Some(alert),
        }
    }

    /// Returns the agent the event concerns.
    #[must_use]
    pub const fn agent_address(&self) -> AgentAddress {
        match self {
            Self::Heartbeat { agent_address, .. }
            | Self::Decision { agent_address, .. }
            | Self::StatusChange { agent_address, .. }
            | Self::Death { agent_address, .. }
            | Self::Error { agent_address, .. } => *agent_address,
        }
    }

    /// Returns the event's timestamp, epoch milliseconds.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        match self {
            Self::Heartbeat { timestamp, .. }
            | Self::Decision { timestamp, .. }
            | Self::StatusChange { timestamp, .. }
            | Self::Death { timestamp, .. }
            | Self::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Overrides the event's timestamp. Used by the hub to enforce
    /// per-agent strict ordering.
    pub fn set_timestamp(&mut self, value: u64) {
        match self {
            Self::Heartbeat { timestamp, .. }
            | Self::Decision { timestamp, .. }
            | Self::StatusChange { timestamp, .. }
            | Self::Death { timestamp, .. }
            | Self::Error { timestamp, .. } => *timestamp = value,
        }
    }

    /// Returns the event's broad classification.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Heartbeat { .. } => EventKind::Heartbeat,
            Self::Decision { .. } => EventKind::Decision,
            Self::StatusChange { .. } => EventKind::Status,
            Self::Death { .. } => EventKind::Death,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_serialization() {
        let event = MonitorEvent::Death {
            agent_address: "0x00000000000000000000000000000000deadbeef".parse().unwrap(),
            timestamp: 42,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "death");
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn timestamp_override() {
        let mut event = MonitorEvent::Death {
            agent_address: "0x00000000000000000000000000000000deadbeef".parse().unwrap(),
            timestamp: 10,
        };
        event.set_timestamp(11);
        assert_eq!(event.timestamp(), 11);
        assert_eq!(event.kind(), EventKind::Death);
    }
}
