//! In-memory operator notifications.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::AgentAddress;
use crate::severity::Severity;

/// Kinds of alert the evaluator can raise.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    /// A liveness window elapsed without a heartbeat.
    MissingHeartbeat,
    /// The marketplace reports the hosting container closed or failed
    /// while the chain still considers the agent alive.
    MarketplaceDown,
    /// The agent has fewer than seven days of runway at its current burn.
    BalanceCritical,
}

/// A transient notification emitted into the event hub. Alerts may cause
/// report creation but are never themselves persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Unique alert identifier.
    pub id: Uuid,
    /// Agent the alert concerns.
    pub agent_address: AgentAddress,
    /// What triggered the alert.
    pub kind: AlertKind,
    /// Severity at the time the alert fired.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// When the alert fired, epoch milliseconds.
    pub timestamp: u64,
}

impl Alert {
    /// Creates an alert with a fresh identifier.
    #[must_use]
    pub fn new(
        agent_address: AgentAddress,
        kind: AlertKind,
        severity: Severity,
        message: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_address,
            kind,
            severity,
            message: message.into(),
            timestamp,
        }
    }
}
