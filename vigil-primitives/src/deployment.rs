//! Binding between an agent and its container on the workload marketplace.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::address::AgentAddress;
use crate::snapshot::MarketplaceState;

/// Binds an agent address to its hosting container on the external
/// marketplace. One-to-one with the agent address; `sequence_id` is unique
/// across all handles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentHandle {
    /// Address of the agent the container hosts.
    pub agent_address: AgentAddress,
    /// Marketplace-assigned deployment sequence number.
    pub sequence_id: u64,
    /// Marketplace account that owns the deployment.
    pub owner: String,
    /// Provider currently hosting the container, when leased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Record creation time, epoch seconds.
    pub created_at: u64,
    /// Last update time, epoch seconds.
    pub updated_at: u64,
    /// Free-form deployment metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl DeploymentHandle {
    /// Creates a handle with empty metadata, stamping both timestamps to
    /// `now`.
    #[must_use]
    pub fn new(agent_address: AgentAddress, sequence_id: u64, owner: impl Into<String>, now: u64) -> Self {
        Self {
            agent_address,
            sequence_id,
            owner: owner.into(),
            provider: None,
            created_at: now,
            updated_at: now,
            metadata: Map::new(),
        }
    }
}

/// Partial update applied to a stored [`DeploymentHandle`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPatch {
    /// New provider assignment; `Some(None)` clears the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Option<String>>,
    /// Metadata entries merged into the stored record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl DeploymentPatch {
    /// Sets the provider assignment.
    #[must_use]
    pub fn with_provider(mut self, provider: Option<String>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Merges the supplied metadata entries.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Marketplace deployment state captured at evaluation time and attached to
/// elevated reports.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceSnapshot {
    /// Deployment state reported by the marketplace.
    pub state: MarketplaceState,
    /// Endpoint of the host serving the container, when exposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_endpoint: Option<String>,
    /// When the marketplace was queried, epoch seconds.
    pub last_checked: u64,
}

impl MarketplaceSnapshot {
    /// A snapshot representing a failed or skipped marketplace query.
    #[must_use]
    pub const fn unknown(last_checked: u64) -> Self {
        Self {
            state: MarketplaceState::Unknown,
            host_endpoint: None,
            last_checked,
        }
    }
}
