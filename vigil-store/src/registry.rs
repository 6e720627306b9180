//! Durable map from agent address to deployment handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use vigil_primitives::{
    AgentAddress, Clock, DeploymentHandle, DeploymentPatch, MonitorError, MonitorResult,
};

/// Configuration for the deployment registry.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    ttl: Duration,
}

impl RegistryConfig {
    /// Creates a configuration with the supplied sliding TTL.
    #[must_use]
    pub const fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// Returns the sliding TTL applied to each record.
    #[must_use]
    pub const fn ttl(self) -> Duration {
        self.ttl
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 86_400),
        }
    }
}

struct StoredHandle {
    handle: DeploymentHandle,
    expires_at: u64,
}

#[derive(Default)]
struct RegistryInner {
    by_address: HashMap<AgentAddress, StoredHandle>,
    by_sequence: HashMap<u64, AgentAddress>,
}

/// In-process deployment registry with a uniqueness index on
/// `sequence_id` and a sliding TTL refreshed on every update.
pub struct DeploymentRegistry {
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    inner: RwLock<RegistryInner>,
}

impl DeploymentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Inserts or replaces the handle for an agent.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Conflict`] when the handle's `sequence_id`
    /// is already bound to a different agent address.
    pub async fn put(&self, handle: DeploymentHandle) -> MonitorResult<()> {
        let now = self.clock.epoch_secs();
        let mut guard = self.inner.write().await;
        if let Some(existing) = guard.by_sequence.get(&handle.sequence_id)
            && *existing != handle.agent_address
        {
            return Err(MonitorError::conflict(format!(
                "sequence {} already bound to {existing}",
                handle.sequence_id
            )));
        }
        if let Some(previous_sequence_id) = guard
            .by_address
            .get(&handle.agent_address)
            .map(|previous| previous.handle.sequence_id)
        {
            guard.by_sequence.remove(&previous_sequence_id);
        }
        guard.by_sequence.insert(handle.sequence_id, handle.agent_address);
        let expires_at = now + self.config.ttl.as_secs();
        guard
            .by_address
            .insert(handle.agent_address, StoredHandle { handle, expires_at });
        Ok(())
    }

    /// Returns the handle for an agent, when present and unexpired.
    pub async fn get(&self, address: AgentAddress) -> Option<DeploymentHandle> {
        let now = self.clock.epoch_secs();
        let guard = self.inner.read().await;
        guard
            .by_address
            .get(&address)
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.handle.clone())
    }

    /// Looks up a handle by its marketplace sequence number.
    pub async fn get_by_sequence_id(&self, sequence_id: u64) -> Option<DeploymentHandle> {
        let address = {
            let guard = self.inner.read().await;
            guard.by_sequence.get(&sequence_id).copied()
        };
        match address {
            Some(address) => self.get(address).await,
            None => None,
        }
    }

    /// Applies a patch to an existing handle, refreshing its TTL.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::NotFound`] when no record exists for the
    /// address.
    pub async fn update(
        &self,
        address: AgentAddress,
        patch: DeploymentPatch,
    ) -> MonitorResult<DeploymentHandle> {
        let now = self.clock.epoch_secs();
        let mut guard = self.inner.write().await;
        let stored = guard
            .by_address
            .get_mut(&address)
            .ok_or_else(|| MonitorError::not_found(format!("deployment for {address}")))?;
        if let Some(provider) = patch.provider {
            stored.handle.provider = provider;
        }
        if let Some(metadata) = patch.metadata {
            for (key, value) in metadata {
                stored.handle.metadata.insert(key, value);
            }
        }
        stored.handle.updated_at = now;
        stored.expires_at = now + self.config.ttl.as_secs();
        Ok(stored.handle.clone())
    }

    /// Removes the handle for an agent. Removing a missing record is a
    /// no-op.
    pub async fn delete(&self, address: AgentAddress) {
        let mut guard = self.inner.write().await;
        if let Some(stored) = guard.by_address.remove(&address) {
            guard.by_sequence.remove(&stored.handle.sequence_id);
        }
    }

    /// Returns a snapshot of all unexpired handles.
    pub async fn list(&self) -> Vec<DeploymentHandle> {
        let now = self.clock.epoch_secs();
        let guard = self.inner.read().await;
        guard
            .by_address
            .values()
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.handle.clone())
            .collect()
    }

    /// Drops expired records, returning how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let now = self.clock.epoch_secs();
        let mut guard = self.inner.write().await;
        let expired: Vec<AgentAddress> = guard
            .by_address
            .iter()
            .filter(|(_, stored)| stored.expires_at <= now)
            .map(|(address, _)| *address)
            .collect();
        for address in &expired {
            if let Some(stored) = guard.by_address.remove(address) {
                guard.by_sequence.remove(&stored.handle.sequence_id);
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "pruned expired deployment handles");
        }
        expired.len()
    }
}
