//! Keyed per-agent mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use vigil_primitives::AgentAddress;

/// Non-blocking keyed lock map. At most one guard exists per key; a held
/// key makes `try_acquire` return `None` and the caller skips the agent
/// for this tick.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    held: Arc<DashMap<AgentAddress, ()>>,
}

impl KeyedLocks {
    /// Creates an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to take the lock for `key` without blocking.
    #[must_use]
    pub fn try_acquire(&self, key: AgentAddress) -> Option<KeyedGuard> {
        match self.held.entry(key) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(KeyedGuard {
                    key,
                    held: Arc::clone(&self.held),
                })
            }
        }
    }

    /// Returns `true` while the key is held.
    #[must_use]
    pub fn is_held(&self, key: AgentAddress) -> bool {
        self.held.contains_key(&key)
    }
}

/// RAII guard releasing the keyed lock on drop.
pub struct KeyedGuard {
    key: AgentAddress,
    held: Arc<DashMap<AgentAddress, ()>>,
}

impl KeyedGuard {
    /// The key this guard holds.
    #[must_use]
    pub const fn key(&self) -> AgentAddress {
        self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        self.held.remove(&self.key);
    }
}
