//! Cross-cutting error taxonomy for the control plane.

use thiserror::Error;

/// Result alias used throughout the Vigil runtime.
pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

/// Errors surfaced by control-plane components.
///
/// Each variant corresponds to one failure class with a fixed handling
/// policy: transient chain failures are retried with backoff inside the
/// chain gateway, protocol mismatches are fatal for the call and never
/// retried, marketplace failures degrade report fidelity without blocking,
/// and store failures are retried once before the incident is dropped.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// RPC-level failure (timeout, 5xx, connection reset) after retries.
    #[error("transient chain failure: {reason}")]
    TransientChainFailure {
        /// Additional context about the failure.
        reason: String,
    },

    /// The contract returned a malformed tuple or violated a protocol
    /// invariant; never retried.
    #[error("protocol mismatch: {reason}")]
    ProtocolMismatch {
        /// Additional context about the mismatch.
        reason: String,
    },

    /// The workload marketplace could not be queried; degrades report
    /// fidelity without blocking liveness evaluation.
    #[error("marketplace state unknown: {reason}")]
    MarketplaceUnknown {
        /// Additional context about the failure.
        reason: String,
    },

    /// The durable store rejected or failed a read/write.
    #[error("store unavailable: {reason}")]
    StoreUnavailable {
        /// Additional context about the failure.
        reason: String,
    },

    /// A subscriber could not keep up with event delivery and was dropped.
    #[error("subscriber lagging")]
    SubscriberLagging,

    /// An API client exceeded its request budget.
    #[error("rate limited")]
    RateLimited,

    /// Caller-supplied input failed validation.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Why the input was rejected.
        reason: String,
    },

    /// A write violated a uniqueness invariant.
    #[error("conflict: {reason}")]
    Conflict {
        /// Description of the conflicting write.
        reason: String,
    },

    /// The requested record does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing record.
        what: String,
    },
}

impl MonitorError {
    /// Convenience constructor for transient chain failures.
    #[must_use]
    pub fn transient_chain(reason: impl Into<String>) -> Self {
        Self::TransientChainFailure {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for protocol mismatches.
    #[must_use]
    pub fn protocol_mismatch(reason: impl Into<String>) -> Self {
        Self::ProtocolMismatch {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for unknown marketplace state.
    #[must_use]
    pub fn marketplace_unknown(reason: impl Into<String>) -> Self {
        Self::MarketplaceUnknown {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for store failures.
    #[must_use]
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for input validation failures.
    #[must_use]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for uniqueness conflicts.
    #[must_use]
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for missing records.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Returns `true` when the error may succeed on retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientChainFailure { .. } | Self::StoreUnavailable { .. }
        )
    }

    /// Returns `true` when retrying can never help.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transiency_predicates() {
        assert!(MonitorError::transient_chain("timeout").is_transient());
        assert!(MonitorError::store_unavailable("io").is_transient());
        assert!(MonitorError::protocol_mismatch("bad tuple").is_fatal());
        assert!(!MonitorError::protocol_mismatch("bad tuple").is_transient());
        assert!(!MonitorError::RateLimited.is_transient());
    }
}
