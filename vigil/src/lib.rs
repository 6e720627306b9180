//! Vigil: liveness control plane for autonomous on-chain agents.
//!
//! Depend on this crate via `cargo add vigil`. It bundles the runtime
//! crates behind feature flags so deployments can enable only the
//! components they run.

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared domain types for convenience.
pub use vigil_primitives as primitives;

/// Typed EVM access (enabled by the `chain` feature).
#[cfg(feature = "chain")]
pub use vigil_chain as chain;

/// Workload marketplace gateway (enabled by the `workload` feature).
#[cfg(feature = "workload")]
pub use vigil_workload as workload;

/// Deployment registry and report store (enabled by the `store` feature).
#[cfg(feature = "store")]
pub use vigil_store as store;

/// Event fan-out hub (enabled by the `hub` feature).
#[cfg(feature = "hub")]
pub use vigil_hub as hub;

/// Scheduler, evaluator, and supervisor (enabled by the `monitor`
/// feature).
#[cfg(feature = "monitor")]
pub use vigil_monitor as monitor;

/// HTTP and WebSocket surface (enabled by the `api` feature).
#[cfg(feature = "api")]
pub use vigil_api as api;
