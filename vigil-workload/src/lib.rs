//! Workload marketplace gateway.
//!
//! Queries the deployment state of the container hosting each agent. Both
//! operations are best-effort: a marketplace failure degrades report
//! fidelity but never blocks liveness evaluation, which is driven by
//! on-chain evidence alone.

#![warn(missing_docs, clippy::pedantic)]

mod gateway;

pub use gateway::{HttpWorkloadGateway, WorkloadConfig, WorkloadGateway};
