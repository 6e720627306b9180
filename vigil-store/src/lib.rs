//! Durable stores for the Vigil control plane.
//!
//! [`DeploymentRegistry`] maps agent addresses to their marketplace
//! containers; [`ReportStore`] holds missing-heartbeat incidents. Both are
//! sole owners of their records: readers always receive cloned snapshots.

#![warn(missing_docs, clippy::pedantic)]

mod journal;
mod memory;
mod registry;
mod reports;

pub use journal::JournalReportStore;
pub use memory::MemoryReportStore;
pub use registry::{DeploymentRegistry, RegistryConfig};
pub use reports::ReportStore;
