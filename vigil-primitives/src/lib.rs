//! Shared domain types for the Vigil liveness control plane.
//!
//! Every other Vigil crate builds on the types defined here: agent addresses
//! and snapshots, the severity ladder, missing-heartbeat reports, broadcast
//! events, the cross-cutting error taxonomy, and the monitor configuration.

#![warn(missing_docs, clippy::pedantic)]

mod address;
mod alert;
mod clock;
mod config;
mod deployment;
mod error;
mod event;
mod report;
mod severity;
mod snapshot;

pub use address::{AgentAddress, DecisionRef, GenomeRef};
pub use alert::{Alert, AlertKind};
pub use clock::{Clock, ManualClock, SystemClock, format_epoch};
pub use config::MonitorConfig;
pub use deployment::{DeploymentHandle, DeploymentPatch, MarketplaceSnapshot};
pub use error::{MonitorError, MonitorResult};
pub use event::{EventKind, MonitorEvent};
pub use report::{MissingReport, ReportDraft, ReportFilter, ReportPage, ReportStats, SeverityCounts};
pub use severity::{HealthLevel, Severity};
pub use snapshot::{AgentSnapshot, HeartbeatStatus, MarketplaceState};
