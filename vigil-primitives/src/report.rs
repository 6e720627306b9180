//! Durable missing-heartbeat incident records.

use serde::{Deserialize, Serialize};

use crate::address::AgentAddress;
use crate::deployment::MarketplaceSnapshot;
use crate::severity::Severity;

/// A durable record of a liveness violation.
///
/// Lifecycle: `open → acknowledged → resolved`. Acknowledgement is
/// idempotent and never reverts; resolution is terminal and freezes every
/// field except retention metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingReport {
    /// Opaque identifier, derivable from address, creation time, and a
    /// per-store sequence.
    pub id: String,
    /// Agent the incident concerns.
    pub agent_address: AgentAddress,
    /// Current severity; rises across ticks, never falls.
    pub severity: Severity,
    /// When the missed heartbeat was nominally expected, epoch seconds.
    pub expected_at: u64,
    /// Last observed heartbeat, epoch seconds.
    pub last_heartbeat_at: u64,
    /// The hard deadline in force when the incident opened, epoch seconds.
    pub deadline_at: u64,
    /// Marketplace state attached at critical/abandoned severity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace_snapshot: Option<MarketplaceSnapshot>,
    /// Record creation time, epoch seconds.
    pub created_at: u64,
    /// Whether an operator has acknowledged the incident.
    pub acknowledged: bool,
    /// Operator that acknowledged, when acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    /// Acknowledgement time, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<u64>,
    /// Whether the incident has been resolved.
    pub resolved: bool,
    /// Resolution time, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<u64>,
    /// Free-form resolution text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl MissingReport {
    /// Returns `true` while the incident is neither resolved nor closed.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !self.resolved
    }
}

/// Input for opening a new incident.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDraft {
    /// Agent the incident concerns.
    pub agent_address: AgentAddress,
    /// Severity at creation time.
    pub severity: Severity,
    /// When the missed heartbeat was nominally expected, epoch seconds.
    pub expected_at: u64,
    /// Last observed heartbeat, epoch seconds.
    pub last_heartbeat_at: u64,
    /// The hard deadline in force, epoch seconds.
    pub deadline_at: u64,
    /// Marketplace state, when observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace_snapshot: Option<MarketplaceSnapshot>,
}

/// Filter for report listings. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReportFilter {
    /// Match only this severity.
    pub severity: Option<Severity>,
    /// Match on resolution state.
    pub resolved: Option<bool>,
    /// Match on acknowledgement state.
    pub acknowledged: Option<bool>,
    /// Page size; `0` means the store default.
    pub limit: usize,
    /// Records to skip.
    pub offset: usize,
}

impl ReportFilter {
    /// Default page size applied when the caller passes `limit == 0`.
    pub const DEFAULT_LIMIT: usize = 50;

    /// Returns the effective page size.
    #[must_use]
    pub const fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            Self::DEFAULT_LIMIT
        } else {
            self.limit
        }
    }

    /// Returns `true` when the report matches every set field.
    #[must_use]
    pub fn matches(&self, report: &MissingReport) -> bool {
        self.severity.is_none_or(|s| report.severity == s)
            && self.resolved.is_none_or(|r| report.resolved == r)
            && self.acknowledged.is_none_or(|a| report.acknowledged == a)
    }
}

/// One page of a filtered report listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPage {
    /// Reports sorted by `created_at` descending.
    pub reports: Vec<MissingReport>,
    /// Total records matching the filter, across all pages.
    pub total: usize,
}

/// Per-severity report counts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityCounts {
    /// Reports currently at warning severity.
    pub warning: usize,
    /// Reports currently at critical severity.
    pub critical: usize,
    /// Reports currently at abandoned severity.
    pub abandoned: usize,
}

impl SeverityCounts {
    /// Increments the counter for the given severity.
    pub fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Warning => self.warning += 1,
            Severity::Critical => self.critical += 1,
            Severity::Abandoned => self.abandoned += 1,
        }
    }
}

/// Aggregate statistics over the report store.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    /// All records currently retained.
    pub total: usize,
    /// Breakdown by current severity.
    pub by_severity: SeverityCounts,
    /// Unresolved records.
    pub open_count: usize,
    /// Records no operator has acknowledged.
    pub unacknowledged_count: usize,
}
