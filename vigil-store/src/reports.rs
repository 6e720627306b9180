//! Missing-report store contract.

use async_trait::async_trait;

use vigil_primitives::{
    AgentAddress, MarketplaceSnapshot, MissingReport, MonitorResult, ReportDraft, ReportFilter,
    ReportPage, ReportStats,
};

/// Durable store of missing-heartbeat incidents.
///
/// Implementations enforce the open-report invariant: at most one
/// unresolved report per agent. [`create`](ReportStore::create) coalesces
/// onto the existing open record, escalating its severity when the draft
/// carries a higher one; severity never falls within the same open report.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Opens an incident, or escalates the agent's existing open record.
    async fn create(&self, draft: ReportDraft) -> MonitorResult<MissingReport>;

    /// Fetches a report by id.
    async fn get(&self, id: &str) -> MonitorResult<Option<MissingReport>>;

    /// Returns the agent's open report, if any.
    async fn open_for_agent(&self, address: AgentAddress) -> MonitorResult<Option<MissingReport>>;

    /// Returns every retained report for an agent, newest first.
    async fn list_by_agent(&self, address: AgentAddress) -> MonitorResult<Vec<MissingReport>>;

    /// Returns one page of reports matching the filter, newest first,
    /// along with the total match count.
    async fn list(&self, filter: &ReportFilter) -> MonitorResult<ReportPage>;

    /// Marks a report acknowledged. Idempotent: re-acknowledging updates
    /// the actor but never reverts. Acknowledging a resolved report is a
    /// no-op.
    async fn acknowledge(&self, id: &str, actor: &str) -> MonitorResult<MissingReport>;

    /// Resolves a report. First write wins; resolving an already resolved
    /// report returns it unchanged. Resolution implies acknowledgement.
    async fn resolve(&self, id: &str, resolution: &str) -> MonitorResult<MissingReport>;

    /// Attaches a marketplace snapshot to an open report when it has none.
    async fn attach_marketplace(
        &self,
        id: &str,
        snapshot: MarketplaceSnapshot,
    ) -> MonitorResult<MissingReport>;

    /// Aggregate statistics over retained reports.
    async fn stats(&self) -> MonitorResult<ReportStats>;

    /// Drops resolved reports older than the retention window, returning
    /// how many were removed.
    async fn garbage_collect(&self, older_than_days: u64) -> MonitorResult<usize>;
}
