//! In-memory report store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use vigil_primitives::{
    AgentAddress, Clock, MarketplaceSnapshot, MissingReport, MonitorError, MonitorResult,
    ReportDraft, ReportFilter, ReportPage, ReportStats,
};

use crate::reports::ReportStore;

#[derive(Default)]
struct ReportsInner {
    by_id: HashMap<String, MissingReport>,
    open_by_agent: HashMap<AgentAddress, String>,
    sequence: u64,
}

/// Report store backed by process memory. Used directly in tests and as
/// the working set underneath [`crate::JournalReportStore`].
pub struct MemoryReportStore {
    clock: Arc<dyn Clock>,
    inner: RwLock<ReportsInner>,
}

impl MemoryReportStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: RwLock::new(ReportsInner::default()),
        }
    }

    /// Replaces or inserts a record wholesale, rebuilding the open index.
    /// Used by journal replay.
    pub(crate) async fn restore(&self, report: MissingReport) {
        let mut guard = self.inner.write().await;
        if report.is_open() {
            guard.open_by_agent.insert(report.agent_address, report.id.clone());
        } else {
            let stale = guard
                .open_by_agent
                .get(&report.agent_address)
                .is_some_and(|open| *open == report.id);
            if stale {
                guard.open_by_agent.remove(&report.agent_address);
            }
        }
        guard.sequence = guard.sequence.max(sequence_of(&report.id).unwrap_or(0));
        guard.by_id.insert(report.id.clone(), report);
    }

    /// Removes records by id. Used by journal replay.
    pub(crate) async fn forget(&self, ids: &[String]) {
        let mut guard = self.inner.write().await;
        for id in ids {
            if let Some(report) = guard.by_id.remove(id) {
                let stale = guard
                    .open_by_agent
                    .get(&report.agent_address)
                    .is_some_and(|open| *open == report.id);
                if stale {
                    guard.open_by_agent.remove(&report.agent_address);
                }
            }
        }
    }

    /// Returns every retained record. Used by journal compaction.
    pub(crate) async fn dump(&self) -> Vec<MissingReport> {
        let guard = self.inner.read().await;
        guard.by_id.values().cloned().collect()
    }

    /// Collects resolved reports older than the retention window,
    /// returning the removed ids.
    pub(crate) async fn collect_expired(&self, older_than_days: u64) -> Vec<String> {
        let cutoff = self
            .clock
            .epoch_secs()
            .saturating_sub(older_than_days * 86_400);
        let mut guard = self.inner.write().await;
        let expired: Vec<String> = guard
            .by_id
            .values()
            .filter(|report| {
                report.resolved && report.resolved_at.is_some_and(|at| at < cutoff)
            })
            .map(|report| report.id.clone())
            .collect();
        for id in &expired {
            guard.by_id.remove(id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "garbage collected resolved reports");
        }
        expired
    }
}

fn sequence_of(id: &str) -> Option<u64> {
    id.rsplit('-').next()?.parse().ok()
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn create(&self, draft: ReportDraft) -> MonitorResult<MissingReport> {
        let now = self.clock.epoch_secs();
        let mut guard = self.inner.write().await;

        // Coalesce onto the agent's open record: concurrent creates inside
        // the same window become a severity-escalating no-op.
        if let Some(open_id) = guard.open_by_agent.get(&draft.agent_address).cloned() {
            let report = guard
                .by_id
                .get_mut(&open_id)
                .ok_or_else(|| MonitorError::store_unavailable("open index out of sync"))?;
            if draft.severity > report.severity {
                report.severity = draft.severity;
            }
            if report.marketplace_snapshot.is_none() {
                report.marketplace_snapshot = draft.marketplace_snapshot;
            }
            return Ok(report.clone());
        }

        guard.sequence += 1;
        let id = format!(
            "{}-{}-{}",
            draft.agent_address.to_lowercase_hex(),
            now,
            guard.sequence
        );
        let report = MissingReport {
            id: id.clone(),
            agent_address: draft.agent_address,
            severity: draft.severity,
            expected_at: draft.expected_at,
            last_heartbeat_at: draft.last_heartbeat_at,
            deadline_at: draft.deadline_at,
            marketplace_snapshot: draft.marketplace_snapshot,
            created_at: now,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved: false,
            resolved_at: None,
            resolution: None,
        };
        guard.open_by_agent.insert(draft.agent_address, id.clone());
        guard.by_id.insert(id, report.clone());
        Ok(report)
    }

    async fn get(&self, id: &str) -> MonitorResult<Option<MissingReport>> {
        let guard = self.inner.read().await;
        Ok(guard.by_id.get(id).cloned())
    }

    async fn open_for_agent(&self, address: AgentAddress) -> MonitorResult<Option<MissingReport>> {
        let guard = self.inner.read().await;
        Ok(guard
            .open_by_agent
            .get(&address)
            .and_then(|id| guard.by_id.get(id))
            .cloned())
    }

    async fn list_by_agent(&self, address: AgentAddress) -> MonitorResult<Vec<MissingReport>> {
        let guard = self.inner.read().await;
        let mut reports: Vec<MissingReport> = guard
            .by_id
            .values()
            .filter(|report| report.agent_address == address)
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(reports)
    }

    async fn list(&self, filter: &ReportFilter) -> MonitorResult<ReportPage> {
        let guard = self.inner.read().await;
        let mut matching: Vec<&MissingReport> =
            guard.by_id.values().filter(|r| filter.matches(r)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = matching.len();
        let reports = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.effective_limit())
            .cloned()
            .collect();
        Ok(ReportPage { reports, total })
    }

    async fn acknowledge(&self, id: &str, actor: &str) -> MonitorResult<MissingReport> {
        let now = self.clock.epoch_secs();
        let mut guard = self.inner.write().await;
        let report = guard
            .by_id
            .get_mut(id)
            .ok_or_else(|| MonitorError::not_found(format!("report {id}")))?;
        if report.resolved {
            return Ok(report.clone());
        }
        report.acknowledged = true;
        report.acknowledged_by = Some(actor.to_owned());
        report.acknowledged_at = Some(now);
        Ok(report.clone())
    }

    async fn resolve(&self, id: &str, resolution: &str) -> MonitorResult<MissingReport> {
        let now = self.clock.epoch_secs();
        let mut guard = self.inner.write().await;
        let report = guard
            .by_id
            .get_mut(id)
            .ok_or_else(|| MonitorError::not_found(format!("report {id}")))?;
        if report.resolved {
            return Ok(report.clone());
        }
        report.resolved = true;
        report.resolved_at = Some(now);
        report.resolution = Some(resolution.to_owned());
        report.acknowledged = true;
        if report.acknowledged_at.is_none() {
            report.acknowledged_at = Some(now);
        }
        let report = report.clone();
        let stale = guard
            .open_by_agent
            .get(&report.agent_address)
            .is_some_and(|open| *open == report.id);
        if stale {
            guard.open_by_agent.remove(&report.agent_address);
        }
        Ok(report)
    }

    async fn attach_marketplace(
        &self,
        id: &str,
        snapshot: MarketplaceSnapshot,
    ) -> MonitorResult<MissingReport> {
        let mut guard = self.inner.write().await;
        let report = guard
            .by_id
            .get_mut(id)
            .ok_or_else(|| MonitorError::not_found(format!("report {id}")))?;
        if !report.resolved && report.marketplace_snapshot.is_none() {
            report.marketplace_snapshot = Some(snapshot);
        }
        Ok(report.clone())
    }

    async fn stats(&self) -> MonitorResult<ReportStats> {
        let guard = self.inner.read().await;
        let mut stats = ReportStats {
            total: guard.by_id.len(),
            ..ReportStats::default()
        };
        for report in guard.by_id.values() {
            stats.by_severity.bump(report.severity);
            if report.is_open() {
                stats.open_count += 1;
            }
            if !report.acknowledged {
                stats.unacknowledged_count += 1;
            }
        }
        Ok(stats)
    }

    async fn garbage_collect(&self, older_than_days: u64) -> MonitorResult<usize> {
        Ok(self.collect_expired(older_than_days).await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_primitives::{ManualClock, MarketplaceState, Severity};

    fn addr(n: u8) -> AgentAddress {
        let mut bytes = [0_u8; 20];
        bytes[19] = n;
        AgentAddress::from_inner(bytes.into())
    }

    fn draft(address: AgentAddress, severity: Severity) -> ReportDraft {
        ReportDraft {
            agent_address: address,
            severity,
            expected_at: 1_000,
            last_heartbeat_at: 500,
            deadline_at: 10_000,
            marketplace_snapshot: None,
        }
    }

    fn store(clock: Arc<ManualClock>) -> MemoryReportStore {
        MemoryReportStore::new(clock)
    }

    #[tokio::test]
    async fn one_open_report_per_agent() {
        let clock = Arc::new(ManualClock::at_secs(2_000));
        let store = store(clock);

        let first = store.create(draft(addr(1), Severity::Warning)).await.unwrap();
        let second = store.create(draft(addr(1), Severity::Warning)).await.unwrap();
        assert_eq!(first.id, second.id);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.open_count, 1);
    }

    #[tokio::test]
    async fn severity_escalates_but_never_falls() {
        let clock = Arc::new(ManualClock::at_secs(2_000));
        let store = store(clock);

        let report = store.create(draft(addr(1), Severity::Warning)).await.unwrap();
        let escalated = store.create(draft(addr(1), Severity::Critical)).await.unwrap();
        assert_eq!(escalated.id, report.id);
        assert_eq!(escalated.severity, Severity::Critical);

        let still_critical = store.create(draft(addr(1), Severity::Warning)).await.unwrap();
        assert_eq!(still_critical.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn acknowledge_is_idempotent() {
        let clock = Arc::new(ManualClock::at_secs(2_000));
        let store = store(clock);
        let report = store.create(draft(addr(1), Severity::Warning)).await.unwrap();

        let first = store.acknowledge(&report.id, "alice").await.unwrap();
        assert!(first.acknowledged);
        assert_eq!(first.acknowledged_by.as_deref(), Some("alice"));

        let second = store.acknowledge(&report.id, "bob").await.unwrap();
        assert!(second.acknowledged);
        assert_eq!(second.acknowledged_by.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn resolve_is_terminal_and_first_write_wins() {
        let clock = Arc::new(ManualClock::at_secs(2_000));
        let store = store(clock);
        let report = store.create(draft(addr(1), Severity::Critical)).await.unwrap();

        let resolved = store.resolve(&report.id, "heartbeat observed").await.unwrap();
        assert!(resolved.resolved);
        assert!(resolved.acknowledged);
        assert_eq!(resolved.resolution.as_deref(), Some("heartbeat observed"));

        let again = store.resolve(&report.id, "other text").await.unwrap();
        assert_eq!(again.resolution.as_deref(), Some("heartbeat observed"));

        // Acknowledging a resolved report changes nothing.
        let acked = store.acknowledge(&report.id, "late-actor").await.unwrap();
        assert!(acked.acknowledged_by.is_none());

        // A new incident after resolution opens a fresh record.
        let fresh = store.create(draft(addr(1), Severity::Warning)).await.unwrap();
        assert_ne!(fresh.id, report.id);
    }

    #[tokio::test]
    async fn listing_sorts_and_paginates() {
        let clock = Arc::new(ManualClock::at_secs(2_000));
        let store = store(Arc::clone(&clock));

        for n in 1..=5 {
            let report = store.create(draft(addr(n), Severity::Warning)).await.unwrap();
            store.resolve(&report.id, "done").await.unwrap();
            clock.advance_secs(10);
        }
        store.create(draft(addr(9), Severity::Critical)).await.unwrap();

        let page = store
            .list(&ReportFilter {
                resolved: Some(true),
                limit: 2,
                offset: 1,
                ..ReportFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.reports.len(), 2);
        assert!(page.reports[0].created_at >= page.reports[1].created_at);

        let critical = store
            .list(&ReportFilter {
                severity: Some(Severity::Critical),
                ..ReportFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(critical.total, 1);
    }

    #[tokio::test]
    async fn attach_marketplace_only_fills_blank() {
        let clock = Arc::new(ManualClock::at_secs(2_000));
        let store = store(clock);
        let report = store.create(draft(addr(1), Severity::Critical)).await.unwrap();

        let snap = MarketplaceSnapshot {
            state: MarketplaceState::Closed,
            host_endpoint: None,
            last_checked: 2_000,
        };
        let updated = store.attach_marketplace(&report.id, snap.clone()).await.unwrap();
        assert_eq!(updated.marketplace_snapshot, Some(snap.clone()));

        let other = MarketplaceSnapshot {
            state: MarketplaceState::Error,
            host_endpoint: None,
            last_checked: 2_001,
        };
        let unchanged = store.attach_marketplace(&report.id, other).await.unwrap();
        assert_eq!(unchanged.marketplace_snapshot, Some(snap));
    }

    #[tokio::test]
    async fn garbage_collect_respects_retention() {
        let clock = Arc::new(ManualClock::at_secs(0));
        let store = store(Arc::clone(&clock));

        let old = store.create(draft(addr(1), Severity::Warning)).await.unwrap();
        store.resolve(&old.id, "done").await.unwrap();

        clock.set_secs(31 * 86_400);
        let open = store.create(draft(addr(2), Severity::Warning)).await.unwrap();

        let removed = store.garbage_collect(30).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&old.id).await.unwrap().is_none());
        assert!(store.get(&open.id).await.unwrap().is_some());
    }
}
