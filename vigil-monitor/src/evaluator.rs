//! Per-agent liveness rule engine.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use vigil_chain::HeartbeatEvent;
use vigil_hub::EventHub;
use vigil_primitives::{
    AgentAddress, AgentSnapshot, Alert, AlertKind, Clock, HealthLevel, MarketplaceSnapshot,
    MonitorConfig, MonitorError, MonitorResult, MonitorEvent, ReportDraft, Severity, format_epoch,
};
use vigil_store::{DeploymentRegistry, ReportStore};
use vigil_workload::WorkloadGateway;

use crate::tracker::{AgentTracker, CountObservation};

const BALANCE_ALERT_DEBOUNCE_SECS: u64 = 86_400;
const RUNWAY_ALERT_DAYS: u128 = 7;
const STORE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Out-of-band submitter invoked for abandoned agents when the operator
/// has opted in. The control plane itself never signs or submits.
#[async_trait]
pub trait AbandonmentSink: Send + Sync {
    /// Hands the agent to the declaration pipeline.
    async fn declare(&self, agent: AgentAddress) -> MonitorResult<()>;
}

/// Drives the severity ladder for one agent at a time.
///
/// The evaluator is idempotent on identical snapshots: the open-report
/// invariant suppresses duplicate records and level comparison suppresses
/// duplicate events.
pub struct LivenessEvaluator {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ReportStore>,
    registry: Arc<DeploymentRegistry>,
    workload: Option<Arc<dyn WorkloadGateway>>,
    hub: Arc<EventHub>,
    tracker: Arc<AgentTracker>,
    abandonment: Option<Arc<dyn AbandonmentSink>>,
}

impl LivenessEvaluator {
    /// Wires the evaluator to its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ReportStore>,
        registry: Arc<DeploymentRegistry>,
        workload: Option<Arc<dyn WorkloadGateway>>,
        hub: Arc<EventHub>,
        tracker: Arc<AgentTracker>,
        abandonment: Option<Arc<dyn AbandonmentSink>>,
    ) -> Self {
        Self {
            config,
            clock,
            store,
            registry,
            workload,
            hub,
            tracker,
            abandonment,
        }
    }

    /// Evaluates one `(agent, snapshot)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ProtocolMismatch`] when the snapshot's
    /// heartbeat counter decreased relative to an earlier snapshot. All
    /// store and marketplace failures are absorbed internally.
    pub async fn evaluate(
        &self,
        address: AgentAddress,
        snapshot: &AgentSnapshot,
    ) -> MonitorResult<()> {
        let now = self.clock.epoch_secs();

        match self.tracker.observe_count(address, snapshot.heartbeat_count).await {
            CountObservation::Decreased => {
                // A heartbeat event that landed mid-check makes the
                // snapshot stale; the fresher count wins and this tick's
                // evaluation is cancelled.
                if self.tracker.is_verified(address, now).await {
                    debug!(agent = %address, "stale snapshot superseded by heartbeat event");
                    return Ok(());
                }
                return Err(MonitorError::protocol_mismatch(format!(
                    "heartbeat count decreased for {address}"
                )));
            }
            CountObservation::Increased => {
                self.resolve_open_report(
                    address,
                    &format!(
                        "heartbeat observed at {}",
                        format_epoch(snapshot.last_heartbeat_at)
                    ),
                )
                .await;
            }
            CountObservation::First | CountObservation::Unchanged => {}
        }

        if !snapshot.alive {
            self.on_death(address).await;
            return Ok(());
        }

        if !snapshot.last_decision_ref.is_zero()
            && self.tracker.observe_decision(address, snapshot.last_decision_ref).await
        {
            self.hub
                .publish(MonitorEvent::Decision {
                    agent_address: address,
                    decision_ref: snapshot.last_decision_ref,
                    timestamp: self.clock.epoch_millis(),
                })
                .await;
        }

        let nominal = self
            .tracker
            .entry(address)
            .await
            .map_or(self.config.nominal_interval(), |entry| entry.nominal_interval);
        let next_expected_at = snapshot.last_heartbeat_at + nominal.as_secs();
        let deadline_at = snapshot.last_heartbeat_at + self.config.hard_deadline().as_secs();
        #[allow(clippy::cast_possible_wrap)]
        let remaining = deadline_at as i64 - now as i64;

        let level = self.ladder(now, next_expected_at, remaining);
        let previous_level = self
            .tracker
            .entry(address)
            .await
            .and_then(|entry| entry.last_level);

        if level.is_healthy() {
            self.resolve_open_report(
                address,
                &format!(
                    "heartbeat observed at {}",
                    format_epoch(snapshot.last_heartbeat_at)
                ),
            )
            .await;
        } else if let Some(severity) = level.severity() {
            if previous_level.is_none_or(HealthLevel::is_healthy) {
                let alert = Alert::new(
                    address,
                    AlertKind::MissingHeartbeat,
                    severity,
                    format!("no heartbeat since {}", format_epoch(snapshot.last_heartbeat_at)),
                    self.clock.epoch_millis(),
                );
                self.hub.publish(MonitorEvent::from_alert(alert)).await;
            }
            self.escalate(
                address,
                snapshot,
                severity,
                next_expected_at,
                deadline_at,
                now,
            )
            .await;
        }

        self.check_balance_runway(address, snapshot, now).await;

        let previous = self.tracker.set_level(address, level).await;
        if previous != Some(level) {
            self.hub
                .publish(MonitorEvent::StatusChange {
                    agent_address: address,
                    level,
                    severity: level.severity(),
                    remaining,
                    timestamp: self.clock.epoch_millis(),
                })
                .await;
        }

        Ok(())
    }

    /// Folds a heartbeat event from the chain watcher into the agent's
    /// state: resolves any open report, marks the agent recently verified
    /// so the next scheduled check skips its RPC, and broadcasts.
    pub async fn note_heartbeat(&self, event: &HeartbeatEvent) {
        let address = event.agent_address;
        match self.tracker.observe_count(address, event.heartbeat_count).await {
            CountObservation::First | CountObservation::Increased => {}
            CountObservation::Unchanged | CountObservation::Decreased => return,
        }

        let now = self.clock.epoch_secs();
        self.tracker
            .mark_verified(address, now + self.config.tick_interval().as_secs())
            .await;
        self.resolve_open_report(
            address,
            &format!("heartbeat observed at {}", format_epoch(event.timestamp)),
        )
        .await;

        self.hub
            .publish(MonitorEvent::Heartbeat {
                agent_address: address,
                heartbeat_count: event.heartbeat_count,
                decision_ref: event.decision_ref,
                timestamp: self.clock.epoch_millis(),
            })
            .await;

        let deadline_at = event.timestamp + self.config.hard_deadline().as_secs();
        #[allow(clippy::cast_possible_wrap)]
        let remaining = deadline_at as i64 - now as i64;
        let previous = self.tracker.set_level(address, HealthLevel::Healthy).await;
        if previous != Some(HealthLevel::Healthy) {
            self.hub
                .publish(MonitorEvent::StatusChange {
                    agent_address: address,
                    level: HealthLevel::Healthy,
                    severity: None,
                    remaining,
                    timestamp: self.clock.epoch_millis(),
                })
                .await;
        }
    }

    const fn ladder(&self, now: u64, next_expected_at: u64, remaining: i64) -> HealthLevel {
        if now < next_expected_at {
            return HealthLevel::Healthy;
        }
        if remaining <= 0 {
            return HealthLevel::Abandoned;
        }
        #[allow(clippy::cast_possible_wrap)]
        let critical = self.config.critical_threshold().as_secs() as i64;
        #[allow(clippy::cast_possible_wrap)]
        let warning = self.config.warning_threshold().as_secs() as i64;
        if remaining <= critical {
            HealthLevel::Critical
        } else if remaining <= warning {
            HealthLevel::Warning
        } else {
            HealthLevel::Healthy
        }
    }

    async fn escalate(
        &self,
        address: AgentAddress,
        snapshot: &AgentSnapshot,
        severity: Severity,
        next_expected_at: u64,
        deadline_at: u64,
        now: u64,
    ) {
        let marketplace = if severity >= Severity::Critical {
            self.marketplace_snapshot(address, now).await
        } else {
            None
        };

        if let Some(snapshot) = &marketplace
            && snapshot.state.is_down()
        {
            let alert = Alert::new(
                address,
                AlertKind::MarketplaceDown,
                severity,
                format!(
                    "marketplace reports container {} while chain says alive",
                    snapshot.state
                ),
                self.clock.epoch_millis(),
            );
            self.hub.publish(MonitorEvent::from_alert(alert)).await;
        }

        let attach = marketplace.filter(|snapshot| snapshot.state.is_down());
        let draft = ReportDraft {
            agent_address: address,
            severity,
            expected_at: next_expected_at,
            last_heartbeat_at: snapshot.last_heartbeat_at,
            deadline_at,
            marketplace_snapshot: attach,
        };

        let store = Arc::clone(&self.store);
        let report = self
            .store_write("create report", move || {
                let store = Arc::clone(&store);
                let draft = draft.clone();
                async move { store.create(draft).await }
            })
            .await;

        if let Some(report) = report {
            info!(
                agent = %address,
                report = %report.id,
                severity = %report.severity,
                "missing-heartbeat report open"
            );
        }

        if severity == Severity::Abandoned
            && self.config.auto_declare_abandoned()
            && let Some(sink) = &self.abandonment
        {
            if let Err(err) = sink.declare(address).await {
                warn!(agent = %address, %err, "abandonment declaration failed");
            }
        }
    }

    async fn marketplace_snapshot(
        &self,
        address: AgentAddress,
        now: u64,
    ) -> Option<MarketplaceSnapshot> {
        if !self.config.marketplace_check_enabled() {
            return None;
        }
        let workload = self.workload.as_ref()?;
        let handle = self.registry.get(address).await?;
        match workload
            .deployment_status(handle.sequence_id, &handle.owner)
            .await
        {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                debug!(agent = %address, %err, "marketplace query degraded to unknown");
                Some(MarketplaceSnapshot::unknown(now))
            }
        }
    }

    async fn check_balance_runway(&self, address: AgentAddress, snapshot: &AgentSnapshot, now: u64) {
        let Some(runway) = snapshot.runway_days() else {
            return;
        };
        if runway >= RUNWAY_ALERT_DAYS {
            return;
        }
        let debounced = self
            .tracker
            .entry(address)
            .await
            .and_then(|entry| entry.last_balance_alert_at)
            .is_some_and(|at| now.saturating_sub(at) < BALANCE_ALERT_DEBOUNCE_SECS);
        if debounced {
            return;
        }
        self.tracker.set_balance_alert_at(address, now).await;
        let alert = Alert::new(
            address,
            AlertKind::BalanceCritical,
            Severity::Critical,
            format!("{runway} days of runway remaining"),
            self.clock.epoch_millis(),
        );
        self.hub.publish(MonitorEvent::from_alert(alert)).await;
    }

    async fn on_death(&self, address: AgentAddress) {
        if !self.tracker.mark_dead(address).await {
            return;
        }
        info!(agent = %address, "agent observed dead; leaving rotation");
        self.resolve_open_report(address, "agent died").await;
        self.hub
            .publish(MonitorEvent::Death {
                agent_address: address,
                timestamp: self.clock.epoch_millis(),
            })
            .await;
    }

    async fn resolve_open_report(&self, address: AgentAddress, resolution: &str) {
        let open = match self.store.open_for_agent(address).await {
            Ok(open) => open,
            Err(err) => {
                warn!(agent = %address, %err, "open-report lookup failed");
                return;
            }
        };
        let Some(report) = open else { return };

        let store = Arc::clone(&self.store);
        let id = report.id.clone();
        let resolution = resolution.to_owned();
        let resolved = self
            .store_write("resolve report", move || {
                let store = Arc::clone(&store);
                let id = id.clone();
                let resolution = resolution.clone();
                async move { store.resolve(&id, &resolution).await }
            })
            .await;
        if resolved.is_some() {
            info!(agent = %address, report = %report.id, "report auto-resolved");
        }
    }

    /// Runs a store write, retrying once after a short delay when the
    /// store reports itself unavailable. A second failure drops the
    /// incident with full context; the scheduler carries on.
    async fn store_write<T, F, Fut>(&self, what: &str, op: F) -> Option<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = MonitorResult<T>>,
    {
        match op().await {
            Ok(value) => Some(value),
            Err(err) if err.is_transient() => {
                warn!(what, %err, "store write failed; retrying once");
                sleep(STORE_RETRY_DELAY).await;
                match op().await {
                    Ok(value) => Some(value),
                    Err(err) => {
                        error!(what, %err, "store write dropped after retry");
                        None
                    }
                }
            }
            Err(err) => {
                error!(what, %err, "store write failed");
                None
            }
        }
    }
}
