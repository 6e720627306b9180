use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use vigil_chain::HeartbeatEvent;
use vigil_hub::{EventHub, SubscriptionScope};
use vigil_monitor::{AbandonmentSink, AgentTracker, LivenessEvaluator};
use vigil_primitives::{
    AgentAddress, AgentSnapshot, Clock, DecisionRef, DeploymentHandle, EventKind, GenomeRef,
    HealthLevel, ManualClock, MarketplaceSnapshot, MarketplaceState, MonitorConfig, MonitorResult,
    MonitorEvent, Severity,
};
use vigil_store::{DeploymentRegistry, MemoryReportStore, RegistryConfig, ReportStore};
use vigil_workload::WorkloadGateway;

const NOMINAL_INTERVAL: u64 = 21_600;
const HARD_DEADLINE: u64 = 604_800;

fn addr(n: u8) -> AgentAddress {
    let mut bytes = [0_u8; 20];
    bytes[19] = n;
    AgentAddress::from_inner(bytes.into())
}

fn snapshot(last_heartbeat_at: u64, heartbeat_count: u64, alive: bool) -> AgentSnapshot {
    AgentSnapshot {
        genome_ref: GenomeRef::default(),
        birth_time: 0,
        last_heartbeat_at,
        heartbeat_count,
        alive,
        balance: 700_000_000,
        last_decision_ref: DecisionRef::default(),
        cumulative_cost: 10_000_000,
    }
}

struct FixedWorkload {
    state: MarketplaceState,
    calls: AtomicUsize,
}

impl FixedWorkload {
    fn new(state: MarketplaceState) -> Self {
        Self {
            state,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WorkloadGateway for FixedWorkload {
    async fn deployment_status(
        &self,
        _sequence_id: u64,
        _owner: &str,
    ) -> MonitorResult<MarketplaceSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MarketplaceSnapshot {
            state: self.state,
            host_endpoint: Some("https://host-1.example.net".to_owned()),
            last_checked: 0,
        })
    }

    async fn health_probe(&self, _host_endpoint: &str) -> bool {
        true
    }
}

#[derive(Default)]
struct CountingSink {
    declared: AtomicUsize,
}

#[async_trait]
impl AbandonmentSink for CountingSink {
    async fn declare(&self, _agent: AgentAddress) -> MonitorResult<()> {
        self.declared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<MemoryReportStore>,
    hub: Arc<EventHub>,
    tracker: Arc<AgentTracker>,
    evaluator: LivenessEvaluator,
    workload: Arc<FixedWorkload>,
    sink: Arc<CountingSink>,
}

async fn harness(marketplace: MarketplaceState, auto_declare: bool) -> Harness {
    let clock = Arc::new(ManualClock::at_secs(0));
    let store = Arc::new(MemoryReportStore::new(Arc::clone(&clock) as Arc<dyn Clock>));
    let hub = Arc::new(EventHub::default());
    let tracker = Arc::new(AgentTracker::new());
    let registry = Arc::new(DeploymentRegistry::new(
        RegistryConfig::default(),
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    let workload = Arc::new(FixedWorkload::new(marketplace));
    let sink = Arc::new(CountingSink::default());

    registry
        .put(DeploymentHandle::new(addr(1), 42, "owner-1", 0))
        .await
        .unwrap();

    let config = MonitorConfig::default().with_auto_declare_abandoned(auto_declare);
    let evaluator = LivenessEvaluator::new(
        config,
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::clone(&store) as Arc<dyn ReportStore>,
        registry,
        Some(Arc::clone(&workload) as Arc<dyn WorkloadGateway>),
        Arc::clone(&hub),
        Arc::clone(&tracker),
        Some(Arc::clone(&sink) as Arc<dyn AbandonmentSink>),
    );

    tracker
        .register(addr(1), Duration::from_secs(NOMINAL_INTERVAL), None)
        .await;

    Harness {
        clock,
        store,
        hub,
        tracker,
        evaluator,
        workload,
        sink,
    }
}

fn drain(sub: &mut vigil_hub::Subscription) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    while let Some(event) = sub.try_recv() {
        events.push(event);
    }
    events
}

fn of_kind(events: &[MonitorEvent], kind: EventKind) -> Vec<MonitorEvent> {
    events.iter().filter(|e| e.kind() == kind).cloned().collect()
}

#[tokio::test]
async fn healthy_agent_broadcasts_status_and_opens_nothing() {
    let h = harness(MarketplaceState::Active, false).await;
    let mut sub = h.hub.subscribe(SubscriptionScope::All).await;

    h.clock.set_secs(100_000);
    h.evaluator
        .evaluate(addr(1), &snapshot(99_500, 1, true))
        .await
        .unwrap();

    assert!(h.store.open_for_agent(addr(1)).await.unwrap().is_none());
    let events = drain(&mut sub);
    let status = of_kind(&events, EventKind::Status);
    assert_eq!(status.len(), 1);
    let MonitorEvent::StatusChange { level, remaining, severity, .. } = &status[0] else {
        panic!("expected status event");
    };
    assert_eq!(*level, HealthLevel::Healthy);
    assert_eq!(*remaining, 604_300);
    assert!(severity.is_none());
}

#[tokio::test]
async fn warning_transition_opens_one_report() {
    let h = harness(MarketplaceState::Active, false).await;
    let mut sub = h.hub.subscribe(SubscriptionScope::All).await;

    // 86 000 s remain before the hard deadline: below the 24 h warning
    // threshold, above the 6 h critical one.
    let last_heartbeat = 100_000;
    h.clock.set_secs(last_heartbeat + HARD_DEADLINE - 86_000);
    h.evaluator
        .evaluate(addr(1), &snapshot(last_heartbeat, 1, true))
        .await
        .unwrap();

    let report = h
        .store
        .open_for_agent(addr(1))
        .await
        .unwrap()
        .expect("warning report open");
    assert_eq!(report.severity, Severity::Warning);
    assert_eq!(report.expected_at, last_heartbeat + NOMINAL_INTERVAL);

    let events = drain(&mut sub);
    let status = of_kind(&events, EventKind::Status);
    assert_eq!(status.len(), 1);
    let MonitorEvent::StatusChange { severity, .. } = &status[0] else {
        panic!("expected status event");
    };
    assert_eq!(*severity, Some(Severity::Warning));

    // The transition out of healthy also raises a missing-heartbeat alert.
    assert_eq!(of_kind(&events, EventKind::Error).len(), 1);
}

#[tokio::test]
async fn critical_escalation_upgrades_the_same_report() {
    let h = harness(MarketplaceState::Active, false).await;

    let last_heartbeat = 100_000;
    h.clock.set_secs(last_heartbeat + HARD_DEADLINE - 86_000);
    h.evaluator
        .evaluate(addr(1), &snapshot(last_heartbeat, 1, true))
        .await
        .unwrap();
    let warning = h.store.open_for_agent(addr(1)).await.unwrap().unwrap();

    let mut sub = h.hub.subscribe(SubscriptionScope::All).await;
    h.clock.set_secs(last_heartbeat + HARD_DEADLINE - 3_600);
    h.evaluator
        .evaluate(addr(1), &snapshot(last_heartbeat, 1, true))
        .await
        .unwrap();

    let critical = h.store.open_for_agent(addr(1)).await.unwrap().unwrap();
    assert_eq!(critical.id, warning.id);
    assert_eq!(critical.severity, Severity::Critical);
    assert_eq!(h.store.list_by_agent(addr(1)).await.unwrap().len(), 1);

    let events = drain(&mut sub);
    assert_eq!(of_kind(&events, EventKind::Status).len(), 1);
}

#[tokio::test]
async fn heartbeat_resolves_the_open_report() {
    let h = harness(MarketplaceState::Active, false).await;

    let last_heartbeat = 100_000;
    h.clock.set_secs(last_heartbeat + HARD_DEADLINE - 3_600);
    h.evaluator
        .evaluate(addr(1), &snapshot(last_heartbeat, 1, true))
        .await
        .unwrap();
    let open = h.store.open_for_agent(addr(1)).await.unwrap().unwrap();

    let mut sub = h.hub.subscribe(SubscriptionScope::All).await;
    let heartbeat_at = h.clock.epoch_secs();
    h.evaluator
        .note_heartbeat(&HeartbeatEvent {
            agent_address: addr(1),
            heartbeat_count: 2,
            decision_ref: DecisionRef::default(),
            timestamp: heartbeat_at,
        })
        .await;

    let resolved = h.store.get(&open.id).await.unwrap().unwrap();
    assert!(resolved.resolved);
    let resolution = resolved.resolution.unwrap();
    assert!(resolution.starts_with("heartbeat observed at"));
    assert!(h.store.open_for_agent(addr(1)).await.unwrap().is_none());

    let events = drain(&mut sub);
    assert_eq!(of_kind(&events, EventKind::Heartbeat).len(), 1);
    let status = of_kind(&events, EventKind::Status);
    assert_eq!(status.len(), 1);
    let MonitorEvent::StatusChange { level, .. } = &status[0] else {
        panic!("expected status event");
    };
    assert_eq!(*level, HealthLevel::Healthy);
}

#[tokio::test]
async fn abandoned_with_marketplace_down_attaches_snapshot() {
    let h = harness(MarketplaceState::Closed, false).await;
    let mut sub = h.hub.subscribe(SubscriptionScope::All).await;

    let last_heartbeat = 100_000;
    h.clock.set_secs(last_heartbeat + HARD_DEADLINE + 1_000);
    h.evaluator
        .evaluate(addr(1), &snapshot(last_heartbeat, 1, true))
        .await
        .unwrap();

    let report = h.store.open_for_agent(addr(1)).await.unwrap().unwrap();
    assert_eq!(report.severity, Severity::Abandoned);
    let marketplace = report.marketplace_snapshot.expect("snapshot attached");
    assert_eq!(marketplace.state, MarketplaceState::Closed);
    assert_eq!(h.workload.calls.load(Ordering::SeqCst), 1);

    let events = drain(&mut sub);
    let errors = of_kind(&events, EventKind::Error);
    let marketplace_down = errors.iter().any(|event| {
        matches!(
            event,
            MonitorEvent::Error { alert: Some(alert), .. }
                if alert.kind == vigil_primitives::AlertKind::MarketplaceDown
        )
    });
    assert!(marketplace_down);

    // Declaration stays out of band unless the operator opts in.
    assert_eq!(h.sink.declared.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn opt_in_abandonment_reaches_the_sink() {
    let h = harness(MarketplaceState::Closed, true).await;

    h.clock.set_secs(100_000 + HARD_DEADLINE + 1_000);
    h.evaluator
        .evaluate(addr(1), &snapshot(100_000, 1, true))
        .await
        .unwrap();

    assert_eq!(h.sink.declared.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn death_is_emitted_exactly_once() {
    let h = harness(MarketplaceState::Active, false).await;

    // Open a report first so death resolution is observable.
    let last_heartbeat = 100_000;
    h.clock.set_secs(last_heartbeat + HARD_DEADLINE - 3_600);
    h.evaluator
        .evaluate(addr(1), &snapshot(last_heartbeat, 1, true))
        .await
        .unwrap();
    let open = h.store.open_for_agent(addr(1)).await.unwrap().unwrap();

    let mut sub = h.hub.subscribe(SubscriptionScope::All).await;
    h.evaluator
        .evaluate(addr(1), &snapshot(last_heartbeat, 1, false))
        .await
        .unwrap();
    h.evaluator
        .evaluate(addr(1), &snapshot(last_heartbeat, 1, false))
        .await
        .unwrap();

    let resolved = h.store.get(&open.id).await.unwrap().unwrap();
    assert!(resolved.resolved);
    assert_eq!(resolved.resolution.as_deref(), Some("agent died"));

    let events = drain(&mut sub);
    assert_eq!(of_kind(&events, EventKind::Death).len(), 1);

    let now = h.clock.epoch_secs();
    assert!(h.tracker.schedulable(now).await.is_empty());
}

#[tokio::test]
async fn identical_snapshots_are_idempotent() {
    let h = harness(MarketplaceState::Active, false).await;
    let mut sub = h.hub.subscribe(SubscriptionScope::All).await;

    let last_heartbeat = 100_000;
    h.clock.set_secs(last_heartbeat + HARD_DEADLINE - 86_000);
    let snap = snapshot(last_heartbeat, 1, true);
    h.evaluator.evaluate(addr(1), &snap).await.unwrap();
    let first_events = drain(&mut sub).len();

    h.evaluator.evaluate(addr(1), &snap).await.unwrap();
    assert_eq!(h.store.list_by_agent(addr(1)).await.unwrap().len(), 1);
    assert_eq!(drain(&mut sub).len(), 0, "no second event for identical input");
    assert!(first_events > 0);
}

#[tokio::test]
async fn stale_snapshot_after_heartbeat_event_is_cancelled() {
    let h = harness(MarketplaceState::Active, false).await;

    let last_heartbeat = 100_000;
    h.clock.set_secs(last_heartbeat + HARD_DEADLINE - 3_600);

    // A heartbeat event lands first with a fresher count.
    h.evaluator
        .note_heartbeat(&HeartbeatEvent {
            agent_address: addr(1),
            heartbeat_count: 5,
            decision_ref: DecisionRef::default(),
            timestamp: h.clock.epoch_secs(),
        })
        .await;

    // The in-flight snapshot carries the older count: the fresher count
    // wins and no report is opened for this tick.
    h.evaluator
        .evaluate(addr(1), &snapshot(last_heartbeat, 4, true))
        .await
        .unwrap();
    assert!(h.store.open_for_agent(addr(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn counter_decrease_without_event_is_protocol_mismatch() {
    let h = harness(MarketplaceState::Active, false).await;

    h.clock.set_secs(100_500);
    h.evaluator
        .evaluate(addr(1), &snapshot(100_000, 5, true))
        .await
        .unwrap();

    let err = h
        .evaluator
        .evaluate(addr(1), &snapshot(100_000, 3, true))
        .await
        .expect_err("decreasing counter rejected");
    assert!(err.is_fatal());
    assert!(h.store.open_for_agent(addr(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn balance_runway_alert_is_debounced() {
    let h = harness(MarketplaceState::Active, false).await;
    let mut sub = h.hub.subscribe(SubscriptionScope::All).await;

    // 3 days of runway.
    let mut snap = snapshot(99_500, 1, true);
    snap.balance = 30_000_000;
    h.clock.set_secs(100_000);
    h.evaluator.evaluate(addr(1), &snap).await.unwrap();

    let events = drain(&mut sub);
    let balance_alerts = of_kind(&events, EventKind::Error);
    assert_eq!(balance_alerts.len(), 1);

    // Within the debounce window nothing fires again.
    h.clock.advance_secs(3_600);
    snap.heartbeat_count = 2;
    snap.last_heartbeat_at = 100_000;
    h.evaluator.evaluate(addr(1), &snap).await.unwrap();
    let events = drain(&mut sub);
    assert!(of_kind(&events, EventKind::Error).is_empty());

    // Past 24 h the alert may fire again.
    h.clock.advance_secs(86_400);
    snap.heartbeat_count = 3;
    snap.last_heartbeat_at = h.clock.epoch_secs() - 10;
    h.evaluator.evaluate(addr(1), &snap).await.unwrap();
    let events = drain(&mut sub);
    assert_eq!(of_kind(&events, EventKind::Error).len(), 1);
}
