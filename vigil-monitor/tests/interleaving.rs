//! Property-based interleavings of heartbeat events and evaluator ticks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use vigil_chain::HeartbeatEvent;
use vigil_hub::{EventHub, SubscriptionScope};
use vigil_monitor::{AgentTracker, LivenessEvaluator};
use vigil_primitives::{
    AgentAddress, AgentSnapshot, Clock, DecisionRef, GenomeRef, ManualClock, MonitorConfig,
};
use vigil_store::{DeploymentRegistry, MemoryReportStore, RegistryConfig, ReportStore};

const NOMINAL_INTERVAL: u64 = 21_600;

#[derive(Clone, Copy, Debug)]
enum Op {
    /// Advance the clock.
    Advance(u64),
    /// Evaluate a snapshot reflecting current model state.
    Tick,
    /// A heartbeat event lands from the chain watcher.
    Heartbeat,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (60_u64..200_000).prop_map(Op::Advance),
        Just(Op::Tick),
        Just(Op::Heartbeat),
    ]
}

fn addr(n: u8) -> AgentAddress {
    let mut bytes = [0_u8; 20];
    bytes[19] = n;
    AgentAddress::from_inner(bytes.into())
}

fn snapshot(last_heartbeat_at: u64, heartbeat_count: u64) -> AgentSnapshot {
    AgentSnapshot {
        genome_ref: GenomeRef::default(),
        birth_time: 0,
        last_heartbeat_at,
        heartbeat_count,
        alive: true,
        balance: 700_000_000,
        last_decision_ref: DecisionRef::default(),
        cumulative_cost: 10_000_000,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn interleavings_preserve_report_and_ordering_invariants(
        ops in proptest::collection::vec(op_strategy(), 1..48)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let agent = addr(1);
            let clock = Arc::new(ManualClock::at_secs(100_000));
            let store = Arc::new(MemoryReportStore::new(Arc::clone(&clock) as Arc<dyn Clock>));
            let hub = Arc::new(EventHub::default());
            let tracker = Arc::new(AgentTracker::new());
            let registry = Arc::new(DeploymentRegistry::new(
                RegistryConfig::default(),
                Arc::clone(&clock) as Arc<dyn Clock>,
            ));
            let evaluator = LivenessEvaluator::new(
                MonitorConfig::default(),
                Arc::clone(&clock) as Arc<dyn Clock>,
                Arc::clone(&store) as Arc<dyn ReportStore>,
                registry,
                None,
                Arc::clone(&hub),
                Arc::clone(&tracker),
                None,
            );
            tracker
                .register(agent, Duration::from_secs(NOMINAL_INTERVAL), None)
                .await;
            let mut sub = hub.subscribe(SubscriptionScope::All).await;

            let mut model_last_heartbeat = 100_000_u64;
            let mut model_count = 1_u64;
            let mut resolved_ids: HashSet<String> = HashSet::new();

            for op in ops {
                match op {
                    Op::Advance(secs) => clock.advance_secs(secs),
                    Op::Tick => {
                        evaluator
                            .evaluate(agent, &snapshot(model_last_heartbeat, model_count))
                            .await
                            .expect("monotone counts never mismatch");
                    }
                    Op::Heartbeat => {
                        model_count += 1;
                        model_last_heartbeat = clock.epoch_secs();
                        evaluator
                            .note_heartbeat(&HeartbeatEvent {
                                agent_address: agent,
                                heartbeat_count: model_count,
                                decision_ref: DecisionRef::default(),
                                timestamp: model_last_heartbeat,
                            })
                            .await;
                    }
                }

                // Invariant 1: at most one open report per agent.
                let open: Vec<_> = store
                    .list_by_agent(agent)
                    .await
                    .unwrap()
                    .into_iter()
                    .filter(vigil_primitives::MissingReport::is_open)
                    .collect();
                prop_assert!(open.len() <= 1, "multiple open reports: {open:?}");

                // Invariant 2: resolved reports never reopen.
                for report in store.list_by_agent(agent).await.unwrap() {
                    if report.resolved {
                        resolved_ids.insert(report.id.clone());
                    } else {
                        prop_assert!(
                            !resolved_ids.contains(&report.id),
                            "report {} reopened",
                            report.id
                        );
                    }
                }
            }

            // Invariant 5: per-agent event timestamps strictly increase.
            let mut last_by_agent: HashMap<AgentAddress, u64> = HashMap::new();
            while let Some(event) = sub.try_recv() {
                let address = event.agent_address();
                let timestamp = event.timestamp();
                if let Some(previous) = last_by_agent.get(&address) {
                    prop_assert!(
                        timestamp > *previous,
                        "timestamps not strictly increasing: {previous} then {timestamp}"
                    );
                }
                last_by_agent.insert(address, timestamp);
            }

            Ok(())
        })?;
    }

    #[test]
    fn acknowledge_and_resolve_are_idempotent(
        actors in proptest::collection::vec("[a-z]{1,8}", 1..6),
        resolutions in proptest::collection::vec("[a-z ]{1,16}", 1..4)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let clock = Arc::new(ManualClock::at_secs(50_000));
            let store = MemoryReportStore::new(Arc::clone(&clock) as Arc<dyn Clock>);
            let report = store
                .create(vigil_primitives::ReportDraft {
                    agent_address: addr(7),
                    severity: vigil_primitives::Severity::Warning,
                    expected_at: 1_000,
                    last_heartbeat_at: 500,
                    deadline_at: 10_000,
                    marketplace_snapshot: None,
                })
                .await
                .unwrap();

            for actor in &actors {
                let acked = store.acknowledge(&report.id, actor).await.unwrap();
                prop_assert!(acked.acknowledged);
                prop_assert_eq!(acked.acknowledged_by.as_deref(), Some(actor.as_str()));
            }

            let first = store.resolve(&report.id, &resolutions[0]).await.unwrap();
            for resolution in &resolutions {
                let again = store.resolve(&report.id, resolution).await.unwrap();
                prop_assert_eq!(again.resolution.as_deref(), first.resolution.as_deref());
                prop_assert_eq!(again.resolved_at, first.resolved_at);
            }

            Ok(())
        })?;
    }
}
