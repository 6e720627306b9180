//! Top-level ownership of the monitoring runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_chain::{ChainGateway, CreationEvent};
use vigil_hub::EventHub;
use vigil_primitives::{AgentAddress, Clock, MonitorConfig, MonitorResult};
use vigil_store::{DeploymentRegistry, ReportStore};
use vigil_workload::WorkloadGateway;

use crate::evaluator::{AbandonmentSink, LivenessEvaluator};
use crate::scheduler::{Scheduler, SchedulerMetrics};
use crate::tracker::AgentTracker;

const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(12);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(6 * 3600);
const REPORT_RETENTION_DAYS: u64 = 30;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Builder wiring the supervisor's dependencies.
pub struct SupervisorBuilder {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    chain: Option<Arc<dyn ChainGateway>>,
    workload: Option<Arc<dyn WorkloadGateway>>,
    store: Option<Arc<dyn ReportStore>>,
    registry: Option<Arc<DeploymentRegistry>>,
    hub: Option<Arc<EventHub>>,
    abandonment: Option<Arc<dyn AbandonmentSink>>,
}

impl SupervisorBuilder {
    /// Starts a builder for the given configuration and clock.
    #[must_use]
    pub fn new(config: MonitorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            chain: None,
            workload: None,
            store: None,
            registry: None,
            hub: None,
            abandonment: None,
        }
    }

    /// Installs the chain gateway. Required.
    #[must_use]
    pub fn chain(mut self, chain: Arc<dyn ChainGateway>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Installs the workload gateway.
    #[must_use]
    pub fn workload(mut self, workload: Arc<dyn WorkloadGateway>) -> Self {
        self.workload = Some(workload);
        self
    }

    /// Installs the report store. Required.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ReportStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Installs the deployment registry. Required.
    #[must_use]
    pub fn registry(mut self, registry: Arc<DeploymentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Installs the event hub. Required.
    #[must_use]
    pub fn hub(mut self, hub: Arc<EventHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Installs the out-of-band abandonment submitter.
    #[must_use]
    pub fn abandonment(mut self, sink: Arc<dyn AbandonmentSink>) -> Self {
        self.abandonment = Some(sink);
        self
    }

    /// Validates the configuration and assembles the supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`vigil_primitives::MonitorError::InvalidInput`] when the
    /// configuration is invalid or a required dependency is missing.
    pub fn build(self) -> MonitorResult<Supervisor> {
        self.config.validate()?;
        let missing = |what: &str| {
            vigil_primitives::MonitorError::invalid_input(format!("supervisor requires {what}"))
        };
        let chain = self.chain.ok_or_else(|| missing("a chain gateway"))?;
        let store = self.store.ok_or_else(|| missing("a report store"))?;
        let registry = self.registry.ok_or_else(|| missing("a deployment registry"))?;
        let hub = self.hub.ok_or_else(|| missing("an event hub"))?;

        let tracker = Arc::new(AgentTracker::new());
        let cancel = CancellationToken::new();
        let evaluator = Arc::new(LivenessEvaluator::new(
            self.config.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&store),
            Arc::clone(&registry),
            self.workload.clone(),
            Arc::clone(&hub),
            Arc::clone(&tracker),
            self.abandonment.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            self.config.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&chain),
            Arc::clone(&evaluator),
            Arc::clone(&tracker),
            cancel.clone(),
        ));

        Ok(Supervisor {
            config: self.config,
            clock: self.clock,
            chain,
            store,
            registry,
            tracker,
            evaluator,
            scheduler,
            cancel,
            handles: Vec::new(),
        })
    }
}

/// Owns the monitoring runtime: gateways, stores, hub wiring, scheduler,
/// and the event watchers. Shutdown propagates top-down with a bounded
/// grace period.
pub struct Supervisor {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    chain: Arc<dyn ChainGateway>,
    store: Arc<dyn ReportStore>,
    registry: Arc<DeploymentRegistry>,
    tracker: Arc<AgentTracker>,
    evaluator: Arc<LivenessEvaluator>,
    scheduler: Arc<Scheduler>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// The shared agent tracker, for the query surface.
    #[must_use]
    pub fn tracker(&self) -> Arc<AgentTracker> {
        Arc::clone(&self.tracker)
    }

    /// Scheduler counters, for the overview rollup.
    #[must_use]
    pub fn scheduler_metrics(&self) -> Arc<SchedulerMetrics> {
        self.scheduler.metrics()
    }

    /// Cancellation token observed by every task the supervisor spawns.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Seeds the tracker from the factory's current agent set.
    ///
    /// # Errors
    ///
    /// Propagates chain failures; the caller decides whether a cold boot
    /// without the initial set is acceptable.
    pub async fn bootstrap(&self) -> MonitorResult<()> {
        let agents = self.chain.enumerate().await?;
        info!(agents = agents.len(), "bootstrapping agent registry");
        for address in agents {
            self.register_agent(address, None).await;
        }
        Ok(())
    }

    /// Registers one agent, sourcing its cadence and creator once.
    async fn register_agent(&self, address: AgentAddress, creator: Option<AgentAddress>) {
        let nominal = match self.chain.nominal_interval(address).await {
            Ok(Some(interval)) => interval,
            Ok(None) => self.config.nominal_interval(),
            Err(err) => {
                warn!(agent = %address, %err, "cadence lookup failed; using default");
                self.config.nominal_interval()
            }
        };
        let creator = match creator {
            Some(creator) => Some(creator),
            None => self.chain.creator(address).await.ok().flatten(),
        };
        self.tracker.register(address, nominal, creator).await;
    }

    /// Spawns the scheduler, the event watchers, and the maintenance
    /// loop.
    pub fn start(&mut self) {
        let scheduler = Arc::clone(&self.scheduler);
        self.handles.push(tokio::spawn(scheduler.run()));

        let watcher = CreationWatcher {
            chain: Arc::clone(&self.chain),
            scheduler: Arc::clone(&self.scheduler),
            config: self.config.clone(),
            tracker: Arc::clone(&self.tracker),
            cancel: self.cancel.clone(),
        };
        self.handles.push(tokio::spawn(watcher.run()));

        let heartbeats = HeartbeatWatcher {
            chain: Arc::clone(&self.chain),
            evaluator: Arc::clone(&self.evaluator),
            tracker: Arc::clone(&self.tracker),
            clock: Arc::clone(&self.clock),
            cancel: self.cancel.clone(),
        };
        self.handles.push(tokio::spawn(heartbeats.run()));

        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            run_maintenance(store, registry, cancel).await;
        }));

        info!("supervisor started");
    }

    /// Cancels every task and waits out the grace period.
    pub async fn shutdown(mut self) {
        info!("supervisor shutting down");
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("task exceeded shutdown grace; abandoned");
            }
        }
    }
}

struct CreationWatcher {
    chain: Arc<dyn ChainGateway>,
    scheduler: Arc<Scheduler>,
    config: MonitorConfig,
    tracker: Arc<AgentTracker>,
    cancel: CancellationToken,
}

impl CreationWatcher {
    async fn run(self) {
        let mut cursor = match self.chain.latest_block().await {
            Ok(latest) => latest.saturating_add(1),
            Err(err) => {
                warn!(%err, "creation watcher could not read chain head; starting from genesis");
                0
            }
        };

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = sleep(EVENT_POLL_INTERVAL) => {}
            }

            match self.chain.creations_since(cursor).await {
                Ok(batch) => {
                    cursor = batch.next_from_block;
                    for event in batch.events {
                        self.on_creation(event).await;
                    }
                }
                Err(err) => {
                    warn!(%err, "creation poll failed");
                }
            }
        }
    }

    async fn on_creation(&self, event: CreationEvent) {
        info!(agent = %event.agent_address, creator = %event.creator, "agent created");
        let nominal = match self.chain.nominal_interval(event.agent_address).await {
            Ok(Some(interval)) => interval,
            _ => self.config.nominal_interval(),
        };
        if self
            .tracker
            .register(event.agent_address, nominal, Some(event.creator))
            .await
        {
            self.scheduler.check_now(event.agent_address).await;
        }
    }
}

struct HeartbeatWatcher {
    chain: Arc<dyn ChainGateway>,
    evaluator: Arc<LivenessEvaluator>,
    tracker: Arc<AgentTracker>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl HeartbeatWatcher {
    async fn run(self) {
        let mut cursor = match self.chain.latest_block().await {
            Ok(latest) => latest.saturating_add(1),
            Err(err) => {
                warn!(%err, "heartbeat watcher could not read chain head; starting from genesis");
                0
            }
        };

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = sleep(EVENT_POLL_INTERVAL) => {}
            }

            let now = self.clock.epoch_secs();
            let agents = self.tracker.schedulable(now).await;
            match self.chain.heartbeats_since(cursor, &agents).await {
                Ok(batch) => {
                    cursor = batch.next_from_block;
                    for event in batch.events {
                        self.evaluator.note_heartbeat(&event).await;
                    }
                }
                Err(err) => {
                    warn!(%err, "heartbeat poll failed");
                }
            }
        }
    }
}

async fn run_maintenance(
    store: Arc<dyn ReportStore>,
    registry: Arc<DeploymentRegistry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = sleep(MAINTENANCE_INTERVAL) => {}
        }

        match store.garbage_collect(REPORT_RETENTION_DAYS).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "expired reports collected"),
            Err(err) => warn!(%err, "report garbage collection failed"),
        }
        let pruned = registry.prune_expired().await;
        if pruned > 0 {
            info!(pruned, "expired deployment handles pruned");
        }
    }
}
