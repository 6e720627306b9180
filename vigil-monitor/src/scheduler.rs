//! Periodic fan-out of per-agent liveness checks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_chain::ChainGateway;
use vigil_primitives::{AgentAddress, Clock, MonitorConfig};

use crate::evaluator::LivenessEvaluator;
use crate::locks::{KeyedGuard, KeyedLocks};
use crate::tracker::AgentTracker;

const BACKOFF_BASE: Duration = Duration::from_secs(5 * 60);
const BACKOFF_CAP: Duration = Duration::from_secs(30 * 60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Counters the scheduler maintains for the overview rollup.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    overflow: AtomicU64,
    checks: AtomicU64,
}

impl SchedulerMetrics {
    /// Enqueue attempts dropped because the work queue was full.
    #[must_use]
    pub fn overflow(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Checks completed since boot.
    #[must_use]
    pub fn checks(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }
}

struct CheckJob {
    address: AgentAddress,
    // Held for the duration of the check; dropping the job releases it.
    _guard: KeyedGuard,
}

/// Runs the tick loop and the worker pool. One in-flight check per agent
/// at any moment; within one tick each agent is evaluated at most once.
pub struct Scheduler {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    chain: Arc<dyn ChainGateway>,
    evaluator: Arc<LivenessEvaluator>,
    tracker: Arc<AgentTracker>,
    locks: KeyedLocks,
    metrics: Arc<SchedulerMetrics>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
        chain: Arc<dyn ChainGateway>,
        evaluator: Arc<LivenessEvaluator>,
        tracker: Arc<AgentTracker>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            clock,
            chain,
            evaluator,
            tracker,
            locks: KeyedLocks::new(),
            metrics: Arc::new(SchedulerMetrics::default()),
            cancel,
        }
    }

    /// Shared counters for the overview rollup.
    #[must_use]
    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Runs until cancelled: ticks, dispatches, and drains the worker pool
    /// within the shutdown grace period.
    pub async fn run(self: Arc<Self>) {
        let (tx, rx) = mpsc::channel::<CheckJob>(self.config.queue_capacity());
        let rx = Arc::new(Mutex::new(rx));

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(self.config.worker_count());
        for worker_id in 0..self.config.worker_count() {
            let scheduler = Arc::clone(&self);
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(async move {
                scheduler.worker_loop(worker_id, rx).await;
            }));
        }

        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.dispatch_tick(&tx).await,
            }
        }

        // Closing the queue lets idle workers exit; busy ones get the
        // grace period to finish their current check.
        drop(tx);
        info!("scheduler stopping; draining workers");
        for worker in workers {
            if timeout(SHUTDOWN_GRACE, worker).await.is_err() {
                warn!("worker exceeded shutdown grace; abandoned");
            }
        }
    }

    async fn dispatch_tick(&self, tx: &mpsc::Sender<CheckJob>) {
        let now = self.clock.epoch_secs();
        let rotation = self.tracker.schedulable(now).await;
        debug!(agents = rotation.len(), "tick dispatch");

        for address in rotation {
            if self.tracker.is_verified(address, now).await {
                // A heartbeat event already vouched for this agent within
                // the current window; skip the RPC.
                continue;
            }
            let Some(guard) = self.locks.try_acquire(address) else {
                continue;
            };
            match tx.try_send(CheckJob {
                address,
                _guard: guard,
            }) {
                Ok(()) => self.tracker.clear_overflow(address).await,
                Err(mpsc::error::TrySendError::Full(job)) => {
                    drop(job);
                    self.metrics.overflow.fetch_add(1, Ordering::Relaxed);
                    let streak = self.tracker.note_overflow(address).await;
                    if streak >= 2 {
                        warn!(agent = %address, streak, "check enqueue overflowed again");
                    } else {
                        debug!(agent = %address, "check enqueue overflowed");
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }

    async fn worker_loop(&self, worker_id: usize, rx: Arc<Mutex<mpsc::Receiver<CheckJob>>>) {
        loop {
            let job = {
                let mut guard = rx.lock().await;
                tokio::select! {
                    () = self.cancel.cancelled() => None,
                    job = guard.recv() => job,
                }
            };
            let Some(job) = job else { break };

            let deadline = self.config.tick_interval().mul_f64(1.5);
            if timeout(deadline, self.run_check(job.address)).await.is_err() {
                warn!(worker_id, agent = %job.address, "check exceeded its deadline; abandoned");
            }
            self.metrics.checks.fetch_add(1, Ordering::Relaxed);
            drop(job);
        }
    }

    async fn run_check(&self, address: AgentAddress) {
        match self.chain.snapshot(address).await {
            Ok(Some(snapshot)) => {
                self.tracker.note_success(address).await;
                if let Err(err) = self.evaluator.evaluate(address, &snapshot).await {
                    // Protocol mismatches skip the agent for this tick; no
                    // report is written for corrupt observations.
                    warn!(agent = %address, %err, "evaluation skipped");
                }
            }
            Ok(None) => {
                debug!(agent = %address, "agent no longer present on chain");
            }
            Err(err) if err.is_transient() => {
                let now = self.clock.epoch_secs();
                let failures = self
                    .tracker
                    .note_failure(address, now, BACKOFF_BASE, BACKOFF_CAP)
                    .await;
                warn!(agent = %address, failures, %err, "transient check failure");
            }
            Err(err) => {
                warn!(agent = %address, %err, "check failed; skipped");
            }
        }
    }

    /// Runs an immediate out-of-band check, used when a creation event
    /// lands. Skipped silently when the agent is already being checked.
    pub async fn check_now(&self, address: AgentAddress) {
        let Some(guard) = self.locks.try_acquire(address) else {
            return;
        };
        self.run_check(address).await;
        drop(guard);
    }
}
