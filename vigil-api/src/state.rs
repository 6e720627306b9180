//! Shared handler state.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use vigil_chain::ChainGateway;
use vigil_hub::EventHub;
use vigil_monitor::{AgentTracker, SchedulerMetrics};
use vigil_primitives::{Clock, MonitorConfig};
use vigil_store::{DeploymentRegistry, ReportStore};
use vigil_workload::WorkloadGateway;

use crate::ratelimit::RateLimiter;
use crate::routes::PlatformOverview;

pub(crate) struct ApiInner {
    pub(crate) config: MonitorConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) chain: Arc<dyn ChainGateway>,
    pub(crate) workload: Option<Arc<dyn WorkloadGateway>>,
    pub(crate) store: Arc<dyn ReportStore>,
    pub(crate) registry: Arc<DeploymentRegistry>,
    pub(crate) tracker: Arc<AgentTracker>,
    pub(crate) hub: Arc<EventHub>,
    pub(crate) scheduler_metrics: Arc<SchedulerMetrics>,
    pub(crate) limiter: RateLimiter,
    pub(crate) cancel: CancellationToken,
    pub(crate) overview_cache: Mutex<Option<(u64, PlatformOverview)>>,
}

/// Cloneable handle threaded through every handler.
#[derive(Clone)]
pub struct ApiState {
    pub(crate) inner: Arc<ApiInner>,
}

impl ApiState {
    /// Assembles the handler state.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
        chain: Arc<dyn ChainGateway>,
        workload: Option<Arc<dyn WorkloadGateway>>,
        store: Arc<dyn ReportStore>,
        registry: Arc<DeploymentRegistry>,
        tracker: Arc<AgentTracker>,
        hub: Arc<EventHub>,
        scheduler_metrics: Arc<SchedulerMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ApiInner {
                config,
                clock,
                chain,
                workload,
                store,
                registry,
                tracker,
                hub,
                scheduler_metrics,
                limiter: RateLimiter::default(),
                cancel,
                overview_cache: Mutex::new(None),
            }),
        }
    }
}
