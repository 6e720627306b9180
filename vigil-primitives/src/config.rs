//! Monitor configuration.

use std::env;
use std::time::Duration;

use crate::error::{MonitorError, MonitorResult};

const DEFAULT_TICK_INTERVAL_MS: u64 = 60_000;
const DEFAULT_WORKER_COUNT: usize = 16;
const DEFAULT_WARNING_THRESHOLD_HOURS: u64 = 24;
const DEFAULT_CRITICAL_THRESHOLD_HOURS: u64 = 6;
const DEFAULT_HARD_DEADLINE_DAYS: u64 = 7;
const DEFAULT_NOMINAL_INTERVAL_HOURS: u64 = 6;
const DEFAULT_MAX_RPC_CONNECTIONS: usize = 8;

/// Configuration for the liveness control plane.
///
/// Construct via [`Default`] plus the `with_*` setters, or from the process
/// environment via [`MonitorConfig::from_env`]. Call
/// [`validate`](MonitorConfig::validate) before handing the configuration
/// to the supervisor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    tick_interval: Duration,
    worker_count: usize,
    warning_threshold: Duration,
    critical_threshold: Duration,
    hard_deadline: Duration,
    nominal_interval: Duration,
    marketplace_check_enabled: bool,
    auto_declare_abandoned: bool,
    rpc_endpoint: String,
    factory_address: String,
    report_store_path: Option<String>,
    marketplace_endpoint: String,
    max_rpc_connections: usize,
    rpc_deadline: Duration,
    workload_deadline: Duration,
    store_deadline: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            worker_count: DEFAULT_WORKER_COUNT,
            warning_threshold: Duration::from_secs(DEFAULT_WARNING_THRESHOLD_HOURS * 3600),
            critical_threshold: Duration::from_secs(DEFAULT_CRITICAL_THRESHOLD_HOURS * 3600),
            hard_deadline: Duration::from_secs(DEFAULT_HARD_DEADLINE_DAYS * 86_400),
            nominal_interval: Duration::from_secs(DEFAULT_NOMINAL_INTERVAL_HOURS * 3600),
            marketplace_check_enabled: true,
            auto_declare_abandoned: false,
            rpc_endpoint: String::new(),
            factory_address: String::new(),
            report_store_path: None,
            marketplace_endpoint: String::new(),
            max_rpc_connections: DEFAULT_MAX_RPC_CONNECTIONS,
            rpc_deadline: Duration::from_secs(30),
            workload_deadline: Duration::from_secs(10),
            store_deadline: Duration::from_secs(5),
        }
    }
}

impl MonitorConfig {
    /// Loads configuration from `VIGIL_*` environment variables, falling
    /// back to the defaults for unset keys.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidInput`] when a set variable fails to
    /// parse.
    pub fn from_env() -> MonitorResult<Self> {
        let mut config = Self::default();
        if let Some(ms) = read_u64("VIGIL_TICK_INTERVAL_MS")? {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(count) = read_u64("VIGIL_WORKER_COUNT")? {
            config.worker_count = usize::try_from(count)
                .map_err(|_| MonitorError::invalid_input("VIGIL_WORKER_COUNT out of range"))?;
        }
        if let Some(hours) = read_u64("VIGIL_WARNING_THRESHOLD_HOURS")? {
            config.warning_threshold = Duration::from_secs(hours * 3600);
        }
        if let Some(hours) = read_u64("VIGIL_CRITICAL_THRESHOLD_HOURS")? {
            config.critical_threshold = Duration::from_secs(hours * 3600);
        }
        if let Some(days) = read_u64("VIGIL_HARD_DEADLINE_DAYS")? {
            config.hard_deadline = Duration::from_secs(days * 86_400);
        }
        if let Some(enabled) = read_bool("VIGIL_MARKETPLACE_CHECK_ENABLED")? {
            config.marketplace_check_enabled = enabled;
        }
        if let Some(enabled) = read_bool("VIGIL_AUTO_DECLARE_ABANDONED")? {
            config.auto_declare_abandoned = enabled;
        }
        if let Ok(value) = env::var("VIGIL_RPC_ENDPOINT") {
            config.rpc_endpoint = value;
        }
        if let Ok(value) = env::var("VIGIL_FACTORY_ADDRESS") {
            config.factory_address = value;
        }
        if let Ok(value) = env::var("VIGIL_REPORT_STORE_PATH") {
            config.report_store_path = Some(value);
        }
        if let Ok(value) = env::var("VIGIL_MARKETPLACE_ENDPOINT") {
            config.marketplace_endpoint = value;
        }
        if let Some(count) = read_u64("VIGIL_MAX_RPC_CONNECTIONS")? {
            config.max_rpc_connections = usize::try_from(count)
                .map_err(|_| MonitorError::invalid_input("VIGIL_MAX_RPC_CONNECTIONS out of range"))?;
        }
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::InvalidInput`] when a duration is zero, the
    /// worker count is zero, or the thresholds are inconsistent.
    pub fn validate(&self) -> MonitorResult<()> {
        if self.tick_interval.is_zero() {
            return Err(MonitorError::invalid_input("tick interval must be greater than zero"));
        }
        if self.worker_count == 0 {
            return Err(MonitorError::invalid_input("worker count must be greater than zero"));
        }
        if self.critical_threshold.is_zero() {
            return Err(MonitorError::invalid_input(
                "critical threshold must be greater than zero",
            ));
        }
        if self.critical_threshold >= self.warning_threshold {
            return Err(MonitorError::invalid_input(
                "critical threshold must be below the warning threshold",
            ));
        }
        if self.warning_threshold >= self.hard_deadline {
            return Err(MonitorError::invalid_input(
                "warning threshold must be below the hard deadline",
            ));
        }
        if self.nominal_interval >= self.hard_deadline {
            return Err(MonitorError::invalid_input(
                "nominal interval must be below the hard deadline",
            ));
        }
        if self.max_rpc_connections == 0 {
            return Err(MonitorError::invalid_input(
                "max rpc connections must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Scheduler tick interval.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Number of parallel check workers.
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Work-queue capacity: four jobs per worker.
    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.worker_count * 4
    }

    /// Remaining-time threshold below which severity becomes `warning`.
    #[must_use]
    pub const fn warning_threshold(&self) -> Duration {
        self.warning_threshold
    }

    /// Remaining-time threshold below which severity becomes `critical`.
    #[must_use]
    pub const fn critical_threshold(&self) -> Duration {
        self.critical_threshold
    }

    /// Contract-enforced maximum time between heartbeats.
    #[must_use]
    pub const fn hard_deadline(&self) -> Duration {
        self.hard_deadline
    }

    /// Default expected heartbeat cadence, used when an agent exposes no
    /// per-agent interval.
    #[must_use]
    pub const fn nominal_interval(&self) -> Duration {
        self.nominal_interval
    }

    /// Whether elevated evaluations query the workload marketplace.
    #[must_use]
    pub const fn marketplace_check_enabled(&self) -> bool {
        self.marketplace_check_enabled
    }

    /// Whether abandoned agents are handed to the out-of-band declaration
    /// submitter.
    #[must_use]
    pub const fn auto_declare_abandoned(&self) -> bool {
        self.auto_declare_abandoned
    }

    /// EVM JSON-RPC endpoint.
    #[must_use]
    pub fn rpc_endpoint(&self) -> &str {
        &self.rpc_endpoint
    }

    /// Agent factory contract address, hex.
    #[must_use]
    pub fn factory_address(&self) -> &str {
        &self.factory_address
    }

    /// Path of the durable report journal; `None` selects the in-memory
    /// store.
    #[must_use]
    pub fn report_store_path(&self) -> Option<&str> {
        self.report_store_path.as_deref()
    }

    /// Workload marketplace API endpoint.
    #[must_use]
    pub fn marketplace_endpoint(&self) -> &str {
        &self.marketplace_endpoint
    }

    /// Ceiling on concurrent RPC connections.
    #[must_use]
    pub const fn max_rpc_connections(&self) -> usize {
        self.max_rpc_connections
    }

    /// Per-call deadline for chain RPCs.
    #[must_use]
    pub const fn rpc_deadline(&self) -> Duration {
        self.rpc_deadline
    }

    /// Per-call deadline for marketplace queries.
    #[must_use]
    pub const fn workload_deadline(&self) -> Duration {
        self.workload_deadline
    }

    /// Per-call deadline for store operations.
    #[must_use]
    pub const fn store_deadline(&self) -> Duration {
        self.store_deadline
    }

    /// Sets the scheduler tick interval.
    #[must_use]
    pub const fn with_tick_interval(mut self, value: Duration) -> Self {
        self.tick_interval = value;
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub const fn with_worker_count(mut self, value: usize) -> Self {
        self.worker_count = value;
        self
    }

    /// Sets the warning threshold.
    #[must_use]
    pub const fn with_warning_threshold(mut self, value: Duration) -> Self {
        self.warning_threshold = value;
        self
    }

    /// Sets the critical threshold.
    #[must_use]
    pub const fn with_critical_threshold(mut self, value: Duration) -> Self {
        self.critical_threshold = value;
        self
    }

    /// Sets the hard deadline.
    #[must_use]
    pub const fn with_hard_deadline(mut self, value: Duration) -> Self {
        self.hard_deadline = value;
        self
    }

    /// Sets the default nominal heartbeat interval.
    #[must_use]
    pub const fn with_nominal_interval(mut self, value: Duration) -> Self {
        self.nominal_interval = value;
        self
    }

    /// Enables or disables marketplace cross-checks.
    #[must_use]
    pub const fn with_marketplace_check_enabled(mut self, value: bool) -> Self {
        self.marketplace_check_enabled = value;
        self
    }

    /// Enables or disables out-of-band abandonment declaration.
    #[must_use]
    pub const fn with_auto_declare_abandoned(mut self, value: bool) -> Self {
        self.auto_declare_abandoned = value;
        self
    }

    /// Sets the EVM JSON-RPC endpoint.
    #[must_use]
    pub fn with_rpc_endpoint(mut self, value: impl Into<String>) -> Self {
        self.rpc_endpoint = value.into();
        self
    }

    /// Sets the agent factory contract address.
    #[must_use]
    pub fn with_factory_address(mut self, value: impl Into<String>) -> Self {
        self.factory_address = value.into();
        self
    }

    /// Sets the durable report journal path.
    #[must_use]
    pub fn with_report_store_path(mut self, value: impl Into<String>) -> Self {
        self.report_store_path = Some(value.into());
        self
    }

    /// Sets the marketplace API endpoint.
    #[must_use]
    pub fn with_marketplace_endpoint(mut self, value: impl Into<String>) -> Self {
        self.marketplace_endpoint = value.into();
        self
    }

    /// Sets the ceiling on concurrent RPC connections.
    #[must_use]
    pub const fn with_max_rpc_connections(mut self, value: usize) -> Self {
        self.max_rpc_connections = value;
        self
    }
}

fn read_u64(key: &str) -> MonitorResult<Option<u64>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|err| MonitorError::invalid_input(format!("{key}={raw}: {err}"))),
        Err(_) => Ok(None),
    }
}

fn read_bool(key: &str) -> MonitorResult<Option<bool>> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            other => Err(MonitorError::invalid_input(format!(
                "{key}={other}: expected a boolean"
            ))),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        MonitorConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let config = MonitorConfig::default()
            .with_warning_threshold(Duration::from_secs(3600))
            .with_critical_threshold(Duration::from_secs(7200));
        let err = config.validate().expect_err("inverted thresholds");
        assert!(matches!(err, MonitorError::InvalidInput { .. }));
    }

    #[test]
    fn rejects_zero_workers() {
        let err = MonitorConfig::default()
            .with_worker_count(0)
            .validate()
            .expect_err("zero workers");
        assert!(matches!(err, MonitorError::InvalidInput { .. }));
    }

    #[test]
    fn queue_capacity_tracks_worker_count() {
        let config = MonitorConfig::default().with_worker_count(4);
        assert_eq!(config.queue_capacity(), 16);
    }
}
