//! Route handlers for the query surface.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::Router;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Json, Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use vigil_monitor::TrackedAgent;
use vigil_primitives::{
    AgentAddress, AgentSnapshot, DeploymentHandle, HealthLevel, HeartbeatStatus, MarketplaceState,
    MissingReport, MonitorError, ReportFilter, ReportStats, Severity,
};

use crate::envelope::{Envelope, ErrorCode, Pagination, failure};
use crate::state::ApiState;
use crate::ws;

/// Builds the API router.
#[must_use]
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/agents", get(list_agents))
        .route("/agents/:address", get(agent_detail))
        .route("/agents/:address/decisions", get(agent_decisions))
        .route("/agents/:address/stats", get(agent_stats))
        .route("/overview", get(overview))
        .route("/creators/:address/stats", get(creator_stats))
        .route("/missing-reports", get(list_reports))
        .route("/missing-reports-stats", get(report_stats))
        .route("/missing-reports/:id", get(get_report))
        .route("/missing-reports/:id/acknowledge", post(acknowledge_report))
        .route("/missing-reports/:id/resolve", post(resolve_report))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn rate_limit(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |info| info.0.ip());
    if !state.inner.limiter.check(client) {
        return failure(ErrorCode::RateLimited, "request budget exceeded");
    }
    next.run(request).await
}

fn parse_address(raw: &str) -> Result<AgentAddress, Response> {
    raw.parse::<AgentAddress>()
        .map_err(|err| failure(ErrorCode::InvalidAddress, err.to_string()))
}

fn map_store_err(err: &MonitorError, what: &str) -> Response {
    match err {
        MonitorError::NotFound { .. } => failure(ErrorCode::ReportNotFound, format!("{what} not found")),
        other => {
            warn!(%other, what, "store operation failed");
            failure(ErrorCode::Internal, format!("{what} unavailable"))
        }
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AgentListQuery {
    status: Option<String>,
    creator: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentListItem {
    address: AgentAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    creator: Option<AgentAddress>,
    alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<HealthLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_heartbeat_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heartbeat_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    balance: Option<u128>,
    partial: bool,
}

impl AgentListItem {
    fn hydrated(entry: &TrackedAgent, snapshot: &AgentSnapshot) -> Self {
        Self {
            address: entry.address,
            creator: entry.creator,
            alive: snapshot.alive,
            level: entry.last_level,
            last_heartbeat_at: Some(snapshot.last_heartbeat_at),
            heartbeat_count: Some(snapshot.heartbeat_count),
            balance: Some(snapshot.balance),
            partial: false,
        }
    }

    fn degraded(entry: &TrackedAgent) -> Self {
        Self {
            address: entry.address,
            creator: entry.creator,
            alive: !entry.dead,
            level: entry.last_level,
            last_heartbeat_at: None,
            heartbeat_count: entry.last_heartbeat_count,
            balance: None,
            partial: true,
        }
    }
}

async fn list_agents(
    State(state): State<ApiState>,
    Query(query): Query<AgentListQuery>,
) -> Response {
    let creator = match &query.creator {
        Some(raw) => match parse_address(raw) {
            Ok(address) => Some(address),
            Err(response) => return response,
        },
        None => None,
    };
    let mut entries = state.inner.tracker.all().await;
    match query.status.as_deref() {
        None | Some("all") => {}
        Some("alive") => entries.retain(|entry| !entry.dead),
        Some("dead") => entries.retain(|entry| entry.dead),
        Some(other) => {
            return failure(
                ErrorCode::InvalidInput,
                format!("unknown status filter `{other}`"),
            );
        }
    }
    if let Some(creator) = creator {
        entries.retain(|entry| entry.creator == Some(creator));
    }
    entries.sort_by_key(|entry| entry.address);

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let total = entries.len();

    let mut items = Vec::new();
    for entry in entries.into_iter().skip((page - 1) * limit).take(limit) {
        match state.inner.chain.snapshot(entry.address).await {
            Ok(Some(snapshot)) => items.push(AgentListItem::hydrated(&entry, &snapshot)),
            Ok(None) | Err(_) => items.push(AgentListItem::degraded(&entry)),
        }
    }
    Envelope::ok_paged(items, Pagination::new(page, limit, total)).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentDetail {
    address: AgentAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    creator: Option<AgentAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<AgentSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heartbeat_status: Option<HeartbeatStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deployment: Option<DeploymentHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    open_report: Option<MissingReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    runway_days: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host_healthy: Option<bool>,
    partial: bool,
}

async fn agent_detail(State(state): State<ApiState>, Path(address): Path<String>) -> Response {
    let address = match parse_address(&address) {
        Ok(address) => address,
        Err(response) => return response,
    };
    let entry = state.inner.tracker.entry(address).await;
    let deployment = state.inner.registry.get(address).await;
    let open_report = state.inner.store.open_for_agent(address).await.unwrap_or(None);

    match state.inner.chain.snapshot(address).await {
        Ok(Some(snapshot)) => {
            let nominal = entry
                .as_ref()
                .map_or(state.inner.config.nominal_interval(), |e| e.nominal_interval);
            let mut partial = false;
            let mut host_healthy = None;
            let marketplace_state = match (&deployment, &state.inner.workload) {
                (Some(handle), Some(workload)) => {
                    match workload.deployment_status(handle.sequence_id, &handle.owner).await {
                        Ok(status) => {
                            if let Some(endpoint) = &status.host_endpoint {
                                host_healthy = Some(workload.health_probe(endpoint).await);
                            }
                            status.state
                        }
                        Err(_) => {
                            partial = true;
                            MarketplaceState::Unknown
                        }
                    }
                }
                _ => MarketplaceState::Unknown,
            };
            let status = HeartbeatStatus::derive(
                &snapshot,
                nominal,
                state.inner.config.hard_deadline(),
                state.inner.clock.epoch_secs(),
                marketplace_state,
            );
            Envelope::ok(AgentDetail {
                address,
                creator: entry.and_then(|e| e.creator),
                runway_days: snapshot.runway_days(),
                snapshot: Some(snapshot),
                heartbeat_status: Some(status),
                deployment,
                open_report,
                host_healthy,
                partial,
            })
            .into_response()
        }
        Ok(None) => match entry {
            Some(entry) => Envelope::ok(AgentDetail {
                address,
                creator: entry.creator,
                snapshot: None,
                heartbeat_status: None,
                deployment,
                open_report,
                runway_days: None,
                host_healthy: None,
                partial: true,
            })
            .into_response(),
            None => failure(ErrorCode::AgentNotFound, format!("agent {address} not found")),
        },
        Err(err) => match entry {
            Some(entry) => {
                warn!(agent = %address, %err, "detail snapshot degraded");
                Envelope::ok(AgentDetail {
                    address,
                    creator: entry.creator,
                    snapshot: None,
                    heartbeat_status: None,
                    deployment,
                    open_report,
                    runway_days: None,
                    host_healthy: None,
                    partial: true,
                })
                .into_response()
            }
            None => failure(ErrorCode::Internal, "chain unavailable"),
        },
    }
}

#[derive(Debug, Deserialize)]
struct DecisionsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DecisionItem {
    decision_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    heartbeat_count: Option<u64>,
    timestamp: u64,
    block_number: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DecisionList {
    items: Vec<DecisionItem>,
    partial: bool,
}

async fn agent_decisions(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Query(query): Query<DecisionsQuery>,
) -> Response {
    let address = match parse_address(&address) {
        Ok(address) => address,
        Err(response) => return response,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    match state.inner.chain.decisions(address, limit).await {
        Ok(records) => {
            let items = records
                .into_iter()
                .map(|record| DecisionItem {
                    decision_ref: record.decision_ref.to_string(),
                    heartbeat_count: record.heartbeat_count,
                    timestamp: record.timestamp,
                    block_number: record.block_number,
                })
                .collect();
            Envelope::ok(DecisionList {
                items,
                partial: false,
            })
            .into_response()
        }
        Err(err) => {
            warn!(agent = %address, %err, "decision scan degraded");
            Envelope::ok(DecisionList {
                items: Vec::new(),
                partial: true,
            })
            .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentStats {
    address: AgentAddress,
    heartbeat_count: u64,
    uptime_secs: u64,
    balance: u128,
    cumulative_cost: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    runway_days: Option<u128>,
    reports_total: usize,
    reports_open: usize,
    partial: bool,
}

async fn agent_stats(State(state): State<ApiState>, Path(address): Path<String>) -> Response {
    let address = match parse_address(&address) {
        Ok(address) => address,
        Err(response) => return response,
    };
    let reports = state.inner.store.list_by_agent(address).await.unwrap_or_default();
    let reports_total = reports.len();
    let reports_open = reports.iter().filter(|r| r.is_open()).count();

    match state.inner.chain.snapshot(address).await {
        Ok(Some(snapshot)) => {
            let now = state.inner.clock.epoch_secs();
            Envelope::ok(AgentStats {
                address,
                heartbeat_count: snapshot.heartbeat_count,
                uptime_secs: now.saturating_sub(snapshot.birth_time),
                balance: snapshot.balance,
                cumulative_cost: snapshot.cumulative_cost,
                runway_days: snapshot.runway_days(),
                reports_total,
                reports_open,
                partial: false,
            })
            .into_response()
        }
        Ok(None) => {
            if state.inner.tracker.entry(address).await.is_none() {
                return failure(ErrorCode::AgentNotFound, format!("agent {address} not found"));
            }
            degraded_stats(address, reports_total, reports_open)
        }
        Err(_) => degraded_stats(address, reports_total, reports_open),
    }
}

fn degraded_stats(address: AgentAddress, reports_total: usize, reports_open: usize) -> Response {
    Envelope::ok(AgentStats {
        address,
        heartbeat_count: 0,
        uptime_secs: 0,
        balance: 0,
        cumulative_cost: 0,
        runway_days: None,
        reports_total,
        reports_open,
        partial: true,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// Rollups
// ---------------------------------------------------------------------------

/// Platform-wide counters served by `/overview`, memoized for one tick.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlatformOverview {
    total_agents: usize,
    alive_agents: usize,
    dead_agents: usize,
    reports: ReportStats,
    hub_subscribers: usize,
    dropped_subscribers: u64,
    scheduler_overflow: u64,
    checks_completed: u64,
    partial: bool,
}

async fn overview(State(state): State<ApiState>) -> Response {
    let now = state.inner.clock.epoch_secs();
    let tick = state.inner.config.tick_interval().as_secs().max(1);
    {
        let cache = state.inner.overview_cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some((at, cached)) = cache.as_ref()
            && now < at + tick
        {
            return Envelope::ok(cached.clone()).into_response();
        }
    }

    let (reports, partial) = match state.inner.store.stats().await {
        Ok(stats) => (stats, false),
        Err(err) => {
            warn!(%err, "report stats degraded");
            (ReportStats::default(), true)
        }
    };
    let payload = PlatformOverview {
        total_agents: state.inner.tracker.len().await,
        alive_agents: state.inner.tracker.alive_count().await,
        dead_agents: state.inner.tracker.dead_count().await,
        reports,
        hub_subscribers: state.inner.hub.subscriber_count().await,
        dropped_subscribers: state.inner.hub.dropped_subscribers(),
        scheduler_overflow: state.inner.scheduler_metrics.overflow(),
        checks_completed: state.inner.scheduler_metrics.checks(),
        partial,
    };
    *state.inner.overview_cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner) =
        Some((now, payload.clone()));
    Envelope::ok(payload).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatorStats {
    creator: AgentAddress,
    total_agents: usize,
    alive_agents: usize,
    dead_agents: usize,
    reports_open: usize,
}

async fn creator_stats(State(state): State<ApiState>, Path(address): Path<String>) -> Response {
    let creator = match parse_address(&address) {
        Ok(address) => address,
        Err(response) => return response,
    };
    let entries: Vec<TrackedAgent> = state
        .inner
        .tracker
        .all()
        .await
        .into_iter()
        .filter(|entry| entry.creator == Some(creator))
        .collect();
    let mut reports_open = 0;
    for entry in &entries {
        if let Ok(Some(_)) = state.inner.store.open_for_agent(entry.address).await {
            reports_open += 1;
        }
    }
    Envelope::ok(CreatorStats {
        creator,
        total_agents: entries.len(),
        alive_agents: entries.iter().filter(|e| !e.dead).count(),
        dead_agents: entries.iter().filter(|e| e.dead).count(),
        reports_open,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// Missing reports
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ReportListQuery {
    severity: Option<String>,
    resolved: Option<String>,
    acknowledged: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
}

fn parse_severity(raw: &str) -> Result<Severity, Response> {
    match raw {
        "warning" => Ok(Severity::Warning),
        "critical" => Ok(Severity::Critical),
        "abandoned" => Ok(Severity::Abandoned),
        other => Err(failure(
            ErrorCode::InvalidInput,
            format!("unknown severity `{other}`"),
        )),
    }
}

fn parse_flag(raw: &str, name: &str) -> Result<bool, Response> {
    match raw {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(failure(
            ErrorCode::InvalidInput,
            format!("{name} must be a boolean, got `{other}`"),
        )),
    }
}

async fn list_reports(
    State(state): State<ApiState>,
    Query(query): Query<ReportListQuery>,
) -> Response {
    let severity = match query.severity.as_deref() {
        Some(raw) => match parse_severity(raw) {
            Ok(severity) => Some(severity),
            Err(response) => return response,
        },
        None => None,
    };
    let resolved = match query.resolved.as_deref() {
        Some(raw) => match parse_flag(raw, "resolved") {
            Ok(flag) => Some(flag),
            Err(response) => return response,
        },
        None => None,
    };
    let acknowledged = match query.acknowledged.as_deref() {
        Some(raw) => match parse_flag(raw, "acknowledged") {
            Ok(flag) => Some(flag),
            Err(response) => return response,
        },
        None => None,
    };
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let filter = ReportFilter {
        severity,
        resolved,
        acknowledged,
        limit,
        offset: (page - 1) * limit,
    };
    match state.inner.store.list(&filter).await {
        Ok(page_result) => Envelope::ok_paged(
            page_result.reports,
            Pagination::new(page, limit, page_result.total),
        )
        .into_response(),
        Err(err) => map_store_err(&err, "report listing"),
    }
}

async fn get_report(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.inner.store.get(&id).await {
        Ok(Some(report)) => Envelope::ok(report).into_response(),
        Ok(None) => failure(ErrorCode::ReportNotFound, format!("report {id} not found")),
        Err(err) => map_store_err(&err, "report"),
    }
}

async fn report_stats(State(state): State<ApiState>) -> Response {
    match state.inner.store.stats().await {
        Ok(stats) => Envelope::ok(stats).into_response(),
        Err(err) => map_store_err(&err, "report stats"),
    }
}

fn required_field<'a>(body: Option<&'a Json<Value>>, field: &str) -> Result<&'a str, Response> {
    body.and_then(|Json(value)| value.get(field))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| failure(ErrorCode::InvalidInput, format!("{field} is required")))
}

async fn acknowledge_report(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<Value>>,
) -> Response {
    let actor = match required_field(body.as_ref(), "actor") {
        Ok(actor) => actor.to_owned(),
        Err(response) => return response,
    };
    match state.inner.store.acknowledge(&id, &actor).await {
        Ok(report) => Envelope::ok(report).into_response(),
        Err(err) => map_store_err(&err, "report"),
    }
}

async fn resolve_report(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<Value>>,
) -> Response {
    let resolution = match required_field(body.as_ref(), "resolution") {
        Ok(resolution) => resolution.to_owned(),
        Err(response) => return response,
    };
    match state.inner.store.resolve(&id, &resolution).await {
        Ok(report) => Envelope::ok(report).into_response(),
        Err(err) => map_store_err(&err, "report"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use vigil_chain::{ChainEvents, ChainGateway, CreationEvent, DecisionRecord, HeartbeatEvent};
    use vigil_hub::EventHub;
    use vigil_monitor::{AgentTracker, SchedulerMetrics};
    use vigil_primitives::{
        AgentSnapshot, Clock, DecisionRef, GenomeRef, ManualClock, MonitorConfig, MonitorResult,
        ReportDraft, Severity,
    };
    use vigil_store::{DeploymentRegistry, MemoryReportStore, RegistryConfig, ReportStore};

    struct MockChain {
        snapshots: HashMap<AgentAddress, AgentSnapshot>,
    }

    #[async_trait]
    impl ChainGateway for MockChain {
        async fn snapshot(&self, agent: AgentAddress) -> MonitorResult<Option<AgentSnapshot>> {
            Ok(self.snapshots.get(&agent).cloned())
        }

        async fn enumerate(&self) -> MonitorResult<Vec<AgentAddress>> {
            Ok(self.snapshots.keys().copied().collect())
        }

        async fn nominal_interval(&self, _agent: AgentAddress) -> MonitorResult<Option<Duration>> {
            Ok(None)
        }

        async fn creator(&self, _agent: AgentAddress) -> MonitorResult<Option<AgentAddress>> {
            Ok(None)
        }

        async fn decisions(
            &self,
            _agent: AgentAddress,
            _limit: usize,
        ) -> MonitorResult<Vec<DecisionRecord>> {
            Ok(Vec::new())
        }

        async fn latest_block(&self) -> MonitorResult<u64> {
            Ok(0)
        }

        async fn creations_since(
            &self,
            from_block: u64,
        ) -> MonitorResult<ChainEvents<CreationEvent>> {
            Ok(ChainEvents {
                events: Vec::new(),
                next_from_block: from_block,
            })
        }

        async fn heartbeats_since(
            &self,
            from_block: u64,
            _agents: &[AgentAddress],
        ) -> MonitorResult<ChainEvents<HeartbeatEvent>> {
            Ok(ChainEvents {
                events: Vec::new(),
                next_from_block: from_block,
            })
        }
    }

    fn addr(n: u8) -> AgentAddress {
        let mut bytes = [0_u8; 20];
        bytes[19] = n;
        AgentAddress::from_inner(bytes.into())
    }

    fn snapshot(last_heartbeat_at: u64) -> AgentSnapshot {
        AgentSnapshot {
            genome_ref: GenomeRef::default(),
            birth_time: 1_000,
            last_heartbeat_at,
            heartbeat_count: 3,
            alive: true,
            balance: 700_000_000,
            last_decision_ref: DecisionRef::default(),
            cumulative_cost: 10_000_000,
        }
    }

    struct TestApi {
        router: Router,
        store: Arc<MemoryReportStore>,
        tracker: Arc<AgentTracker>,
    }

    async fn api() -> TestApi {
        let clock = Arc::new(ManualClock::at_secs(100_000));
        let store = Arc::new(MemoryReportStore::new(Arc::clone(&clock) as Arc<dyn Clock>));
        let tracker = Arc::new(AgentTracker::new());
        tracker.register(addr(1), Duration::from_secs(21_600), Some(addr(9))).await;
        let chain = MockChain {
            snapshots: HashMap::from([(addr(1), snapshot(99_500))]),
        };
        let registry = Arc::new(DeploymentRegistry::new(
            RegistryConfig::default(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        let state = ApiState::new(
            MonitorConfig::default(),
            clock,
            Arc::new(chain),
            None,
            Arc::clone(&store) as Arc<dyn ReportStore>,
            registry,
            Arc::clone(&tracker),
            Arc::new(EventHub::default()),
            Arc::new(SchedulerMetrics::default()),
            CancellationToken::new(),
        );
        TestApi {
            router: router(state),
            store,
            tracker,
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn lists_agents_with_envelope() {
        let api = api().await;
        let response = api
            .router
            .clone()
            .oneshot(HttpRequest::get("/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"].as_array().unwrap().len(), 1);
        assert_eq!(json["pagination"]["total"], 1);
        assert_eq!(json["data"][0]["partial"], false);
    }

    #[tokio::test]
    async fn rejects_malformed_address() {
        let api = api().await;
        let response = api
            .router
            .clone()
            .oneshot(HttpRequest::get("/agents/0x123").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "INVALID_ADDRESS");
    }

    #[tokio::test]
    async fn unknown_agent_is_404() {
        let api = api().await;
        let uri = format!("/agents/{}", addr(5));
        let response = api
            .router
            .clone()
            .oneshot(HttpRequest::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "AGENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn dead_agent_detail_is_partial_not_404() {
        let api = api().await;
        api.tracker.register(addr(2), Duration::from_secs(21_600), None).await;
        api.tracker.mark_dead(addr(2)).await;
        let uri = format!("/agents/{}", addr(2));
        let response = api
            .router
            .clone()
            .oneshot(HttpRequest::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["partial"], true);
    }

    #[tokio::test]
    async fn acknowledge_and_resolve_flow() {
        let api = api().await;
        let report = api
            .store
            .create(ReportDraft {
                agent_address: addr(1),
                severity: Severity::Warning,
                expected_at: 121_100,
                last_heartbeat_at: 99_500,
                deadline_at: 704_300,
                marketplace_snapshot: None,
            })
            .await
            .unwrap();

        let uri = format!("/missing-reports/{}/acknowledge", report.id);
        let response = api
            .router
            .clone()
            .oneshot(
                HttpRequest::post(&uri)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"actor":"alice"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["acknowledged"], true);
        assert_eq!(json["data"]["acknowledgedBy"], "alice");

        let uri = format!("/missing-reports/{}/resolve", report.id);
        let response = api
            .router
            .clone()
            .oneshot(
                HttpRequest::post(&uri)
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"resolution":"operator intervened"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["resolved"], true);

        // Listing open reports no longer includes it.
        let response = api
            .router
            .clone()
            .oneshot(
                HttpRequest::get("/missing-reports?resolved=false")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["pagination"]["total"], 0);
    }

    #[tokio::test]
    async fn missing_actor_is_invalid_input() {
        let api = api().await;
        let response = api
            .router
            .clone()
            .oneshot(
                HttpRequest::post("/missing-reports/nope/acknowledge")
                    .header("content-type", "application/json")
                    .body(Body::from(r"{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn unknown_report_is_404() {
        let api = api().await;
        let response = api
            .router
            .clone()
            .oneshot(
                HttpRequest::post("/missing-reports/nope/acknowledge")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"actor":"alice"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "REPORT_NOT_FOUND");
    }

    #[tokio::test]
    async fn invalid_severity_filter_is_rejected() {
        let api = api().await;
        let response = api
            .router
            .clone()
            .oneshot(
                HttpRequest::get("/missing-reports?severity=meltdown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn over_budget_clients_get_429() {
        let api = api().await;
        let mut last_status = StatusCode::OK;
        for _ in 0..120 {
            let response = api
                .router
                .clone()
                .oneshot(HttpRequest::get("/overview").body(Body::empty()).unwrap())
                .await
                .unwrap();
            last_status = response.status();
        }
        assert_eq!(last_status, StatusCode::TOO_MANY_REQUESTS);
    }
}
