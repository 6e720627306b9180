//! Vigil control-plane daemon.
//!
//! Exit codes: `0` on normal shutdown, `1` on a fatal configuration
//! error at boot, `2` when the durable report store is unavailable.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use vigil_api::ApiState;
use vigil_chain::{ChainConfig, RpcChainGateway};
use vigil_hub::EventHub;
use vigil_monitor::SupervisorBuilder;
use vigil_primitives::{AgentAddress, Clock, MonitorConfig, SystemClock};
use vigil_store::{
    DeploymentRegistry, JournalReportStore, MemoryReportStore, RegistryConfig, ReportStore,
};
use vigil_workload::{HttpWorkloadGateway, WorkloadConfig, WorkloadGateway};

const EXIT_CONFIG: u8 = 1;
const EXIT_STORAGE: u8 = 2;

/// Command-line overrides; every flag falls back to its `VIGIL_*`
/// environment variable.
#[derive(Debug, Parser)]
#[command(name = "vigild", about = "Liveness control plane for on-chain agents")]
struct Args {
    /// Address the query surface listens on.
    #[arg(long, env = "VIGIL_LISTEN_ADDR", default_value = "0.0.0.0:8420")]
    listen: SocketAddr,

    /// EVM JSON-RPC endpoint.
    #[arg(long, env = "VIGIL_RPC_ENDPOINT")]
    rpc_endpoint: Option<String>,

    /// Agent factory contract address.
    #[arg(long, env = "VIGIL_FACTORY_ADDRESS")]
    factory_address: Option<String>,

    /// Workload marketplace API endpoint.
    #[arg(long, env = "VIGIL_MARKETPLACE_ENDPOINT")]
    marketplace_endpoint: Option<String>,

    /// Durable report journal path; omit for the in-memory store.
    #[arg(long, env = "VIGIL_REPORT_STORE_PATH")]
    report_store_path: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "fatal configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(exit) => exit,
    }
}

fn load_config(args: &Args) -> vigil_primitives::MonitorResult<MonitorConfig> {
    let mut config = MonitorConfig::from_env()?;
    if let Some(endpoint) = &args.rpc_endpoint {
        config = config.with_rpc_endpoint(endpoint);
    }
    if let Some(factory) = &args.factory_address {
        config = config.with_factory_address(factory);
    }
    if let Some(endpoint) = &args.marketplace_endpoint {
        config = config.with_marketplace_endpoint(endpoint);
    }
    if let Some(path) = &args.report_store_path {
        config = config.with_report_store_path(path);
    }
    config.validate()?;
    if config.rpc_endpoint().is_empty() {
        return Err(vigil_primitives::MonitorError::invalid_input(
            "VIGIL_RPC_ENDPOINT is required",
        ));
    }
    config.factory_address().parse::<AgentAddress>()?;
    Ok(config)
}

async fn run(args: Args, config: MonitorConfig) -> Result<(), ExitCode> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let factory: AgentAddress = config
        .factory_address()
        .parse()
        .expect("validated at load time");
    let chain_config = ChainConfig::new(config.rpc_endpoint(), factory)
        .with_connection_cap(config.worker_count(), config.max_rpc_connections())
        .with_rpc_deadline(config.rpc_deadline());
    let chain = match RpcChainGateway::connect(chain_config) {
        Ok(gateway) => Arc::new(gateway),
        Err(err) => {
            error!(%err, "chain gateway configuration rejected");
            return Err(ExitCode::from(EXIT_CONFIG));
        }
    };

    let store: Arc<dyn ReportStore> = match config.report_store_path() {
        Some(path) => match JournalReportStore::open(path, Arc::clone(&clock)).await {
            Ok(store) => Arc::new(store),
            Err(err) => {
                error!(%err, path, "report journal unavailable");
                return Err(ExitCode::from(EXIT_STORAGE));
            }
        },
        None => {
            info!("no report journal configured; incidents will not survive restarts");
            Arc::new(MemoryReportStore::new(Arc::clone(&clock)))
        }
    };

    let registry = Arc::new(DeploymentRegistry::new(
        RegistryConfig::default(),
        Arc::clone(&clock),
    ));
    let hub = Arc::new(EventHub::default());
    let workload: Option<Arc<dyn WorkloadGateway>> = if config.marketplace_endpoint().is_empty() {
        None
    } else {
        Some(Arc::new(HttpWorkloadGateway::new(
            WorkloadConfig::new(config.marketplace_endpoint(), config.workload_deadline()),
            Arc::clone(&clock),
        )))
    };

    let mut builder = SupervisorBuilder::new(config.clone(), Arc::clone(&clock))
        .chain(chain.clone())
        .store(Arc::clone(&store))
        .registry(Arc::clone(&registry))
        .hub(Arc::clone(&hub));
    if let Some(workload) = &workload {
        builder = builder.workload(Arc::clone(workload));
    }
    let mut supervisor = match builder.build() {
        Ok(supervisor) => supervisor,
        Err(err) => {
            error!(%err, "supervisor construction failed");
            return Err(ExitCode::from(EXIT_CONFIG));
        }
    };

    if let Err(err) = supervisor.bootstrap().await {
        // A cold boot without the initial set is survivable; creation
        // events and later ticks will fill the registry.
        error!(%err, "bootstrap enumeration failed; continuing with an empty registry");
    }
    supervisor.start();

    let state = ApiState::new(
        config,
        Arc::clone(&clock),
        chain,
        workload,
        store,
        registry,
        supervisor.tracker(),
        hub,
        supervisor.scheduler_metrics(),
        supervisor.cancellation_token(),
    );
    let router = vigil_api::router(state);

    let listener = match tokio::net::TcpListener::bind(args.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, listen = %args.listen, "could not bind the query surface");
            return Err(ExitCode::from(EXIT_CONFIG));
        }
    };
    info!(listen = %args.listen, "query surface listening");

    let cancel = supervisor.cancellation_token();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let cancel = cancel.clone();
        async move { cancel.cancelled().await }
    });

    let server = tokio::spawn(async move { server.await });

    shutdown_signal().await;
    info!("shutdown signal received");
    supervisor.shutdown().await;
    let _ = server.await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
