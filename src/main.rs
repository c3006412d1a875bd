use kube::Client;
use kuberhealthy::checks::build_registry;
use kuberhealthy::config::Config;
use kuberhealthy::controller::{
    ControllerState, InfluxForwarder, KhStateStore, MetricForwarder, Scheduler, StateAggregator,
};
use kuberhealthy::server::{
    create_metrics, run_status_server, shutdown_channel, LeaderConfig, LeadershipMonitor,
    LeadershipOracle, LeaseOracle, ServerState, ShutdownCoordinator, ShutdownOutcome,
    StaticOracle, TerminationSignals,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Default log filter when RUST_LOG is unset
fn default_filter(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Only a graceful exit of the active replica writes its view back
///
/// A standby's view may be older than what the leader already stored.
fn should_flush(outcome: ShutdownOutcome, was_active: bool) -> bool {
    outcome == ShutdownOutcome::Graceful && was_active
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration comes first so KH_DEBUG can pick the log level
    let config = Config::from_env();
    let debug = config.as_ref().map(|c| c.debug).unwrap_or(false);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter(debug))),
        )
        .init();

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    info!(
        instance = %config.instance,
        namespace = %config.namespace,
        listen_address = %config.listen_address,
        "Starting Kuberhealthy"
    );

    // Registered before anything else starts so no signal is lost
    let mut signals = TerminationSignals::register()?;

    // kube and reqwest share rustls; pick the provider once
    let _ = rustls::crypto::ring::default_provider().install_default();

    let metrics = create_metrics()?;
    info!("Prometheus metrics registry initialized");

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to Kubernetes cluster");

    let registry = match build_registry(&config, client.clone()) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!(error = %e, "Failed to register checks");
            return Err(e.into());
        }
    };
    info!(checks = ?registry.names(), "Checks registered");

    let store = Arc::new(KhStateStore::new(client.clone(), &config.namespace));
    let aggregator = StateAggregator::new(store, registry.names());
    match aggregator.sync_from_store().await {
        Ok(restored) => info!(restored, "Restored check state from khstates"),
        Err(e) => warn!(error = %e, "Could not restore check state, starting empty"),
    }

    let state = ControllerState::new();
    let (shutdown_controller, shutdown_signal) = shutdown_channel();

    let oracle: Arc<dyn LeadershipOracle> = if config.force_master {
        warn!("Forced master mode enabled, skipping leader election");
        Arc::new(StaticOracle(true))
    } else {
        let leader_config = LeaderConfig::new(config.instance.clone(), config.namespace.clone());
        info!(
            holder_id = %leader_config.holder_id,
            lease = %leader_config.lease_name,
            "Leader election enabled"
        );
        Arc::new(LeaseOracle::new(client.clone(), leader_config))
    };

    // Status server keeps answering until the process exits
    let server_state = ServerState::new(aggregator.clone(), state.clone(), metrics.clone());
    let listen_address = config.listen_address;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = run_status_server(listen_address, server_state).await {
            error!(error = %e, "Status server failed");
        }
    });

    let monitor = LeadershipMonitor::new(
        oracle,
        state.clone(),
        aggregator.clone(),
        Some(metrics.clone()),
        config.leader_poll_interval,
    );
    let monitor_handle = tokio::spawn(monitor.run(shutdown_signal.clone()));

    let mut forwarders: Vec<Arc<dyn MetricForwarder>> = vec![metrics.clone() as Arc<dyn MetricForwarder>];
    if let Some(influx) = config.influx.clone() {
        info!(url = %influx.url, database = %influx.database, "InfluxDB forwarding enabled");
        forwarders.push(Arc::new(InfluxForwarder::new(influx)));
    }

    let scheduler = Scheduler::new(
        registry,
        aggregator.clone(),
        state.clone(),
        forwarders,
        config.instance.clone(),
    );
    let loop_handles = scheduler.spawn(shutdown_signal);

    let mut coordinator =
        ShutdownCoordinator::new(shutdown_controller, state.clone(), config.grace_period);
    coordinator.track(monitor_handle);
    coordinator.track_all(loop_handles);

    let signal = signals.recv().await;
    // Draining moves the state to ShuttingDown, so sample leadership first
    let was_active = state.is_active();
    info!(signal = signal, was_active, "Initiating graceful shutdown");

    let outcome = coordinator
        .drain(async {
            let again = signals.recv().await;
            warn!(signal = again, "Received second termination signal");
        })
        .await;

    if should_flush(outcome, was_active) {
        aggregator.flush().await;
    }
    server_handle.abort();

    match outcome {
        ShutdownOutcome::Graceful => {
            info!("Kuberhealthy shut down gracefully");
            Ok(())
        }
        other => std::process::exit(other.exit_code()),
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
