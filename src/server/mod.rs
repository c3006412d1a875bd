//! HTTP status server, leader election and graceful shutdown
//!
//! Provides:
//! - `/` and `/checks/{name}` - aggregated cluster health
//! - `/healthz`, `/readyz` - Kubernetes probes
//! - `/metrics` - Prometheus metrics
//!
//! Also provides the leadership monitor and the shutdown coordinator.

pub mod leader;
pub mod metrics;
pub mod shutdown;
mod status;

pub use leader::{
    LeaderConfig, LeaderError, LeadershipMonitor, LeadershipOracle, LeaseOracle, StaticOracle,
};
pub use metrics::{create_metrics, ControllerMetrics, SharedMetrics};
pub use shutdown::{
    shutdown_channel, ShutdownController, ShutdownCoordinator, ShutdownOutcome, ShutdownSignal,
    TerminationSignals, DEFAULT_GRACE_PERIOD,
};
pub use status::{build_router, run_status_server, CheckDetail, ServerState, StatusReport};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "status_test.rs"]
mod status_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "leader_test.rs"]
mod leader_tests;
