pub mod aggregator;
pub mod checker;
pub mod forwarder;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod store;

pub use aggregator::{AggregatedStatus, StateAggregator};
pub use checker::{CheckError, CheckOutcome, CheckResult, Checker, DEFAULT_CHECK_TIMEOUT};
pub use forwarder::{ForwardError, InfluxConfig, InfluxForwarder, MetricForwarder};
pub use registry::{CheckRegistry, RegistryError};
pub use scheduler::{run_check, Scheduler};
pub use state::{ControllerState, Leadership, Lifecycle};
pub use store::{KhStateStore, StateStore, StoreError};
