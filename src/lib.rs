//! Kuberhealthy: in-cluster synthetic health checking for Kubernetes
//!
//! - `controller` - check registry, scheduler, aggregation, lifecycle state
//! - `server` - status HTTP server, leader election, graceful shutdown
//! - `checks` - the built-in cluster checks
//! - `crd` - the `KuberhealthyState` custom resource used for durable state

pub mod checks;
pub mod config;
pub mod controller;
pub mod crd;
pub mod server;
