//! Built-in checks
//!
//! `build_registry` turns the startup configuration into the fixed set of
//! checkers the scheduler runs.

pub mod component_status;
pub mod daemonset;
pub mod dns;
pub mod pod_restarts;
pub mod pod_status;

pub use component_status::ComponentStatusCheck;
pub use daemonset::DaemonSetCheck;
pub use dns::DnsStatusCheck;
pub use pod_restarts::PodRestartsCheck;
pub use pod_status::PodStatusCheck;

use crate::config::Config;
use crate::controller::{CheckRegistry, Checker, RegistryError};
use kube::Client;
use std::sync::Arc;

/// Register every check the configuration enables
///
/// Per-namespace checks are created once per entry in
/// `pod_check_namespaces`; a namespace listed twice is a duplicate name.
pub fn build_registry(config: &Config, client: Client) -> Result<CheckRegistry, RegistryError> {
    let mut registry = CheckRegistry::new();
    for checker in enabled_checks(config, client) {
        registry.register(checker)?;
    }
    Ok(registry)
}

fn enabled_checks(config: &Config, client: Client) -> Vec<Arc<dyn Checker>> {
    let mut checks: Vec<Arc<dyn Checker>> = Vec::new();
    let enabled = &config.enabled;

    if enabled.component_status {
        checks.push(Arc::new(ComponentStatusCheck::new(client.clone())));
    }
    if enabled.daemonset {
        checks.push(Arc::new(DaemonSetCheck::new(
            client.clone(),
            &config.namespace,
            &config.pause_image,
            &config.instance,
        )));
    }
    if enabled.pod_restarts {
        for namespace in &config.pod_check_namespaces {
            checks.push(Arc::new(PodRestartsCheck::new(client.clone(), namespace)));
        }
    }
    if enabled.pod_status {
        for namespace in &config.pod_check_namespaces {
            checks.push(Arc::new(PodStatusCheck::new(client.clone(), namespace)));
        }
    }
    if enabled.dns_status {
        checks.push(Arc::new(DnsStatusCheck::new(config.dns_endpoints.clone())));
    }

    checks
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[path = "mod_test.rs"]
mod tests;
