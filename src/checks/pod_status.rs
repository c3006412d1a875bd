use crate::controller::{CheckOutcome, Checker};
use crate::server::ShutdownSignal;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use std::time::Duration;

pub const POD_STATUS_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Fails while any pod in the namespace is outside Running or Succeeded
pub struct PodStatusCheck {
    name: String,
    namespace: String,
    api: Api<Pod>,
}

impl PodStatusCheck {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            name: format!("pod-status-{}", namespace),
            namespace: namespace.to_string(),
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl Checker for PodStatusCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        POD_STATUS_INTERVAL
    }

    async fn run(&self, _cancel: ShutdownSignal) -> CheckOutcome {
        match self.api.list(&ListParams::default()).await {
            Ok(list) => CheckOutcome::from_errors(unhealthy_pods(&self.namespace, &list.items)),
            Err(e) => CheckOutcome::failed(vec![format!(
                "failed to list pods in namespace {}: {}",
                self.namespace, e
            )]),
        }
    }
}

pub fn unhealthy_pods(namespace: &str, pods: &[Pod]) -> Vec<String> {
    pods.iter()
        .filter_map(|pod| {
            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .unwrap_or("Unknown");
            if matches!(phase, "Running" | "Succeeded") {
                return None;
            }
            let name = pod.metadata.name.as_deref().unwrap_or("<unnamed>");
            Some(format!(
                "pod {} in namespace {} is in phase {}",
                name, namespace, phase
            ))
        })
        .collect()
}
