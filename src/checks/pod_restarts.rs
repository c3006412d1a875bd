use crate::controller::{CheckOutcome, Checker};
use crate::server::ShutdownSignal;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub const POD_RESTARTS_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Restarts between two runs at or above which the check fails
pub const MAX_RESTARTS: i32 = 5;

/// Restart count observed for one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartSample {
    pub pod: String,
    pub container: String,
    pub restarts: i32,
}

/// Watches container restart counts in one namespace
///
/// The first run only records a baseline. Later runs fail for every
/// container that restarted `MAX_RESTARTS` times or more since the
/// previous run.
pub struct PodRestartsCheck {
    name: String,
    namespace: String,
    api: Api<Pod>,
    previous: Mutex<Option<HashMap<(String, String), i32>>>,
}

impl PodRestartsCheck {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            name: format!("pod-restarts-{}", namespace),
            namespace: namespace.to_string(),
            api: Api::namespaced(client, namespace),
            previous: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Checker for PodRestartsCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        POD_RESTARTS_INTERVAL
    }

    async fn run(&self, _cancel: ShutdownSignal) -> CheckOutcome {
        let pods = match self.api.list(&ListParams::default()).await {
            Ok(list) => list.items,
            Err(e) => {
                return CheckOutcome::failed(vec![format!(
                    "failed to list pods in namespace {}: {}",
                    self.namespace, e
                )])
            }
        };

        let samples = restart_samples(&pods);
        let mut previous = match self.previous.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let errors = match previous.as_ref() {
            Some(baseline) => excessive_restarts(&self.namespace, baseline, &samples),
            None => Vec::new(),
        };
        *previous = Some(
            samples
                .into_iter()
                .map(|s| ((s.pod, s.container), s.restarts))
                .collect(),
        );

        CheckOutcome::from_errors(errors)
    }
}

/// Flatten container statuses of the given pods
pub fn restart_samples(pods: &[Pod]) -> Vec<RestartSample> {
    let mut samples = Vec::new();
    for pod in pods {
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let statuses = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_deref())
            .unwrap_or_default();
        for status in statuses {
            samples.push(RestartSample {
                pod: pod_name.clone(),
                container: status.name.clone(),
                restarts: status.restart_count,
            });
        }
    }
    samples
}

/// Containers that restarted at least `MAX_RESTARTS` times since `baseline`
///
/// Containers missing from the baseline count from zero. A count lower
/// than the baseline means the container was recreated, so the new count
/// is taken as is.
pub fn excessive_restarts(
    namespace: &str,
    baseline: &HashMap<(String, String), i32>,
    samples: &[RestartSample],
) -> Vec<String> {
    samples
        .iter()
        .filter_map(|sample| {
            let before = baseline
                .get(&(sample.pod.clone(), sample.container.clone()))
                .copied()
                .unwrap_or(0);
            let delta = if sample.restarts >= before {
                sample.restarts - before
            } else {
                sample.restarts
            };
            (delta >= MAX_RESTARTS).then(|| {
                format!(
                    "{} restarts detected in namespace {}: pod {} container {}",
                    delta, namespace, sample.pod, sample.container
                )
            })
        })
        .collect()
}
