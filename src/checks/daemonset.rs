//! Daemon set lifecycle check
//!
//! Each run deploys a pause-image daemon set that tolerates every taint,
//! waits for a ready pod on every scheduled node, then deletes it again
//! and waits for the deletion to finish.

use crate::controller::{CheckError, CheckOutcome, Checker};
use crate::server::ShutdownSignal;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::runtime::wait::{await_condition, conditions};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DAEMONSET_CHECK_NAME: &str = "daemonset";
pub const DAEMONSET_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const DAEMONSET_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Label carried by every daemon set this check creates
pub const CHECK_LABEL: &str = "kuberhealthy-check";

/// Label naming the controller instance that created the daemon set
pub const INSTANCE_LABEL: &str = "kuberhealthy-instance";

/// Kubernetes limit on label values
const MAX_LABEL_VALUE_LEN: usize = 63;

pub struct DaemonSetCheck {
    api: Api<DaemonSet>,
    namespace: String,
    image: String,
    instance: String,
    phase: Mutex<String>,
}

impl DaemonSetCheck {
    /// `instance` scopes cleanup to daemon sets this replica created
    pub fn new(client: Client, namespace: &str, image: &str, instance: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            image: image.to_string(),
            instance: instance_label_value(instance),
            phase: Mutex::new("idle".to_string()),
        }
    }

    fn set_phase(&self, phase: impl Into<String>) {
        let phase = phase.into();
        debug!(check = DAEMONSET_CHECK_NAME, phase = %phase, "Daemon set check progress");
        match self.phase.lock() {
            Ok(mut guard) => *guard = phase,
            Err(poisoned) => *poisoned.into_inner() = phase,
        }
    }

    /// Ok(false) when shutdown interrupted the wait for readiness
    async fn deploy_and_verify(&self, name: &str, cancel: &mut ShutdownSignal) -> Result<bool, String> {
        self.set_phase(format!("creating daemon set {}", name));
        self.api
            .create(
                &PostParams::default(),
                &pause_daemonset(name, &self.image, &self.instance),
            )
            .await
            .map_err(|e| format!("failed to create daemon set {}: {}", name, e))?;

        self.set_phase(format!("waiting for daemon set {} pods to become ready", name));
        tokio::select! {
            biased;
            _ = cancel.wait() => {
                info!(daemonset = %name, "Daemon set rollout wait interrupted by shutdown");
                Ok(false)
            }
            ready = await_condition(self.api.clone(), name, |ds: Option<&DaemonSet>| {
                ds.map(rollout_complete).unwrap_or(false)
            }) => ready
                .map(|_| true)
                .map_err(|e| format!("failed waiting for daemon set {}: {}", name, e)),
        }
    }

    /// Delete every daemon set an earlier run of this instance left behind
    async fn remove_leftovers(&self) -> Result<(), CheckError> {
        let selector = leftover_selector(&self.instance);
        let leftovers = self.api.list(&ListParams::default().labels(&selector)).await?;
        if leftovers.items.is_empty() {
            return Ok(());
        }

        info!(
            namespace = %self.namespace,
            count = leftovers.items.len(),
            "Removing leftover daemon set check resources"
        );
        let mut failures = Vec::new();
        for ds in leftovers.items {
            let Some(name) = ds.metadata.name else {
                continue;
            };
            if let Err(e) = self.api.delete(&name, &DeleteParams::default()).await {
                warn!(daemonset = %name, error = %e, "Failed to remove daemon set");
                failures.push(name);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CheckError::Cleanup(format!(
                "could not delete daemon sets: {}",
                failures.join(", ")
            )))
        }
    }

    async fn remove(&self, name: &str) -> Result<(), String> {
        self.set_phase(format!("removing daemon set {}", name));
        let deleted = match self.api.delete(name, &DeleteParams::foreground()).await {
            Ok(deleted) => deleted,
            // Never created, or already gone
            Err(kube::Error::Api(err)) if err.code == 404 => return Ok(()),
            Err(e) => return Err(format!("failed to delete daemon set {}: {}", name, e)),
        };

        let uid = deleted.left().and_then(|ds| ds.metadata.uid).unwrap_or_default();
        if uid.is_empty() {
            return Ok(());
        }
        await_condition(self.api.clone(), name, conditions::is_deleted(&uid))
            .await
            .map(|_| ())
            .map_err(|e| format!("failed waiting for daemon set {} removal: {}", name, e))
    }
}

#[async_trait]
impl Checker for DaemonSetCheck {
    fn name(&self) -> &str {
        DAEMONSET_CHECK_NAME
    }

    fn interval(&self) -> Duration {
        DAEMONSET_INTERVAL
    }

    fn timeout(&self) -> Duration {
        DAEMONSET_TIMEOUT
    }

    async fn run(&self, cancel: ShutdownSignal) -> CheckOutcome {
        let mut cancel = cancel;
        let name = run_daemonset_name(chrono::Utc::now().timestamp());

        // A run cut off by its timeout never reaches its own removal step
        if let Err(e) = self.remove_leftovers().await {
            warn!(error = %e, "Could not clean up earlier daemon set check resources");
        }

        let mut errors = Vec::new();
        let mut interrupted = false;
        match self.deploy_and_verify(&name, &mut cancel).await {
            Ok(ready) => interrupted = !ready,
            Err(e) => errors.push(e),
        }
        // Always attempt removal, even after a failed rollout
        if let Err(e) = self.remove(&name).await {
            errors.push(e);
        }
        self.set_phase("idle");

        if interrupted {
            return CheckOutcome::cancelled();
        }
        CheckOutcome::from_errors(errors)
    }

    fn current_status(&self) -> Option<String> {
        match self.phase.lock() {
            Ok(guard) => Some(guard.clone()),
            Err(poisoned) => Some(poisoned.into_inner().clone()),
        }
    }

    async fn shutdown(&self) -> Result<(), CheckError> {
        self.remove_leftovers().await
    }
}

/// Unique daemon set name for one run
pub fn run_daemonset_name(unix_seconds: i64) -> String {
    format!("daemonset-check-{}", unix_seconds)
}

/// Instance identity as a valid label value
pub fn instance_label_value(instance: &str) -> String {
    let mapped: String = instance
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_VALUE_LEN)
        .collect();

    let trimmed = mapped.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Selects the daemon sets created by one instance
pub fn leftover_selector(instance_label: &str) -> String {
    format!(
        "{}={},{}={}",
        CHECK_LABEL, DAEMONSET_CHECK_NAME, INSTANCE_LABEL, instance_label
    )
}

/// Pause-image daemon set scheduled on every node regardless of taints
pub fn pause_daemonset(name: &str, image: &str, instance_label: &str) -> DaemonSet {
    let mut labels = BTreeMap::new();
    labels.insert(CHECK_LABEL.to_string(), DAEMONSET_CHECK_NAME.to_string());
    labels.insert("app".to_string(), name.to_string());
    labels.insert(INSTANCE_LABEL.to_string(), instance_label.to_string());

    DaemonSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "pause".to_string(),
                        image: Some(image.to_string()),
                        ..Default::default()
                    }],
                    tolerations: Some(vec![Toleration {
                        operator: Some("Exists".to_string()),
                        ..Default::default()
                    }]),
                    termination_grace_period_seconds: Some(1),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A ready pod on every node the daemon set was scheduled to
pub fn rollout_complete(ds: &DaemonSet) -> bool {
    let Some(status) = ds.status.as_ref() else {
        return false;
    };
    status.desired_number_scheduled > 0 && status.number_ready >= status.desired_number_scheduled
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DaemonSetStatus;

    fn with_status(desired: i32, ready: i32) -> DaemonSet {
        let mut ds = pause_daemonset("daemonset-check-1", "pause:3.1", "kuberhealthy-0");
        ds.status = Some(DaemonSetStatus {
            desired_number_scheduled: desired,
            number_ready: ready,
            ..Default::default()
        });
        ds
    }

    #[test]
    fn test_pause_daemonset_shape() {
        let ds = pause_daemonset("daemonset-check-42", "registry.local/pause:3.1", "kuberhealthy-0");
        let spec = ds.spec.unwrap();
        let pod = spec.template.spec.unwrap();
        let labels = ds.metadata.labels.unwrap();

        assert_eq!(ds.metadata.name.as_deref(), Some("daemonset-check-42"));
        assert_eq!(labels.get(CHECK_LABEL).map(String::as_str), Some(DAEMONSET_CHECK_NAME));
        assert_eq!(labels.get(INSTANCE_LABEL).map(String::as_str), Some("kuberhealthy-0"));
        assert_eq!(spec.selector.match_labels, spec.template.metadata.unwrap().labels);
        assert_eq!(pod.containers[0].image.as_deref(), Some("registry.local/pause:3.1"));
        assert_eq!(pod.tolerations.unwrap()[0].operator.as_deref(), Some("Exists"));
    }

    #[test]
    fn test_rollout_complete() {
        assert!(rollout_complete(&with_status(3, 3)));
        assert!(!rollout_complete(&with_status(3, 2)));
        assert!(!rollout_complete(&with_status(0, 0)));
        assert!(!rollout_complete(&pause_daemonset("daemonset-check-1", "pause:3.1", "kuberhealthy-0")));
    }

    #[test]
    fn test_run_name_is_valid_resource_name() {
        let name = run_daemonset_name(1_714_564_800);
        assert_eq!(name, "daemonset-check-1714564800");
        assert_eq!(crate::crd::khstate::khstate_name(&name), name);
    }

    /// Cleanup on one replica must not match another replica's daemon sets
    #[test]
    fn test_leftover_selector_is_scoped_to_instance() {
        let selector = leftover_selector("kuberhealthy-0");
        assert_eq!(
            selector,
            "kuberhealthy-check=daemonset,kuberhealthy-instance=kuberhealthy-0"
        );

        let other = pause_daemonset("daemonset-check-1", "pause:3.1", "kuberhealthy-1");
        let labels = other.metadata.labels.unwrap();
        let matches_all = selector.split(',').all(|term| {
            let (key, value) = term.split_once('=').unwrap();
            labels.get(key).map(String::as_str) == Some(value)
        });
        assert!(!matches_all);
    }

    #[test]
    fn test_instance_label_value() {
        assert_eq!(instance_label_value("kuberhealthy-7d9f-abcde"), "kuberhealthy-7d9f-abcde");
        assert_eq!(instance_label_value("pod/with:odd chars"), "pod-with-odd-chars");
        assert_eq!(instance_label_value(&"a".repeat(80)).len(), 63);
        assert_eq!(instance_label_value("--"), "unknown");
    }

    #[test]
    fn test_timing() {
        assert_eq!(DAEMONSET_INTERVAL, Duration::from_secs(900));
        assert_eq!(DAEMONSET_TIMEOUT, Duration::from_secs(600));
    }
}
