use crate::controller::{CheckOutcome, Checker};
use crate::server::ShutdownSignal;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ComponentStatus;
use kube::api::{Api, ListParams};
use kube::Client;
use std::time::Duration;

pub const COMPONENT_STATUS_CHECK_NAME: &str = "component-status";
pub const COMPONENT_STATUS_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Verifies every control plane component reports Healthy
pub struct ComponentStatusCheck {
    api: Api<ComponentStatus>,
}

impl ComponentStatusCheck {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl Checker for ComponentStatusCheck {
    fn name(&self) -> &str {
        COMPONENT_STATUS_CHECK_NAME
    }

    fn interval(&self) -> Duration {
        COMPONENT_STATUS_INTERVAL
    }

    async fn run(&self, _cancel: ShutdownSignal) -> CheckOutcome {
        match self.api.list(&ListParams::default()).await {
            Ok(list) => CheckOutcome::from_errors(unhealthy_components(&list.items)),
            Err(e) => CheckOutcome::failed(vec![format!("failed to list component statuses: {}", e)]),
        }
    }
}

/// One error per component whose Healthy condition is not "True"
pub fn unhealthy_components(components: &[ComponentStatus]) -> Vec<String> {
    let mut errors = Vec::new();
    for component in components {
        let name = component.metadata.name.as_deref().unwrap_or("<unnamed>");
        let conditions = component.conditions.as_deref().unwrap_or_default();

        let healthy = conditions.iter().find(|c| c.type_ == "Healthy");
        match healthy {
            Some(condition) if condition.status == "True" => {}
            Some(condition) => {
                let reason = condition
                    .message
                    .as_deref()
                    .or(condition.error.as_deref())
                    .unwrap_or("no message");
                errors.push(format!("componentstatus {} is not healthy: {}", name, reason));
            }
            None => errors.push(format!("componentstatus {} reports no Healthy condition", name)),
        }
    }
    errors
}
