use crate::controller::CheckResult;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// KuberhealthyState persists the latest result of one check
///
/// One resource per check, named after the check, in the controller's
/// namespace. Any replica can rebuild the aggregated status from these.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "comcast.github.io",
    version = "v1",
    kind = "KuberhealthyState",
    plural = "khstates",
    shortname = "khs",
    namespaced,
    printcolumn = r#"{"name":"Check", "type":"string", "jsonPath":".spec.checkName"}"#,
    printcolumn = r#"{"name":"OK", "type":"boolean", "jsonPath":".spec.ok"}"#,
    printcolumn = r#"{"name":"Last Run", "type":"string", "jsonPath":".spec.lastRun"}"#,
    printcolumn = r#"{"name":"Pod", "type":"string", "jsonPath":".spec.authoritativePod"}"#
)]
pub struct KuberhealthyStateSpec {
    /// Name of the check as registered in the controller
    #[serde(rename = "checkName")]
    pub check_name: String,

    /// Whether the latest run passed
    pub ok: bool,

    /// Error details from the latest run (empty when ok)
    #[serde(default)]
    pub errors: Vec<String>,

    /// RFC3339 completion time of the latest run
    #[serde(rename = "lastRun")]
    pub last_run: String,

    /// Duration of the latest run in milliseconds
    #[serde(rename = "runDurationMillis", default)]
    pub run_duration_millis: u64,

    /// Pod that produced the latest result
    #[serde(rename = "authoritativePod", default)]
    pub authoritative_pod: String,
}

impl KuberhealthyState {
    /// Build the resource for a check result
    pub fn from_result(name: &str, result: &CheckResult) -> Self {
        KuberhealthyState::new(
            name,
            KuberhealthyStateSpec {
                check_name: result.check_name.clone(),
                ok: result.ok,
                errors: result.errors.clone(),
                last_run: result.completed_at.to_rfc3339(),
                run_duration_millis: result.duration.as_millis() as u64,
                authoritative_pod: result.authoritative_pod.clone(),
            },
        )
    }

    /// Rebuild the stored check result
    pub fn to_result(&self) -> Result<CheckResult, String> {
        let spec = &self.spec;
        let completed_at = DateTime::parse_from_rfc3339(&spec.last_run)
            .map_err(|e| format!("check {:?} has invalid lastRun {:?}: {}", spec.check_name, spec.last_run, e))?
            .with_timezone(&Utc);

        Ok(CheckResult {
            check_name: spec.check_name.clone(),
            ok: spec.ok,
            errors: spec.errors.clone(),
            completed_at,
            duration: Duration::from_millis(spec.run_duration_millis),
            authoritative_pod: spec.authoritative_pod.clone(),
        })
    }
}

/// Resource name for a check: lowercase DNS-1123, at most 253 characters
pub fn khstate_name(check_name: &str) -> String {
    let mut name: String = check_name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    name.truncate(253);

    let trimmed = name.trim_matches(|c: char| c == '-' || c == '.');
    if trimmed.is_empty() {
        "unnamed-check".to_string()
    } else {
        trimmed.to_string()
    }
}
