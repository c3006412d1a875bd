use super::khstate::*;
use crate::controller::{CheckOutcome, CheckResult};
use kube::CustomResourceExt;
use std::time::Duration;

#[test]
fn test_khstate_deserialize_from_yaml() {
    let yaml = r#"
apiVersion: comcast.github.io/v1
kind: KuberhealthyState
metadata:
  name: pod-restarts-kube-system
  namespace: kuberhealthy
spec:
  checkName: pod-restarts-kube-system
  ok: false
  errors:
  - "3 restarts detected in namespace kube-system: pod coredns-1 container coredns"
  lastRun: "2024-05-01T12:00:00+00:00"
  runDurationMillis: 1500
  authoritativePod: kuberhealthy-7d9f-abcde
"#;

    let state: KuberhealthyState =
        serde_yaml::from_str(yaml).expect("Failed to deserialize KuberhealthyState");

    assert_eq!(state.metadata.name.as_deref(), Some("pod-restarts-kube-system"));
    assert!(!state.spec.ok);

    let result = state.to_result().unwrap();
    assert_eq!(result.check_name, "pod-restarts-kube-system");
    assert_eq!(result.duration, Duration::from_millis(1500));
    assert_eq!(result.authoritative_pod, "kuberhealthy-7d9f-abcde");
    assert_eq!(result.completed_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    assert_eq!(
        result.errors,
        vec!["3 restarts detected in namespace kube-system: pod coredns-1 container coredns".to_string()]
    );
}

#[test]
fn test_optional_fields_default() {
    let yaml = r#"
apiVersion: comcast.github.io/v1
kind: KuberhealthyState
metadata:
  name: dns-status
spec:
  checkName: dns-status
  ok: true
  lastRun: "2024-05-01T12:00:00Z"
"#;

    let state: KuberhealthyState = serde_yaml::from_str(yaml).unwrap();
    assert!(state.spec.errors.is_empty());
    assert_eq!(state.spec.run_duration_millis, 0);
    assert_eq!(state.spec.authoritative_pod, "");
}

#[test]
fn test_from_result_preserves_fields() {
    let result = CheckResult::new(
        "dns-status",
        CheckOutcome::failed(vec!["lookup kubernetes.default failed".to_string()]),
        Duration::from_millis(42),
        "kuberhealthy-0",
    );

    let state = KuberhealthyState::from_result("dns-status", &result);
    assert_eq!(state.metadata.name.as_deref(), Some("dns-status"));

    let restored = state.to_result().unwrap();
    assert_eq!(restored.check_name, result.check_name);
    assert_eq!(restored.ok, result.ok);
    assert_eq!(restored.errors, result.errors);
    assert_eq!(restored.duration, result.duration);
    assert_eq!(restored.completed_at, result.completed_at);
}

#[test]
fn test_serialized_field_names() {
    let result = CheckResult::new("x", CheckOutcome::passed(), Duration::ZERO, "pod");
    let json = serde_json::to_value(KuberhealthyState::from_result("x", &result)).unwrap();

    assert_eq!(json["apiVersion"], "comcast.github.io/v1");
    assert_eq!(json["kind"], "KuberhealthyState");
    assert_eq!(json["spec"]["checkName"], "x");
    assert!(json["spec"]["lastRun"].is_string());
    assert_eq!(json["spec"]["authoritativePod"], "pod");
}

#[test]
fn test_invalid_last_run_is_rejected() {
    let mut state = KuberhealthyState::from_result(
        "dns-status",
        &CheckResult::new("dns-status", CheckOutcome::passed(), Duration::ZERO, "pod"),
    );
    state.spec.last_run = "yesterday".to_string();

    let err = state.to_result().unwrap_err();
    assert!(err.contains("invalid lastRun"));
}

#[test]
fn test_khstate_name_sanitizes() {
    assert_eq!(khstate_name("pod-status-kube-system"), "pod-status-kube-system");
    assert_eq!(khstate_name("Pod_Status/Default"), "pod-status-default");
    assert_eq!(khstate_name("--dns--"), "dns");
    assert_eq!(khstate_name("___"), "unnamed-check");
    assert!(khstate_name(&"a".repeat(400)).len() <= 253);
}

#[test]
fn test_crd_definition() {
    let crd = KuberhealthyState::crd();

    assert_eq!(crd.metadata.name.as_deref(), Some("khstates.comcast.github.io"));
    assert_eq!(crd.spec.group, "comcast.github.io");
    assert_eq!(crd.spec.names.plural, "khstates");
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.versions[0].name, "v1");
}
