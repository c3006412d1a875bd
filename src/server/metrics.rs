//! Prometheus metrics for the controller
//!
//! Exposed on `/metrics`:
//! - `kuberhealthy_check_runs_total{check,result}` - completed runs
//! - `kuberhealthy_check_duration_seconds{check}` - run duration histogram
//! - `kuberhealthy_check_up{check}` - 1 if the latest run passed, else 0
//! - `kuberhealthy_leader` - 1 while this instance is the active leader

use crate::controller::forwarder::{ForwardError, MetricForwarder};
use async_trait::async_trait;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub type SharedMetrics = Arc<ControllerMetrics>;

pub struct ControllerMetrics {
    registry: Registry,
    check_runs: IntCounterVec,
    check_duration: HistogramVec,
    check_up: GaugeVec,
    leader: IntGauge,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let check_runs = IntCounterVec::new(
            Opts::new("kuberhealthy_check_runs_total", "Completed check runs"),
            &["check", "result"],
        )?;
        let check_duration = HistogramVec::new(
            HistogramOpts::new(
                "kuberhealthy_check_duration_seconds",
                "Duration of check runs in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 600.0]),
            &["check"],
        )?;
        let check_up = GaugeVec::new(
            Opts::new("kuberhealthy_check_up", "1 if the latest run of the check passed"),
            &["check"],
        )?;
        let leader = IntGauge::new(
            "kuberhealthy_leader",
            "1 while this instance is the active leader",
        )?;

        registry.register(Box::new(check_runs.clone()))?;
        registry.register(Box::new(check_duration.clone()))?;
        registry.register(Box::new(check_up.clone()))?;
        registry.register(Box::new(leader.clone()))?;

        Ok(Self {
            registry,
            check_runs,
            check_duration,
            check_up,
            leader,
        })
    }

    pub fn record_check(&self, check: &str, ok: bool, duration: Duration) {
        let result = if ok { "success" } else { "failure" };
        self.check_runs.with_label_values(&[check, result]).inc();
        self.check_duration
            .with_label_values(&[check])
            .observe(duration.as_secs_f64());
        self.check_up
            .with_label_values(&[check])
            .set(if ok { 1.0 } else { 0.0 });
    }

    pub fn set_leader(&self, active: bool) {
        self.leader.set(i64::from(active));
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[async_trait]
impl MetricForwarder for ControllerMetrics {
    async fn forward(
        &self,
        check_name: &str,
        ok: bool,
        duration: Duration,
    ) -> Result<(), ForwardError> {
        self.record_check(check_name, ok, duration);
        Ok(())
    }
}

/// Create the shared metrics registry
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(ControllerMetrics::new()?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_recorded_checks() {
        let metrics = create_metrics().unwrap();
        metrics.record_check("dns-status", true, Duration::from_millis(120));
        metrics.record_check("pod-status-kube-system", false, Duration::from_secs(2));

        let body = metrics.encode().unwrap();
        assert!(body.contains(r#"kuberhealthy_check_runs_total{check="dns-status",result="success"} 1"#));
        assert!(body.contains(r#"kuberhealthy_check_up{check="pod-status-kube-system"} 0"#));
        assert!(body.contains("kuberhealthy_check_duration_seconds_bucket"));
    }

    #[test]
    fn test_leader_gauge() {
        let metrics = create_metrics().unwrap();
        metrics.set_leader(true);
        assert!(metrics.encode().unwrap().contains("kuberhealthy_leader 1"));

        metrics.set_leader(false);
        assert!(metrics.encode().unwrap().contains("kuberhealthy_leader 0"));
    }

    #[tokio::test]
    async fn test_forward_records_run() {
        let metrics = create_metrics().unwrap();
        metrics
            .forward("daemonset", false, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(metrics
            .encode()
            .unwrap()
            .contains(r#"kuberhealthy_check_runs_total{check="daemonset",result="failure"} 1"#));
    }
}
