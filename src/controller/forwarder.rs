//! Forwarding of per-run check metrics to external sinks
//!
//! Forwarding is best effort: the scheduler logs failures and moves on.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for one write; a slow sink must not hold up check reporting
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Metric forwarding HTTP error: {0}")]
    HttpError(String),

    #[error("Metric sink rejected write with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait MetricForwarder: Send + Sync {
    async fn forward(&self, check_name: &str, ok: bool, duration: Duration)
        -> Result<(), ForwardError>;
}

/// Connection settings for an InfluxDB 1.x endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxConfig {
    pub url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Writes one point per run using the InfluxDB line protocol
pub struct InfluxForwarder {
    config: InfluxConfig,
    client: reqwest::Client,
}

impl InfluxForwarder {
    pub fn new(config: InfluxConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn write_url(&self) -> String {
        format!("{}/write", self.config.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl MetricForwarder for InfluxForwarder {
    async fn forward(
        &self,
        check_name: &str,
        ok: bool,
        duration: Duration,
    ) -> Result<(), ForwardError> {
        let mut request = self
            .client
            .post(self.write_url())
            .query(&[("db", self.config.database.as_str())])
            .timeout(WRITE_TIMEOUT)
            .body(line_protocol(check_name, ok, duration));

        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ForwardError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ForwardError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Build a single line-protocol point for one check run
fn line_protocol(check_name: &str, ok: bool, duration: Duration) -> String {
    format!(
        "kuberhealthy_check,check={} ok={},duration_seconds={}",
        escape_tag(check_name),
        ok,
        duration.as_secs_f64()
    )
}

/// Tag values escape commas, spaces and equals signs
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Forwarder that records calls in memory for assertions
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockForwarder {
    calls: std::sync::Arc<std::sync::Mutex<Vec<(String, bool)>>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
#[allow(clippy::unwrap_used)]
impl MetricForwarder for MockForwarder {
    async fn forward(
        &self,
        check_name: &str,
        ok: bool,
        _duration: Duration,
    ) -> Result<(), ForwardError> {
        self.calls.lock().unwrap().push((check_name.to_string(), ok));
        Ok(())
    }
}
