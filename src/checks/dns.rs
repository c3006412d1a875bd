use crate::controller::{CheckOutcome, Checker};
use crate::server::ShutdownSignal;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::lookup_host;

pub const DNS_CHECK_NAME: &str = "dns-status";
pub const DNS_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Bound for a single hostname lookup
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves each configured hostname through the cluster resolver
pub struct DnsStatusCheck {
    endpoints: Vec<String>,
}

impl DnsStatusCheck {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl Checker for DnsStatusCheck {
    fn name(&self) -> &str {
        DNS_CHECK_NAME
    }

    fn interval(&self) -> Duration {
        DNS_INTERVAL
    }

    async fn run(&self, _cancel: ShutdownSignal) -> CheckOutcome {
        let mut errors = Vec::new();
        for endpoint in &self.endpoints {
            if let Err(e) = resolve(endpoint).await {
                errors.push(e);
            }
        }
        CheckOutcome::from_errors(errors)
    }
}

/// Resolve `host` to at least one address
pub async fn resolve(host: &str) -> Result<usize, String> {
    let lookup = tokio::time::timeout(LOOKUP_TIMEOUT, lookup_host((host, 0)));
    match lookup.await {
        Ok(Ok(addrs)) => match addrs.count() {
            0 => Err(format!("DNS lookup of {} returned no addresses", host)),
            n => Ok(n),
        },
        Ok(Err(e)) => Err(format!("DNS lookup of {} failed: {}", host, e)),
        Err(_) => Err(format!("DNS lookup of {} timed out after {:?}", host, LOOKUP_TIMEOUT)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::server::shutdown_channel;

    #[tokio::test]
    async fn test_resolve_localhost() {
        assert!(resolve("localhost").await.unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        assert_eq!(resolve("127.0.0.1").await, Ok(1));
    }

    #[tokio::test]
    async fn test_unresolvable_host_fails() {
        let check = DnsStatusCheck::new(vec!["localhost".to_string(), "no-such-host.invalid".to_string()]);
        let (_controller, signal) = shutdown_channel();

        let outcome = check.run(signal).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("DNS lookup of no-such-host.invalid"));
    }

    #[tokio::test]
    async fn test_no_endpoints_passes() {
        let (_controller, signal) = shutdown_channel();
        assert!(DnsStatusCheck::new(Vec::new()).run(signal).await.ok);
    }
}
