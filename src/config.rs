//! Startup configuration
//!
//! Resolved once from the environment into an immutable `Config` that is
//! passed by reference to everything that needs it.

use crate::controller::InfluxConfig;
use crate::server::leader::DEFAULT_POLL_INTERVAL;
use crate::server::DEFAULT_GRACE_PERIOD;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_POD_CHECK_NAMESPACES: &str = "kube-system";
pub const DEFAULT_DNS_ENDPOINTS: &str = "kubernetes.default";
pub const DEFAULT_PAUSE_IMAGE: &str = "gcr.io/google-containers/pause:3.1";
pub const DEFAULT_NAMESPACE: &str = "kuberhealthy";
pub const DEFAULT_INFLUX_DB: &str = "http://localhost:8086";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be true/false/1/0, got {value:?}")]
    InvalidBool { name: &'static str, value: String },

    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("KH_LISTEN_ADDRESS is not a socket address: {0:?}")]
    InvalidListenAddress(String),

    #[error("KH_ENABLE_INFLUX is set but KH_INFLUX_URL is empty")]
    MissingInfluxUrl,
}

/// Which built-in checks to register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledChecks {
    pub component_status: bool,
    pub daemonset: bool,
    pub pod_restarts: bool,
    pub pod_status: bool,
    pub dns_status: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen_address: SocketAddr,
    pub enabled: EnabledChecks,
    pub pod_check_namespaces: Vec<String>,
    pub dns_endpoints: Vec<String>,
    pub pause_image: String,
    pub force_master: bool,
    pub debug: bool,
    pub leader_poll_interval: Duration,
    pub grace_period: Duration,
    /// Namespace holding khstates, the leader lease and daemon set check resources
    pub namespace: String,
    /// This instance's identity (pod name)
    pub instance: String,
    pub influx: Option<InfluxConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, so tests never touch process env
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen = get("KH_LISTEN_ADDRESS").unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string());
        let listen_address = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddress(listen.clone()))?;

        let enabled = EnabledChecks {
            component_status: parse_bool("KH_COMPONENT_STATUS_CHECKS", get("KH_COMPONENT_STATUS_CHECKS"), true)?,
            daemonset: parse_bool("KH_DAEMONSET_CHECKS", get("KH_DAEMONSET_CHECKS"), true)?,
            pod_restarts: parse_bool("KH_POD_RESTART_CHECKS", get("KH_POD_RESTART_CHECKS"), true)?,
            pod_status: parse_bool("KH_POD_STATUS_CHECKS", get("KH_POD_STATUS_CHECKS"), true)?,
            dns_status: parse_bool("KH_DNS_STATUS_CHECKS", get("KH_DNS_STATUS_CHECKS"), true)?,
        };

        let influx = if parse_bool("KH_ENABLE_INFLUX", get("KH_ENABLE_INFLUX"), false)? {
            Some(InfluxConfig {
                url: get("KH_INFLUX_URL").ok_or(ConfigError::MissingInfluxUrl)?,
                database: get("KH_INFLUX_DB").unwrap_or_else(|| DEFAULT_INFLUX_DB.to_string()),
                username: get("KH_INFLUX_USERNAME"),
                password: get("KH_INFLUX_PASSWORD"),
            })
        } else {
            None
        };

        let instance = get("POD_NAME")
            .or_else(|| get("HOSTNAME"))
            .unwrap_or_else(|| format!("kuberhealthy-{}", uuid::Uuid::new_v4()));

        Ok(Self {
            listen_address,
            enabled,
            pod_check_namespaces: split_list(
                &get("KH_POD_CHECK_NAMESPACES").unwrap_or_else(|| DEFAULT_POD_CHECK_NAMESPACES.to_string()),
            ),
            dns_endpoints: split_list(
                &get("KH_DNS_ENDPOINTS").unwrap_or_else(|| DEFAULT_DNS_ENDPOINTS.to_string()),
            ),
            pause_image: get("KH_DS_PAUSE_IMAGE").unwrap_or_else(|| DEFAULT_PAUSE_IMAGE.to_string()),
            force_master: parse_bool("KH_FORCE_MASTER", get("KH_FORCE_MASTER"), false)?,
            debug: parse_bool("KH_DEBUG", get("KH_DEBUG"), false)?,
            leader_poll_interval: parse_seconds(
                "KH_LEADER_POLL_SECONDS",
                get("KH_LEADER_POLL_SECONDS"),
                DEFAULT_POLL_INTERVAL,
            )?,
            grace_period: parse_seconds(
                "KH_GRACE_PERIOD_SECONDS",
                get("KH_GRACE_PERIOD_SECONDS"),
                DEFAULT_GRACE_PERIOD,
            )?,
            namespace: get("POD_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            instance,
            influx,
        })
    }
}

fn parse_bool(name: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::trim) {
        None => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(ConfigError::InvalidBool {
            name,
            value: other.to_string(),
        }),
    }
}

fn parse_seconds(name: &'static str, value: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidNumber { name, value }),
    }
}

/// Split a comma separated list, trimming entries and skipping blanks
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
