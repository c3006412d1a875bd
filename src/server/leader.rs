//! Leader election for multi-replica deployments
//!
//! The controller consumes leadership as a yes/no oracle polled on a fixed
//! interval. `LeaseOracle` implements it with a `coordination.k8s.io/v1`
//! Lease; writes go through `replace`, so the API server's resourceVersion
//! check guarantees at most one holder at a time. `StaticOracle` backs the
//! forced-master debug mode.

use crate::controller::{ControllerState, Leadership, StateAggregator};
use crate::server::metrics::SharedMetrics;
use crate::server::ShutdownSignal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, PostParams};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long a held lease stays valid without renewal
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

/// How often the oracle is polled (and the lease renewed)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default name of the Lease object
pub const DEFAULT_LEASE_NAME: &str = "kuberhealthy-leader";

#[derive(Debug, Error)]
pub enum LeaderError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Leadership oracle unavailable: {0}")]
    Unavailable(String),
}

/// "Am I the active instance" oracle
#[async_trait]
pub trait LeadershipOracle: Send + Sync {
    async fn is_active(&self) -> Result<bool, LeaderError>;

    /// Give up leadership early, if held
    async fn release(&self) -> Result<(), LeaderError> {
        Ok(())
    }
}

/// Oracle with a fixed answer
pub struct StaticOracle(pub bool);

#[async_trait]
impl LeadershipOracle for StaticOracle {
    async fn is_active(&self) -> Result<bool, LeaderError> {
        Ok(self.0)
    }
}

/// Leader election configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderConfig {
    /// Identity written into the Lease (pod name)
    pub holder_id: String,
    pub lease_name: String,
    pub lease_namespace: String,
    pub lease_duration_seconds: i32,
}

impl LeaderConfig {
    pub fn new(holder_id: impl Into<String>, lease_namespace: impl Into<String>) -> Self {
        Self {
            holder_id: holder_id.into(),
            lease_name: DEFAULT_LEASE_NAME.to_string(),
            lease_namespace: lease_namespace.into(),
            lease_duration_seconds: DEFAULT_LEASE_TTL.as_secs() as i32,
        }
    }
}

/// Check whether a lease has lapsed
///
/// A lease with no renew time or no duration is treated as expired.
pub fn is_lease_expired(
    renew_time: Option<&MicroTime>,
    lease_duration_seconds: Option<i32>,
    now: DateTime<Utc>,
) -> bool {
    match (renew_time, lease_duration_seconds) {
        (Some(renewed), Some(duration)) => {
            now > renewed.0 + chrono::Duration::seconds(i64::from(duration))
        }
        _ => true,
    }
}

/// Decide the spec to write, or None when another holder owns a live lease
pub fn next_lease_spec(
    current: Option<&LeaseSpec>,
    holder: &str,
    lease_duration_seconds: i32,
    now: DateTime<Utc>,
) -> Option<LeaseSpec> {
    let fresh = |transitions: i32| LeaseSpec {
        holder_identity: Some(holder.to_string()),
        lease_duration_seconds: Some(lease_duration_seconds),
        acquire_time: Some(MicroTime(now)),
        renew_time: Some(MicroTime(now)),
        lease_transitions: Some(transitions),
        ..Default::default()
    };

    let Some(spec) = current else {
        return Some(fresh(0));
    };
    let current_holder = spec.holder_identity.as_deref().unwrap_or_default();

    if current_holder == holder {
        return Some(LeaseSpec {
            renew_time: Some(MicroTime(now)),
            lease_duration_seconds: Some(lease_duration_seconds),
            ..spec.clone()
        });
    }
    if current_holder.is_empty()
        || is_lease_expired(spec.renew_time.as_ref(), spec.lease_duration_seconds, now)
    {
        let transitions = spec.lease_transitions.unwrap_or(0);
        return Some(fresh(transitions + 1));
    }
    None
}

/// Spec written on release: no holder, so any standby may take over
pub fn released_lease_spec(current: &LeaseSpec, now: DateTime<Utc>) -> LeaseSpec {
    LeaseSpec {
        holder_identity: None,
        lease_duration_seconds: Some(1),
        renew_time: Some(MicroTime(now)),
        ..current.clone()
    }
}

/// Lease-backed oracle; every poll acquires or renews
pub struct LeaseOracle {
    api: Api<Lease>,
    config: LeaderConfig,
}

impl LeaseOracle {
    pub fn new(client: kube::Client, config: LeaderConfig) -> Self {
        Self {
            api: Api::namespaced(client, &config.lease_namespace),
            config,
        }
    }

    /// Read the Lease; failing to reach the API server means no answer at all
    async fn read(&self) -> Result<Option<Lease>, LeaderError> {
        self.api
            .get_opt(&self.config.lease_name)
            .await
            .map_err(|e| LeaderError::Unavailable(e.to_string()))
    }

    /// Replace the Lease spec; a conflict means another writer won
    async fn write(&self, mut lease: Lease, spec: LeaseSpec) -> Result<bool, LeaderError> {
        lease.spec = Some(spec);

        match self
            .api
            .replace(&self.config.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(err)) if err.code == 409 => {
                debug!(lease = %self.config.lease_name, "Lost lease update race");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl LeadershipOracle for LeaseOracle {
    async fn is_active(&self) -> Result<bool, LeaderError> {
        let now = Utc::now();
        let holder = &self.config.holder_id;

        let Some(existing) = self.read().await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.config.lease_name.clone()),
                    namespace: Some(self.config.lease_namespace.clone()),
                    ..Default::default()
                },
                spec: next_lease_spec(None, holder, self.config.lease_duration_seconds, now),
            };

            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => {
                    info!(holder = %holder, lease = %self.config.lease_name, "Created leader lease");
                    Ok(true)
                }
                Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
                Err(e) => Err(e.into()),
            };
        };

        match next_lease_spec(
            existing.spec.as_ref(),
            holder,
            self.config.lease_duration_seconds,
            now,
        ) {
            Some(spec) => self.write(existing, spec).await,
            None => Ok(false),
        }
    }

    async fn release(&self) -> Result<(), LeaderError> {
        let Some(existing) = self.read().await? else {
            return Ok(());
        };
        let Some(spec) = existing.spec.clone() else {
            return Ok(());
        };
        if spec.holder_identity.as_deref() != Some(self.config.holder_id.as_str()) {
            return Ok(());
        }

        self.write(existing, released_lease_spec(&spec, Utc::now())).await?;
        info!(holder = %self.config.holder_id, "Released leader lease");
        Ok(())
    }
}

/// Polls the oracle and flips the controller between Active and Standby
///
/// While standby, each poll also refreshes the aggregated status from the
/// durable store so this replica serves the leader's view.
pub struct LeadershipMonitor {
    oracle: Arc<dyn LeadershipOracle>,
    state: ControllerState,
    aggregator: StateAggregator,
    metrics: Option<SharedMetrics>,
    poll_interval: Duration,
}

impl LeadershipMonitor {
    pub fn new(
        oracle: Arc<dyn LeadershipOracle>,
        state: ControllerState,
        aggregator: StateAggregator,
        metrics: Option<SharedMetrics>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            oracle,
            state,
            aggregator,
            metrics,
            poll_interval,
        }
    }

    /// Query the oracle once and apply the answer
    pub async fn poll_once(&self) -> Leadership {
        let leadership = match self.oracle.is_active().await {
            Ok(true) => Leadership::Active,
            Ok(false) => Leadership::Standby,
            Err(e) => {
                // Never assume leadership on uncertainty
                warn!(error = %e, "Leadership oracle query failed, assuming standby");
                Leadership::Standby
            }
        };

        if self.state.set_leadership(leadership) {
            match leadership {
                Leadership::Active => info!("Became active leader, checks will run"),
                Leadership::Standby => info!("Running as standby, checks paused"),
            }
        }
        if let Some(ref metrics) = self.metrics {
            metrics.set_leader(leadership == Leadership::Active);
        }

        if leadership == Leadership::Standby {
            if let Err(e) = self.aggregator.sync_from_store().await {
                warn!(error = %e, "Failed to refresh status from store");
            }
        }

        leadership
    }

    /// Poll until shutdown, then release leadership if held
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Leadership monitor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        if let Err(e) = self.oracle.release().await {
            warn!(error = %e, "Failed to release leadership");
        }
        if let Some(ref metrics) = self.metrics {
            metrics.set_leader(false);
        }
        info!("Leadership monitor stopped");
    }
}
