//! Durable state store for the aggregated status
//!
//! Production code uses `KhStateStore`, which keeps one `KuberhealthyState`
//! resource per check so any replica can rebuild the status after a restart
//! or leadership change. Tests use `MemoryStateStore`.

use super::aggregator::AggregatedStatus;
use super::checker::CheckResult;
use crate::crd::khstate::{khstate_name, KuberhealthyState};
use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use thiserror::Error;
use tracing::debug;

/// Field manager used for server-side apply
const FIELD_MANAGER: &str = "kuberhealthy";

/// Attempts before a save that keeps losing write races gives up
const MAX_SAVE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No stored state found")]
    NotFound,

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Stored state is invalid: {0}")]
    Invalid(String),

    #[error("Gave up saving {0} after repeated write conflicts")]
    Conflict(String),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Save one check's result
    ///
    /// Returns `Ok(false)` without writing when the stored entry completed
    /// later than `result`.
    async fn save(&self, result: &CheckResult) -> Result<bool, StoreError>;

    /// Load the last saved status, `StoreError::NotFound` when nothing was saved
    async fn load(&self) -> Result<AggregatedStatus, StoreError>;
}

/// Whether the stored entry is newer than the incoming one
pub fn is_superseded(stored: Option<&CheckResult>, incoming: &CheckResult) -> bool {
    stored.is_some_and(|s| s.completed_at > incoming.completed_at)
}

/// Store backed by `khstates.comcast.github.io` resources in one namespace
pub struct KhStateStore {
    api: Api<KuberhealthyState>,
}

impl KhStateStore {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl StateStore for KhStateStore {
    async fn save(&self, result: &CheckResult) -> Result<bool, StoreError> {
        let name = khstate_name(&result.check_name);
        let params = PatchParams::apply(FIELD_MANAGER).force();

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let existing = self.api.get_opt(&name).await?;
            let stored = existing.as_ref().and_then(|s| s.to_result().ok());
            if is_superseded(stored.as_ref(), result) {
                debug!(check = %result.check_name, khstate = %name, "Stored state is newer, skipping save");
                return Ok(false);
            }

            // Pin the observed version so a concurrent write turns into a 409
            let mut state = KuberhealthyState::from_result(&name, result);
            state.metadata.resource_version =
                existing.and_then(|s| s.metadata.resource_version);

            match self.api.patch(&name, &params, &Patch::Apply(&state)).await {
                Ok(_) => {
                    debug!(check = %result.check_name, khstate = %name, "Persisted check state");
                    return Ok(true);
                }
                Err(kube::Error::Api(err)) if err.code == 409 => {
                    debug!(khstate = %name, attempt, "khstate changed while saving, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::Conflict(name))
    }

    async fn load(&self) -> Result<AggregatedStatus, StoreError> {
        let list = self.api.list(&ListParams::default()).await?;
        if list.items.is_empty() {
            return Err(StoreError::NotFound);
        }

        let results = list
            .items
            .iter()
            .map(KuberhealthyState::to_result)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Invalid)?;

        Ok(AggregatedStatus::from_results(results))
    }
}

/// In-memory store for tests; clones share the same entries
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    entries: std::sync::Arc<std::sync::Mutex<std::collections::BTreeMap<String, CheckResult>>>,
    fail_saves: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail, to exercise error paths
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Everything saved so far, None when nothing was
    pub fn stored(&self) -> Option<AggregatedStatus> {
        let entries = self.entries.lock().unwrap();
        if entries.is_empty() {
            return None;
        }
        Some(AggregatedStatus::from_results(entries.values().cloned()))
    }
}

#[cfg(test)]
#[async_trait]
#[allow(clippy::unwrap_used)]
impl StateStore for MemoryStateStore {
    async fn save(&self, result: &CheckResult) -> Result<bool, StoreError> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Invalid("store unavailable".to_string()));
        }
        let mut entries = self.entries.lock().unwrap();
        if is_superseded(entries.get(&result.check_name), result) {
            return Ok(false);
        }
        entries.insert(result.check_name.clone(), result.clone());
        Ok(true)
    }

    async fn load(&self) -> Result<AggregatedStatus, StoreError> {
        self.stored().ok_or(StoreError::NotFound)
    }
}
