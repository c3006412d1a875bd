//! Aggregation of per-check results into one reportable status
//!
//! The overall OK flag is derived from the per-check map on every read and
//! is never stored next to it.

use super::checker::CheckResult;
use super::store::{StateStore, StoreError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Combined health snapshot, keyed by check name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedStatus {
    checks: BTreeMap<String, CheckResult>,
    last_update: Option<DateTime<Utc>>,
}

impl AggregatedStatus {
    /// Build a status from a set of results; later entries for a name win
    pub fn from_results(results: impl IntoIterator<Item = CheckResult>) -> Self {
        let mut status = Self::default();
        for result in results {
            status.apply(result);
        }
        status
    }

    /// Logical AND of the latest result of every check (true when empty)
    pub fn ok(&self) -> bool {
        self.checks.values().all(|r| r.ok)
    }

    /// Error strings of every failing check, in check-name order
    pub fn errors(&self) -> Vec<String> {
        self.checks
            .values()
            .filter(|r| !r.ok)
            .flat_map(|r| r.errors.iter().cloned())
            .collect()
    }

    pub fn checks(&self) -> &BTreeMap<String, CheckResult> {
        &self.checks
    }

    pub fn get(&self, check_name: &str) -> Option<&CheckResult> {
        self.checks.get(check_name)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Supersede the previous result for the same check
    fn apply(&mut self, result: CheckResult) {
        self.last_update = Some(
            self.last_update
                .map_or(result.completed_at, |t| t.max(result.completed_at)),
        );
        self.checks.insert(result.check_name.clone(), result);
    }

    fn retain_known(&mut self, known: &BTreeSet<String>) {
        self.checks.retain(|name, _| known.contains(name));
    }
}

/// Owner of the single `AggregatedStatus`
///
/// Writers (check loops) are serialized against each other and against
/// readers by the RwLock. Persistence runs outside that lock, one entry per
/// save, ordered by its own mutex; the store refuses to replace an entry
/// with an older one.
#[derive(Clone)]
pub struct StateAggregator {
    status: Arc<RwLock<AggregatedStatus>>,
    store: Arc<dyn StateStore>,
    persist_lock: Arc<Mutex<()>>,
    known_checks: Arc<BTreeSet<String>>,
}

impl StateAggregator {
    /// `known_checks` limits which stored entries are restored
    pub fn new(store: Arc<dyn StateStore>, known_checks: BTreeSet<String>) -> Self {
        Self {
            status: Arc::new(RwLock::new(AggregatedStatus::default())),
            store,
            persist_lock: Arc::new(Mutex::new(())),
            known_checks: Arc::new(known_checks),
        }
    }

    /// Apply a result and persist that check's entry
    pub async fn record(&self, result: CheckResult) {
        let check = result.check_name.clone();
        let entry = result.clone();
        let ok = {
            let mut status = self.status.write().await;
            status.apply(result);
            status.ok()
        };
        debug!(check = %check, overall_ok = ok, "Recorded check result");

        self.persist(&entry).await;
    }

    /// Copy of the current status
    pub async fn snapshot(&self) -> AggregatedStatus {
        self.status.read().await.clone()
    }

    /// Replace the in-memory status with what the store holds
    ///
    /// Used at startup and by standby replicas so they serve the leader's
    /// view. Entries for checks not registered here are dropped.
    pub async fn sync_from_store(&self) -> Result<usize, StoreError> {
        let mut loaded = match self.store.load().await {
            Ok(status) => status,
            Err(StoreError::NotFound) => {
                debug!("No stored state to restore");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };
        loaded.retain_known(&self.known_checks);

        let restored = loaded.checks.len();
        *self.status.write().await = loaded;
        Ok(restored)
    }

    /// Persist every entry of the current snapshot, used during graceful shutdown
    ///
    /// Entries the store already holds a newer result for are left alone.
    pub async fn flush(&self) {
        let snapshot = self.snapshot().await;
        for result in snapshot.checks().values() {
            self.persist(result).await;
        }
        info!(checks = snapshot.checks().len(), "Aggregated state flushed to store");
    }

    async fn persist(&self, result: &CheckResult) {
        let _guard = self.persist_lock.lock().await;
        match self.store.save(result).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(check = %result.check_name, "Store holds a newer result, not overwritten");
            }
            Err(e) => {
                // In-memory state stays authoritative for serving
                warn!(check = %result.check_name, error = %e, "Failed to persist check state");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "aggregator_test.rs"]
mod tests;
