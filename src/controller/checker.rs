//! Checker contract and the result values it produces
//!
//! A checker owns one check's logic. The scheduler only ever sees it
//! through this trait.

use crate::server::ShutdownSignal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Bound applied to a single run when a checker does not override `timeout()`
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Check cleanup failed: {0}")]
    Cleanup(String),
}

/// Outcome of one run as reported by the checker itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub ok: bool,
    pub errors: Vec<String>,
    /// The run was cut short by shutdown and says nothing about the cluster
    pub cancelled: bool,
}

impl CheckOutcome {
    pub fn passed() -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
            cancelled: false,
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            ok: false,
            errors,
            cancelled: false,
        }
    }

    /// Run abandoned because the process is shutting down; never recorded
    pub fn cancelled() -> Self {
        Self {
            ok: false,
            errors: Vec::new(),
            cancelled: true,
        }
    }

    /// Passed when `errors` is empty, failed otherwise
    pub fn from_errors(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            Self::passed()
        } else {
            Self::failed(errors)
        }
    }
}

/// A pluggable unit of health logic
///
/// `run` may be dropped at any await point when it exceeds `timeout()`;
/// implementations must not rely on running to completion.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Stable identifier, unique within a registry
    fn name(&self) -> &str;

    /// Minimum time between the end of one run and the start of the next
    fn interval(&self) -> Duration;

    fn timeout(&self) -> Duration {
        DEFAULT_CHECK_TIMEOUT
    }

    /// Execute one run
    ///
    /// `cancel` fires when the controller starts shutting down, so long
    /// waits inside a run can end early.
    async fn run(&self, cancel: ShutdownSignal) -> CheckOutcome;

    /// What the checker is doing right now, if it tracks that
    fn current_status(&self) -> Option<String> {
        None
    }

    /// Release anything the checker created, called once after its loop exits
    async fn shutdown(&self) -> Result<(), CheckError> {
        Ok(())
    }
}

/// Immutable record of one completed run
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub check_name: String,
    pub ok: bool,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
    /// Instance that produced this result
    pub authoritative_pod: String,
}

impl CheckResult {
    pub fn new(
        check_name: impl Into<String>,
        outcome: CheckOutcome,
        duration: Duration,
        authoritative_pod: impl Into<String>,
    ) -> Self {
        Self {
            check_name: check_name.into(),
            ok: outcome.ok,
            errors: outcome.errors,
            completed_at: Utc::now(),
            duration,
            authoritative_pod: authoritative_pod.into(),
        }
    }
}
