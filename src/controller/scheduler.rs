//! Per-check supervision loops
//!
//! Every registered checker gets its own task. A loop waits for its interval
//! and for active leadership, runs the check in a separate task bounded by
//! the checker's timeout, and reports one result per run; a run cancelled by shutdown reports nothing. A hung or
//! panicking check only ever affects its own loop.

use super::aggregator::StateAggregator;
use super::checker::{CheckOutcome, CheckResult, Checker};
use super::forwarder::MetricForwarder;
use super::registry::CheckRegistry;
use super::state::ControllerState;
use crate::server::ShutdownSignal;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Drives one supervising loop per registered checker
pub struct Scheduler {
    registry: Arc<CheckRegistry>,
    context: Arc<LoopContext>,
}

/// State shared by every check loop
struct LoopContext {
    aggregator: StateAggregator,
    state: ControllerState,
    forwarders: Vec<Arc<dyn MetricForwarder>>,
    instance: String,
}

impl Scheduler {
    /// `instance` is recorded as the authoritative pod on every result
    pub fn new(
        registry: Arc<CheckRegistry>,
        aggregator: StateAggregator,
        state: ControllerState,
        forwarders: Vec<Arc<dyn MetricForwarder>>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            context: Arc::new(LoopContext {
                aggregator,
                state,
                forwarders,
                instance: instance.into(),
            }),
        }
    }

    /// Start every check loop; each handle resolves once its loop has exited
    pub fn spawn(&self, shutdown: ShutdownSignal) -> Vec<JoinHandle<()>> {
        info!(checks = self.registry.len(), "Starting check loops");

        self.registry
            .list()
            .iter()
            .map(|checker| {
                tokio::spawn(supervise(
                    self.context.clone(),
                    checker.clone(),
                    shutdown.clone(),
                ))
            })
            .collect()
    }
}

async fn supervise(context: Arc<LoopContext>, checker: Arc<dyn Checker>, mut shutdown: ShutdownSignal) {
    let name = checker.name().to_string();
    let interval = checker.interval();
    let mut next_due = Instant::now() + interval;

    info!(
        check = %name,
        interval_secs = interval.as_secs_f64(),
        timeout_secs = checker.timeout().as_secs_f64(),
        "Check loop started"
    );

    // Cleanup only touches resources this loop created
    let mut ran = false;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                debug!(check = %name, "Check loop idle at shutdown");
                break;
            }
            _ = wait_for_turn(&context.state, next_due) => {}
        }

        // Not raced against shutdown: an in-flight run finishes or times out
        match run_check(checker.clone(), shutdown.clone(), &context.instance).await {
            Some(result) => context.report(result).await,
            None => info!(check = %name, "Check run cancelled by shutdown, result discarded"),
        }
        ran = true;
        next_due = Instant::now() + interval;

        if shutdown.is_shutdown() {
            break;
        }
    }

    if ran {
        if let Err(e) = checker.shutdown().await {
            warn!(check = %name, error = %e, "Check cleanup failed");
        }
    } else {
        debug!(check = %name, "Check never ran, skipping cleanup");
    }
    info!(check = %name, "Check loop stopped");
}

/// Resolve once the interval has elapsed and this instance is active
async fn wait_for_turn(state: &ControllerState, due: Instant) {
    tokio::time::sleep_until(due).await;
    state.wait_active().await;
}

/// Run a checker once, converting timeouts and panics into failed results
///
/// Returns None when the checker reports its run as cancelled by shutdown.
pub async fn run_check(
    checker: Arc<dyn Checker>,
    cancel: ShutdownSignal,
    instance: &str,
) -> Option<CheckResult> {
    let name = checker.name().to_string();
    let timeout = checker.timeout();
    let started = Instant::now();

    debug!(check = %name, "Running check");

    let task = checker.clone();
    let mut handle = tokio::spawn(async move { task.run(cancel).await });

    let outcome = match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(outcome)) if outcome.cancelled => return None,
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_error)) => CheckOutcome::failed(vec![describe_join_error(join_error)]),
        Err(_) => {
            // The run is considered unresponsive; its state is abandoned
            handle.abort();
            let mut detail = format!("check timed out after {:?}", timeout);
            if let Some(status) = checker.current_status() {
                detail.push_str(&format!(" (last status: {})", status));
            }
            CheckOutcome::failed(vec![detail])
        }
    };

    Some(CheckResult::new(name, outcome, started.elapsed(), instance))
}

fn describe_join_error(error: JoinError) -> String {
    if !error.is_panic() {
        return "check task was cancelled".to_string();
    }

    let payload = error.into_panic();
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    format!("check panicked: {}", message)
}

impl LoopContext {
    async fn report(&self, result: CheckResult) {
        if result.ok {
            info!(
                check = %result.check_name,
                duration_ms = result.duration.as_millis() as u64,
                "Check passed"
            );
        } else {
            warn!(
                check = %result.check_name,
                duration_ms = result.duration.as_millis() as u64,
                errors = ?result.errors,
                "Check failed"
            );
        }

        // The status page must not wait on a slow metrics sink
        self.aggregator.record(result.clone()).await;

        for forwarder in &self.forwarders {
            if let Err(e) = forwarder
                .forward(&result.check_name, result.ok, result.duration)
                .await
            {
                warn!(check = %result.check_name, error = %e, "Failed to forward check metrics");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "scheduler_test.rs"]
mod tests;
