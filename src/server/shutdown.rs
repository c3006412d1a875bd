//! Graceful shutdown handling for the Kuberhealthy controller
//!
//! On SIGTERM/SIGINT:
//! - Broadcasts a shutdown signal to every check loop and the leadership monitor
//! - Waits for every tracked task to exit
//! - Gives up after a second signal or when the grace period elapses

use crate::controller::ControllerState;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Default grace period; keep calibrated with the pod's terminationGracePeriodSeconds
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Receiving half of the shutdown broadcast
///
/// Cloned and handed to every component that must stop on shutdown.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for shutdown signal
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                // Sender dropped, treat as shutdown
                break;
            }
        }
    }

    /// Check if shutdown was signaled (non-blocking)
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Controller for triggering shutdown
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    /// Trigger shutdown
    pub fn shutdown(&self) {
        let _ = self.sender.send(true);
        info!("Shutdown signal sent");
    }
}

/// Create a new shutdown signal pair
///
/// Returns (controller, signal) where:
/// - controller: Used to trigger shutdown
/// - signal: Cloned and passed to components that need to listen
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// How the drain phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every tracked task acknowledged
    Graceful,
    /// A second termination signal arrived while draining
    Forced,
    /// The grace period elapsed first
    TimedOut,
}

impl ShutdownOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownOutcome::Graceful => 0,
            ShutdownOutcome::Forced => 130,
            ShutdownOutcome::TimedOut => 1,
        }
    }
}

/// Cancels tracked tasks and bounds how long shutdown may take
pub struct ShutdownCoordinator {
    controller: ShutdownController,
    state: ControllerState,
    grace_period: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl ShutdownCoordinator {
    pub fn new(controller: ShutdownController, state: ControllerState, grace_period: Duration) -> Self {
        Self {
            controller,
            state,
            grace_period,
            tasks: Vec::new(),
        }
    }

    /// Add a task whose exit counts as its completion acknowledgment
    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.tasks.push(handle);
    }

    pub fn track_all(&mut self, handles: impl IntoIterator<Item = JoinHandle<()>>) {
        self.tasks.extend(handles);
    }

    /// Broadcast shutdown and wait for acknowledgment, a second signal, or the deadline
    pub async fn drain<F>(self, second_signal: F) -> ShutdownOutcome
    where
        F: Future<Output = ()>,
    {
        info!(
            tasks = self.tasks.len(),
            grace_period_secs = self.grace_period.as_secs(),
            "Shutting down..."
        );
        self.state.begin_shutdown();
        self.controller.shutdown();

        let acknowledged = futures::future::join_all(self.tasks);

        let outcome = tokio::select! {
            results = acknowledged => {
                let failed = results.iter().filter(|r| r.is_err()).count();
                if failed > 0 {
                    warn!(failed, "Some tasks ended abnormally during shutdown");
                }
                info!("Shutdown gracefully completed");
                ShutdownOutcome::Graceful
            }
            _ = second_signal => {
                warn!("Shutdown forced from multiple interrupts");
                ShutdownOutcome::Forced
            }
            _ = tokio::time::sleep(self.grace_period) => {
                error!(
                    grace_period_secs = self.grace_period.as_secs(),
                    "Shutdown took too long, shutting down forcefully"
                );
                ShutdownOutcome::TimedOut
            }
        };

        self.state.mark_stopped();
        outcome
    }
}

/// Process termination signals, registered once so a repeat is never missed
pub struct TerminationSignals {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    /// Install handlers for SIGTERM and SIGINT
    #[cfg(unix)]
    pub fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    #[cfg(not(unix))]
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next termination signal and return its name
    #[cfg(unix)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => {
                info!("Received SIGTERM");
                "SIGTERM"
            }
            _ = self.sigint.recv() => {
                info!("Received SIGINT");
                "SIGINT"
            }
        }
    }

    /// Wait for the next Ctrl+C (Windows)
    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to wait for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C");
        "CTRL_C"
    }
}
