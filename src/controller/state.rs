//! Process-wide lifecycle and leadership state
//!
//! Backed by a watch channel so scheduler loops can await `Active`
//! instead of polling a flag.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leadership {
    Active,
    Standby,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Initializing,
    Running(Leadership),
    ShuttingDown,
    Stopped,
}

impl Lifecycle {
    pub fn is_active(&self) -> bool {
        matches!(self, Lifecycle::Running(Leadership::Active))
    }
}

/// Shared controller state; clones observe the same value
#[derive(Debug, Clone)]
pub struct ControllerState {
    sender: Arc<watch::Sender<Lifecycle>>,
}

impl ControllerState {
    /// New state in `Initializing`
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Lifecycle::Initializing);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.sender.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle().is_active()
    }

    /// Enter `Running` with the given leadership
    ///
    /// Ignored once shutdown has begun. Returns true when the state changed.
    pub fn set_leadership(&self, leadership: Leadership) -> bool {
        self.sender.send_if_modified(|state| match *state {
            Lifecycle::Initializing => {
                *state = Lifecycle::Running(leadership);
                true
            }
            Lifecycle::Running(current) if current != leadership => {
                *state = Lifecycle::Running(leadership);
                true
            }
            _ => false,
        })
    }

    pub fn begin_shutdown(&self) {
        self.sender.send_if_modified(|state| match *state {
            Lifecycle::ShuttingDown | Lifecycle::Stopped => false,
            _ => {
                *state = Lifecycle::ShuttingDown;
                true
            }
        });
    }

    pub fn mark_stopped(&self) {
        self.sender.send_replace(Lifecycle::Stopped);
    }

    /// Resolve once this instance is the active leader
    ///
    /// Never resolves after shutdown began; callers race it against
    /// their shutdown signal.
    pub async fn wait_active(&self) {
        let mut receiver = self.sender.subscribe();
        if receiver.wait_for(Lifecycle::is_active).await.is_err() {
            // Sender lives as long as self, so this is unreachable in practice
            std::future::pending::<()>().await;
        }
    }
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}
