//! Tests for graceful shutdown handling

use super::shutdown::*;
use crate::controller::{ControllerState, Leadership, Lifecycle};
use std::time::Duration;

/// Test that shutdown channel works correctly
#[tokio::test]
async fn test_shutdown_channel_initially_not_shutdown() {
    let (_controller, signal) = shutdown_channel();

    // Initially not shutdown
    assert!(!signal.is_shutdown());
}

/// Test that shutdown can be triggered
#[tokio::test]
async fn test_shutdown_channel_triggers_shutdown() {
    let (controller, signal) = shutdown_channel();

    assert!(!signal.is_shutdown());

    controller.shutdown();

    assert!(signal.is_shutdown());
}

/// Test that wait completes when shutdown is triggered
#[tokio::test]
async fn test_shutdown_wait_completes_on_signal() {
    let (controller, mut signal) = shutdown_channel();

    // Spawn task that triggers shutdown after delay
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.shutdown();
    });

    // This should complete when shutdown is triggered
    let result = tokio::time::timeout(Duration::from_secs(1), signal.wait()).await;

    assert!(
        result.is_ok(),
        "wait() should complete when shutdown triggered"
    );
    assert!(signal.is_shutdown());
}

/// Test that cloned signals all receive shutdown
#[tokio::test]
async fn test_shutdown_signal_clones_share_state() {
    let (controller, signal) = shutdown_channel();
    let signal2 = signal.clone();
    let signal3 = signal.clone();

    assert!(!signal.is_shutdown());
    assert!(!signal2.is_shutdown());
    assert!(!signal3.is_shutdown());

    controller.shutdown();

    assert!(signal.is_shutdown());
    assert!(signal2.is_shutdown());
    assert!(signal3.is_shutdown());
}

/// Test that wait returns when the controller is dropped
#[tokio::test]
async fn test_shutdown_wait_completes_when_controller_dropped() {
    let (controller, mut signal) = shutdown_channel();
    drop(controller);

    let result = tokio::time::timeout(Duration::from_secs(1), signal.wait()).await;
    assert!(result.is_ok());
}

#[test]
fn test_exit_codes() {
    assert_eq!(ShutdownOutcome::Graceful.exit_code(), 0);
    assert_ne!(ShutdownOutcome::Forced.exit_code(), 0);
    assert_ne!(ShutdownOutcome::TimedOut.exit_code(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordinator drain race
// ─────────────────────────────────────────────────────────────────────────────

fn running_state() -> ControllerState {
    let state = ControllerState::new();
    state.set_leadership(Leadership::Active);
    state
}

/// Task that exits as soon as shutdown is broadcast
fn cooperative_task(mut signal: ShutdownSignal) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        signal.wait().await;
    })
}

#[tokio::test(start_paused = true)]
async fn test_drain_graceful_when_all_tasks_acknowledge() {
    let (controller, signal) = shutdown_channel();
    let state = running_state();

    let mut coordinator = ShutdownCoordinator::new(controller, state.clone(), DEFAULT_GRACE_PERIOD);
    coordinator.track_all((0..3).map(|_| cooperative_task(signal.clone())));

    let started = tokio::time::Instant::now();
    let outcome = coordinator.drain(std::future::pending::<()>()).await;

    assert_eq!(outcome, ShutdownOutcome::Graceful);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(signal.is_shutdown());
    assert_eq!(state.lifecycle(), Lifecycle::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_drain_times_out_on_wedged_task() {
    let (controller, signal) = shutdown_channel();
    let state = running_state();
    let grace = Duration::from_secs(30);

    let mut coordinator = ShutdownCoordinator::new(controller, state.clone(), grace);
    coordinator.track(cooperative_task(signal.clone()));
    // Never acknowledges
    coordinator.track(tokio::spawn(std::future::pending::<()>()));

    let started = tokio::time::Instant::now();
    let outcome = coordinator.drain(std::future::pending::<()>()).await;

    assert_eq!(outcome, ShutdownOutcome::TimedOut);
    let elapsed = started.elapsed();
    assert!(elapsed >= grace, "must wait the full grace period");
    assert!(elapsed < grace + Duration::from_secs(1), "must not exceed the deadline");
    assert_eq!(state.lifecycle(), Lifecycle::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_second_signal_forces_exit() {
    let (controller, _signal) = shutdown_channel();
    let state = running_state();

    let mut coordinator = ShutdownCoordinator::new(controller, state.clone(), DEFAULT_GRACE_PERIOD);
    coordinator.track(tokio::spawn(std::future::pending::<()>()));

    let (second_tx, second_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let _ = second_tx.send(());
    });

    let started = tokio::time::Instant::now();
    let outcome = coordinator
        .drain(async move {
            let _ = second_rx.await;
        })
        .await;

    assert_eq!(outcome, ShutdownOutcome::Forced);
    assert!(started.elapsed() < DEFAULT_GRACE_PERIOD);
    assert_eq!(state.lifecycle(), Lifecycle::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_drain_with_no_tasks_is_graceful() {
    let (controller, _signal) = shutdown_channel();
    let coordinator = ShutdownCoordinator::new(controller, running_state(), DEFAULT_GRACE_PERIOD);

    assert_eq!(
        coordinator.drain(std::future::pending::<()>()).await,
        ShutdownOutcome::Graceful
    );
}
