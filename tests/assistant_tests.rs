//! # Assistant Tests
//!
//! Controller behaviour across sessions: start, stop, stale starts, shutdown,
//! and the wake listener driving it end to end.

mod common;

use common::{test_config, FakeBackend, FakeConnector};
use skyvoice_edge::assistant::{Assistant, ControlCommand};
use skyvoice_edge::config::AppConfig;
use skyvoice_edge::interrupt::InterruptSignal;
use skyvoice_edge::session::TerminationCause;
use skyvoice_edge::wake::{WakeEventSource, WakeListener};
use skyvoice_edge::{EdgeError, Result};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

struct Controller {
    commands: mpsc::UnboundedSender<ControlCommand>,
    activity: watch::Receiver<bool>,
    connector: FakeConnector,
    interrupt: InterruptSignal,
    handle: JoinHandle<Vec<TerminationCause>>,
}

fn spawn_assistant(config: AppConfig) -> Controller {
    let connector = FakeConnector::default();
    let interrupt = InterruptSignal::new();
    let (assistant, commands) = Assistant::new(
        config,
        Arc::new(FakeBackend::draining()),
        Arc::new(connector.clone()),
        interrupt.clone(),
    );
    let activity = assistant.activity();
    let handle = tokio::spawn(assistant.run());
    Controller {
        commands,
        activity,
        connector,
        interrupt,
        handle,
    }
}

async fn wait_for_activity(activity: &mut watch::Receiver<bool>, active: bool) {
    tokio::time::timeout(Duration::from_secs(5), activity.wait_for(|a| *a == active))
        .await
        .expect("activity did not change")
        .unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_start_then_stop_returns_to_listening() {
    let mut controller = spawn_assistant(test_config());

    controller.commands.send(ControlCommand::Start).unwrap();
    wait_for_activity(&mut controller.activity, true).await;
    controller.connector.wait_for_audio().await;

    controller.commands.send(ControlCommand::Stop).unwrap();
    wait_for_activity(&mut controller.activity, false).await;

    controller.commands.send(ControlCommand::Shutdown).unwrap();
    let outcomes = controller.handle.await.unwrap();
    assert_eq!(outcomes, vec![TerminationCause::StopRequested]);
    assert_eq!(controller.connector.connects(), 1);
    assert_eq!(controller.connector.closes(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_starts_during_active_session_are_discarded() {
    let mut controller = spawn_assistant(test_config());

    controller.commands.send(ControlCommand::Start).unwrap();
    wait_for_activity(&mut controller.activity, true).await;
    controller.connector.wait_for_audio().await;

    controller.commands.send(ControlCommand::Start).unwrap();
    controller.commands.send(ControlCommand::Start).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    controller.commands.send(ControlCommand::Stop).unwrap();
    wait_for_activity(&mut controller.activity, false).await;

    // Give any wrongly queued start a chance to open a second session
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!*controller.activity.borrow());
    assert_eq!(controller.connector.connects(), 1);

    controller.commands.send(ControlCommand::Shutdown).unwrap();
    assert_eq!(controller.handle.await.unwrap().len(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_stale_interrupt_cleared_at_session_start() {
    let mut controller = spawn_assistant(test_config());
    controller.interrupt.set();

    controller.commands.send(ControlCommand::Start).unwrap();
    wait_for_activity(&mut controller.activity, true).await;
    controller.connector.wait_for_audio().await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(*controller.activity.borrow());

    controller.commands.send(ControlCommand::Shutdown).unwrap();
    let outcomes = controller.handle.await.unwrap();
    assert_eq!(outcomes, vec![TerminationCause::StopRequested]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_sequential_sessions_each_get_a_connection() {
    let mut controller = spawn_assistant(test_config());

    for _ in 0..3 {
        controller.commands.send(ControlCommand::Start).unwrap();
        wait_for_activity(&mut controller.activity, true).await;
        controller.commands.send(ControlCommand::Stop).unwrap();
        wait_for_activity(&mut controller.activity, false).await;
    }

    drop(controller.commands);
    let outcomes = controller.handle.await.unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(controller.connector.connects(), controller.connector.closes());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_dropping_all_senders_ends_idle_assistant() {
    let controller = spawn_assistant(test_config());
    drop(controller.commands);
    let outcomes = controller.handle.await.unwrap();
    assert!(outcomes.is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_shutdown_during_session_stops_it() {
    let mut controller = spawn_assistant(test_config());

    controller.commands.send(ControlCommand::Start).unwrap();
    wait_for_activity(&mut controller.activity, true).await;
    controller.commands.send(ControlCommand::Shutdown).unwrap();

    let outcomes = controller.handle.await.unwrap();
    assert_eq!(outcomes, vec![TerminationCause::StopRequested]);
    assert!(!*controller.activity.borrow());
}

/// Wake phrase delivered by the test through a channel
struct ChannelWakeSource {
    wakes: std_mpsc::Receiver<()>,
}

impl WakeEventSource for ChannelWakeSource {
    fn wait_for_wake(&mut self) -> Result<Option<String>> {
        match self.wakes.recv_timeout(Duration::from_millis(20)) {
            Ok(()) => Ok(Some("test".to_string())),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                Err(EdgeError::Wake("wake source closed".to_string()))
            }
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_wake_starts_session_and_second_wake_interrupts() {
    let mut controller = spawn_assistant(test_config());

    let (wake_tx, wakes) = std_mpsc::channel();
    let listener = WakeListener::new(
        Box::new(ChannelWakeSource { wakes }),
        controller.commands.clone(),
        controller.interrupt.clone(),
        controller.activity.clone(),
        Duration::ZERO,
    );
    let listener_thread = listener.spawn().unwrap();

    wake_tx.send(()).unwrap();
    wait_for_activity(&mut controller.activity, true).await;
    controller.connector.wait_for_audio().await;

    // Barge-in while the session is open
    wake_tx.send(()).unwrap();
    wait_for_activity(&mut controller.activity, false).await;

    // Losing the wake source shuts the controller down
    drop(wake_tx);
    let outcomes = tokio::time::timeout(Duration::from_secs(5), controller.handle)
        .await
        .expect("assistant did not shut down")
        .unwrap();
    assert_eq!(outcomes, vec![TerminationCause::Interrupted]);
    assert!(!controller.interrupt.is_set());

    listener_thread.join().unwrap();
}
