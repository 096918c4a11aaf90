use crate::audio::AudioBackend;
use crate::config::AppConfig;
use crate::interrupt::InterruptSignal;
use crate::session::{Session, TerminationCause};
use crate::transport::Connector;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Process-level controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Wake event accepted: open a session
    Start,
    /// End the active session
    Stop,
    /// End the active session and exit
    Shutdown,
}

/// Runs at most one [`Session`] at a time in response to control commands
pub struct Assistant {
    config: AppConfig,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    interrupt: InterruptSignal,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
    active_tx: watch::Sender<bool>,
    sessions: usize,
}

impl Assistant {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
        interrupt: InterruptSignal,
    ) -> (Self, mpsc::UnboundedSender<ControlCommand>) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (active_tx, _) = watch::channel(false);
        (
            Self {
                config,
                backend,
                connector,
                interrupt,
                commands,
                active_tx,
                sessions: 0,
            },
            command_tx,
        )
    }

    /// True while a session is open (not LISTENING)
    pub fn activity(&self) -> watch::Receiver<bool> {
        self.active_tx.subscribe()
    }

    /// Serve commands until `Shutdown` or until every sender is gone.
    /// Returns how each session ended.
    pub async fn run(mut self) -> Vec<TerminationCause> {
        let mut outcomes = Vec::new();
        log::info!("Assistant: Listening for wake events");

        loop {
            match self.commands.recv().await {
                Some(ControlCommand::Start) => {
                    let (cause, shutdown) = self.run_session().await;
                    outcomes.push(cause);
                    if shutdown {
                        break;
                    }
                    log::info!("Assistant: Listening for wake events");
                }
                Some(ControlCommand::Stop) => log::debug!("Assistant: No active session to stop"),
                Some(ControlCommand::Shutdown) | None => break,
            }
        }

        log::info!("Assistant: Shutting down after {} sessions", self.sessions);
        outcomes
    }

    async fn run_session(&mut self) -> (TerminationCause, bool) {
        self.sessions += 1;
        log::info!("Assistant: Starting session {}", self.sessions);

        // A stale barge-in from the previous session must not end this one
        self.interrupt.clear();
        self.active_tx.send_replace(true);

        let session = Arc::new(Session::new(
            self.config.clone(),
            Arc::clone(&self.backend),
            Arc::clone(&self.connector),
            self.interrupt.clone(),
        ));
        let runner = Arc::clone(&session);
        let mut handle = tokio::spawn(async move { runner.run().await });

        let mut shutdown = false;
        let mut commands_open = true;
        let cause = loop {
            tokio::select! {
                joined = &mut handle => {
                    break joined.unwrap_or_else(|e| {
                        log::error!("Assistant: Session task failed: {}", e);
                        TerminationCause::StopRequested
                    });
                }
                command = self.commands.recv(), if commands_open => match command {
                    Some(ControlCommand::Start) => {
                        log::debug!("Assistant: Session already active, ignoring start");
                    }
                    Some(ControlCommand::Stop) => session.stop().await,
                    Some(ControlCommand::Shutdown) => {
                        shutdown = true;
                        session.stop().await;
                    }
                    None => {
                        commands_open = false;
                        shutdown = true;
                        session.stop().await;
                    }
                },
            }
        };

        self.active_tx.send_replace(false);

        // Starts queued before LISTENING resumed belong to the old session
        while let Ok(command) = self.commands.try_recv() {
            match command {
                ControlCommand::Start => log::debug!("Assistant: Discarding stale start"),
                ControlCommand::Stop => {}
                ControlCommand::Shutdown => shutdown = true,
            }
        }

        (cause, shutdown)
    }
}
