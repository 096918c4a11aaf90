use crate::assistant::ControlCommand;
use crate::error::{EdgeError, Result};
use crate::interrupt::InterruptSignal;
use std::io::{BufRead, BufReader, Stdin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use wakeword_protocol::WakewordClient;

/// Producer of wake phrase detections
pub trait WakeEventSource: Send {
    /// Block until the wake phrase is heard. `Ok(None)` means nothing was
    /// heard within the source's own timeout; errors are fatal to the source.
    fn wait_for_wake(&mut self) -> Result<Option<String>>;
}

/// Detections from a wakeword detector service over TCP
pub struct TcpWakeSource {
    client: WakewordClient,
}

impl TcpWakeSource {
    pub fn connect(address: &str) -> Result<Self> {
        let mut client = WakewordClient::connect(address, Duration::from_millis(500))?;
        client.subscribe()?;
        Ok(Self { client })
    }
}

impl WakeEventSource for TcpWakeSource {
    fn wait_for_wake(&mut self) -> Result<Option<String>> {
        Ok(self.client.next_wakeword()?.map(|event| {
            format!("{} ({:.2})", event.model_name, event.confidence)
        }))
    }
}

/// Enter on stdin stands in for the wake phrase
pub struct ConsoleWakeSource<R> {
    input: R,
    line: String,
}

impl ConsoleWakeSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(std::io::stdin()))
    }
}

impl<R: BufRead> ConsoleWakeSource<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: String::new(),
        }
    }
}

impl<R: BufRead + Send> WakeEventSource for ConsoleWakeSource<R> {
    fn wait_for_wake(&mut self) -> Result<Option<String>> {
        self.line.clear();
        if self.input.read_line(&mut self.line)? == 0 {
            return Err(EdgeError::Wake("console input closed".to_string()));
        }
        Ok(Some("console".to_string()))
    }
}

/// Turns wake detections into session starts or interrupts
pub struct WakeListener {
    source: Box<dyn WakeEventSource>,
    commands: mpsc::UnboundedSender<ControlCommand>,
    interrupt: InterruptSignal,
    session_active: watch::Receiver<bool>,
    cooldown: Duration,
    last_trigger: Option<Instant>,
    shutdown: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeAction {
    Start,
    Interrupt,
    Ignored,
}

impl WakeListener {
    pub fn new(
        source: Box<dyn WakeEventSource>,
        commands: mpsc::UnboundedSender<ControlCommand>,
        interrupt: InterruptSignal,
        session_active: watch::Receiver<bool>,
        cooldown: Duration,
    ) -> Self {
        Self {
            source,
            commands,
            interrupt,
            session_active,
            cooldown,
            last_trigger: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the listener after its current wait
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn spawn(self) -> Result<thread::JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("wake-listener".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    fn run(mut self) {
        log::info!("Wake listener started");

        while !self.shutdown.load(Ordering::Acquire) {
            match self.source.wait_for_wake() {
                Ok(Some(detail)) => {
                    log::info!("Wake phrase detected: {}", detail);
                    self.on_wake(Instant::now());
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("Wake source failed: {}", e);
                    let _ = self.commands.send(ControlCommand::Shutdown);
                    break;
                }
            }
            if self.commands.is_closed() {
                break;
            }
        }

        log::info!("Wake listener stopped");
    }

    /// Idle: start a session. Active: interrupt it.
    pub fn on_wake(&mut self, now: Instant) -> WakeAction {
        if let Some(last) = self.last_trigger {
            if now.saturating_duration_since(last) < self.cooldown {
                log::debug!("Wake phrase within cooldown, ignoring");
                return WakeAction::Ignored;
            }
        }
        self.last_trigger = Some(now);

        if *self.session_active.borrow() {
            log::info!("Session active, requesting interrupt");
            self.interrupt.set();
            WakeAction::Interrupt
        } else if self.commands.send(ControlCommand::Start).is_ok() {
            WakeAction::Start
        } else {
            WakeAction::Ignored
        }
    }
}
