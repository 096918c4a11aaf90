//! One conversation with the realtime service.
//!
//! A [`Session`] opens the audio devices and a transport connection, then runs
//! the capture pipeline, the transport send and receive loops and the
//! interrupt poller concurrently until one of them ends it. Every ending goes
//! through [`Session::terminate`], which tears everything down exactly once.

mod capture;
mod inbound;
pub mod state;

pub use state::{
    transition, Effect, SessionEvent, SessionState, SessionStateMachine, TerminationCause,
};

use crate::audio::{tone, AudioBackend, AudioInput, AudioOutput, PlaybackQueue, SampleBlock};
use crate::config::AppConfig;
use crate::error::{EdgeError, Result};
use crate::interrupt::InterruptSignal;
use crate::resampler::StreamResampler;
use crate::transport::{ClientEvent, Connector, EventSink, EventStream};
use capture::CapturePipeline;
use inbound::InboundHandler;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Resampler chunk for the response audio path (20 ms at 24 kHz)
const PLAYBACK_RESAMPLE_CHUNK: usize = 480;
/// Capture blocks buffered while the connection is being established
const OUTBOUND_CAPACITY: usize = 64;

type InputSlot = Mutex<Option<Box<dyn AudioInput>>>;

pub struct Session {
    config: AppConfig,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    interrupt: InterruptSignal,
    machine: SessionStateMachine,
    queue: PlaybackQueue,
    cancel: CancellationToken,
    input: InputSlot,
    output: Mutex<Option<Box<dyn AudioOutput>>>,
    sink: tokio::sync::Mutex<Option<Box<dyn EventSink>>>,
    cause: Mutex<Option<TerminationCause>>,
}

impl Session {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
        interrupt: InterruptSignal,
    ) -> Self {
        Self {
            config,
            backend,
            connector,
            interrupt,
            machine: SessionStateMachine::new(),
            queue: PlaybackQueue::new(),
            cancel: CancellationToken::new(),
            input: Mutex::new(None),
            output: Mutex::new(None),
            sink: tokio::sync::Mutex::new(None),
            cause: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn send_enabled(&self) -> bool {
        self.machine.send_enabled()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.machine.subscribe()
    }

    pub fn last_response(&self) -> tokio::time::Instant {
        self.machine.last_response()
    }

    /// Response audio waiting for the speaker
    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    /// Run the session until it terminates and return why it ended.
    /// The session is back in LISTENING when this returns.
    pub async fn run(&self) -> TerminationCause {
        self.apply(SessionEvent::Start);
        log::info!("Session: Started");

        if self.cancel.is_cancelled() {
            log::info!("Session: Stopped before devices were opened");
        } else {
            self.run_until_terminated().await;
        }

        let cause = self
            .cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(TerminationCause::StopRequested);

        self.apply(SessionEvent::Resume);
        if cause.is_error() {
            log::warn!("Session: Ended with {}", cause);
        } else {
            log::info!("Session: Ended ({})", cause);
        }
        cause
    }

    async fn run_until_terminated(&self) {
        match self.open_devices() {
            Ok((capture, inbound)) => {
                let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
                tokio::join!(
                    capture.run(self, outbound_tx),
                    self.run_transport(inbound, outbound_rx),
                    self.poll_interrupt(),
                );
            }
            Err(e) => {
                log::error!("Session: Failed to open audio devices: {}", e);
                self.terminate(TerminationCause::DeviceError(e.to_string()))
                    .await;
            }
        }
    }

    /// Explicit stop from the controller
    pub async fn stop(&self) {
        self.terminate(TerminationCause::StopRequested).await;
    }

    /// Single termination path. Returns true for the caller that performed
    /// the teardown; every later call is a no-op.
    pub async fn terminate(&self, cause: TerminationCause) -> bool {
        for effect in self.apply(SessionEvent::Terminate(cause)) {
            if let Effect::Teardown(cause) = effect {
                self.teardown(cause).await;
                return true;
            }
        }
        false
    }

    fn apply(&self, event: SessionEvent) -> Vec<Effect> {
        let effects = self.machine.apply(event);
        for effect in &effects {
            match effect {
                Effect::EnableSend => log::debug!("Session: Sending enabled"),
                Effect::DisableSend => log::debug!("Session: Sending suppressed while speaking"),
                Effect::ResetTimer | Effect::Teardown(_) => {}
            }
        }
        effects
    }

    async fn teardown(&self, cause: TerminationCause) {
        log::info!("Session: Terminating ({})", cause);
        *self.cause.lock().unwrap_or_else(PoisonError::into_inner) = Some(cause);
        self.cancel.cancel();

        let input = self.lock_input().take();
        let output = self
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if input.is_some() || output.is_some() {
            // Closing joins the device threads
            let closed = tokio::task::spawn_blocking(move || {
                if let Some(mut input) = input {
                    input.close();
                }
                if let Some(mut output) = output {
                    output.close();
                }
            })
            .await;
            if let Err(e) = closed {
                log::error!("Session: Closing audio devices failed: {}", e);
            }
        }
        self.queue.clear();

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                log::warn!("Session: Error closing connection: {}", e);
            }
        }
    }

    fn lock_input(&self) -> MutexGuard<'_, Option<Box<dyn AudioInput>>> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Errors once the speaker has failed. A closed or unopened slot is fine.
    fn check_output(&self) -> Result<()> {
        match self
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(output) => output.check(),
            None => Ok(()),
        }
    }

    async fn fail_output(&self, error: EdgeError) {
        log::error!("Session: Output device failed: {}", error);
        self.terminate(TerminationCause::DeviceError(error.to_string()))
            .await;
    }

    fn open_devices(&self) -> Result<(CapturePipeline, InboundHandler)> {
        let audio = &self.config.audio;

        let output = self.backend.open_output(audio, self.queue.clone())?;
        let output_rate = output.sample_rate();
        *self.output.lock().unwrap_or_else(PoisonError::into_inner) = Some(output);

        if audio.ack_beep {
            for block in tone::ack_beep(output_rate) {
                self.queue.push(block);
            }
        }

        let input = self.backend.open_input(audio)?;
        let input_rate = input.sample_rate();
        *self.lock_input() = Some(input);

        let capture = CapturePipeline::new(
            StreamResampler::new(input_rate, audio.transport_rate, audio.capture_block)?,
            audio.capture_block,
            self.config.timing.capture_poll,
            self.config.timing.inactivity_timeout,
        );
        let inbound = InboundHandler::new(
            StreamResampler::new(audio.transport_rate, output_rate, PLAYBACK_RESAMPLE_CHUNK)?,
            self.config.timing.drain_poll,
            self.config.timing.inactivity_timeout,
        );
        Ok((capture, inbound))
    }

    async fn run_transport(
        &self,
        inbound: InboundHandler,
        outbound: mpsc::Receiver<SampleBlock>,
    ) {
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return,
            connected = self.connect() => connected,
        };

        match connected {
            Ok(Some(events)) => {
                tokio::join!(self.send_loop(outbound), inbound.run(self, events));
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("Realtime: Failed to connect: {}", e);
                self.terminate(TerminationCause::TransportError(e.to_string()))
                    .await;
            }
        }
    }

    /// Open the connection and send the session handshake. Returns `None` when
    /// the session was torn down while connecting.
    async fn connect(&self) -> Result<Option<Box<dyn EventStream>>> {
        let (mut sink, events) = self.connector.connect().await?;
        let handshake = ClientEvent::SessionUpdate {
            session: self.config.session.clone(),
        };
        if let Err(e) = sink.send(handshake).await {
            if let Err(close_error) = sink.close().await {
                log::warn!("Session: Error closing connection: {}", close_error);
            }
            return Err(e);
        }

        let mut slot = self.sink.lock().await;
        if self.cancel.is_cancelled() {
            drop(slot);
            let _ = sink.close().await;
            return Ok(None);
        }
        *slot = Some(sink);
        log::info!("Realtime: Session configured");
        Ok(Some(events))
    }

    async fn send_loop(&self, mut outbound: mpsc::Receiver<SampleBlock>) {
        let mut state_rx = self.machine.subscribe();

        loop {
            let block = tokio::select! {
                _ = self.cancel.cancelled() => break,
                block = outbound.recv() => match block {
                    Some(block) => block,
                    None => break,
                },
            };

            // Suspend while the assistant is speaking
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                waited = state_rx.wait_for(|state| state.send_enabled()) => {
                    if waited.is_err() {
                        break;
                    }
                }
            }

            let result = {
                let mut slot = self.sink.lock().await;
                match slot.as_mut() {
                    Some(sink) => sink.send(ClientEvent::audio(&block)).await,
                    None => break,
                }
            };

            match result {
                Ok(()) => {
                    log::trace!("Realtime: Sent {} samples", block.len());
                    self.apply(SessionEvent::AudioSent);
                }
                Err(e) => {
                    log::error!("Realtime: Failed to send audio: {}", e);
                    self.terminate(TerminationCause::TransportError(e.to_string()))
                        .await;
                    break;
                }
            }
        }
    }

    async fn poll_interrupt(&self) {
        let poll = self.config.timing.interrupt_poll;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(poll) => {}
            }
            if let Err(e) = self.check_output() {
                self.fail_output(e).await;
                break;
            }
            if self.interrupt.is_set() {
                log::info!("Session: Interrupt received");
                self.terminate(TerminationCause::Interrupted).await;
                self.interrupt.clear();
                break;
            }
        }
    }
}
