//! Fake devices and an in-memory transport for driving sessions in tests.
#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use skyvoice_edge::audio::{AudioBackend, AudioInput, AudioOutput, PlaybackQueue, SampleBlock};
use skyvoice_edge::config::AppConfig;
use skyvoice_edge::transport::{ClientEvent, Connector, EventSink, EventStream, ServerEvent};
use skyvoice_edge::{EdgeError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Small blocks at the transport rate so no resampling happens
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.audio.capture_rate = 24_000;
    config.audio.transport_rate = 24_000;
    config.audio.capture_block = 240;
    config.audio.ack_beep = false;
    config
}

pub fn audio_delta(samples: usize) -> ServerEvent {
    let bytes: Vec<u8> = (0..samples)
        .flat_map(|i| ((i as i16) * 10).to_le_bytes())
        .collect();
    ServerEvent::AudioDelta {
        delta: STANDARD.encode(bytes),
    }
}

#[derive(Debug, Default)]
pub struct DeviceCounters {
    pub input_opens: AtomicUsize,
    pub input_closes: AtomicUsize,
    pub output_opens: AtomicUsize,
    pub output_closes: AtomicUsize,
    /// Threads that ran each device close
    pub close_threads: Mutex<Vec<ThreadId>>,
}

impl DeviceCounters {
    fn record_close(&self, closes: &AtomicUsize) {
        closes.fetch_add(1, Ordering::SeqCst);
        self.close_threads.lock().unwrap().push(thread::current().id());
    }
}

/// Opens clock-driven fake devices and counts every open and close
#[derive(Default)]
pub struct FakeBackend {
    pub counters: Arc<DeviceCounters>,
    /// Output callback pulls the queue like a real device
    pub drain_output: bool,
    pub fail_input_open: bool,
    /// Makes the open input report a device failure
    pub input_failure: Arc<AtomicBool>,
    /// Makes the open output report a device failure
    pub output_failure: Arc<AtomicBool>,
}

impl FakeBackend {
    pub fn draining() -> Self {
        Self {
            drain_output: true,
            ..Default::default()
        }
    }

    pub fn input_closes(&self) -> usize {
        self.counters.input_closes.load(Ordering::SeqCst)
    }

    pub fn output_closes(&self) -> usize {
        self.counters.output_closes.load(Ordering::SeqCst)
    }

    pub fn close_threads(&self) -> Vec<ThreadId> {
        self.counters.close_threads.lock().unwrap().clone()
    }
}

impl AudioBackend for FakeBackend {
    fn open_input(&self, config: &skyvoice_edge::config::AudioConfig) -> Result<Box<dyn AudioInput>> {
        if self.fail_input_open {
            return Err(EdgeError::Device("no microphone".to_string()));
        }
        self.counters.input_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInput {
            sample_rate: config.capture_rate,
            started: Instant::now(),
            consumed: 0,
            closed: false,
            failure: Arc::clone(&self.input_failure),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn open_output(
        &self,
        config: &skyvoice_edge::config::AudioConfig,
        queue: PlaybackQueue,
    ) -> Result<Box<dyn AudioOutput>> {
        self.counters.output_opens.fetch_add(1, Ordering::SeqCst);
        let stop = CancellationToken::new();
        if self.drain_output {
            let period = config.playback_period;
            let frames = config.playback_frames(config.transport_rate);
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut scratch = vec![0i16; frames];
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(period) => {
                            queue.pull_into(&mut scratch);
                        }
                    }
                }
            });
        }
        Ok(Box::new(FakeOutput {
            sample_rate: config.transport_rate,
            stop,
            failure: Arc::clone(&self.output_failure),
            counters: Arc::clone(&self.counters),
        }))
    }
}

/// Microphone producing frames in step with the tokio clock
pub struct FakeInput {
    sample_rate: u32,
    started: Instant,
    consumed: usize,
    closed: bool,
    failure: Arc<AtomicBool>,
    counters: Arc<DeviceCounters>,
}

impl AudioInput for FakeInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn available(&self) -> Result<usize> {
        if self.failure.load(Ordering::SeqCst) {
            return Err(EdgeError::Device("microphone unplugged".to_string()));
        }
        if self.closed {
            return Err(EdgeError::Device("closed".to_string()));
        }
        let produced = (self.started.elapsed().as_secs_f64() * self.sample_rate as f64) as usize;
        Ok(produced.saturating_sub(self.consumed))
    }

    fn read(&mut self, frames: usize) -> Result<SampleBlock> {
        let take = frames.min(self.available()?);
        self.consumed += take;
        Ok(SampleBlock::new(vec![1000; take], self.sample_rate))
    }

    // Every call is counted so double closes show up in tests
    fn close(&mut self) {
        self.closed = true;
        self.counters.record_close(&self.counters.input_closes);
    }
}

pub struct FakeOutput {
    sample_rate: u32,
    stop: CancellationToken,
    failure: Arc<AtomicBool>,
    counters: Arc<DeviceCounters>,
}

impl AudioOutput for FakeOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn check(&self) -> Result<()> {
        if self.failure.load(Ordering::SeqCst) {
            return Err(EdgeError::Device("speaker unplugged".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.stop.cancel();
        self.counters.record_close(&self.counters.output_closes);
    }
}

#[derive(Default)]
struct ConnectorState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    fail: AtomicBool,
    reject_sends: AtomicBool,
    sent: Mutex<Vec<ClientEvent>>,
    senders: Mutex<Vec<mpsc::UnboundedSender<ServerEvent>>>,
}

/// In-memory realtime service. Each connect opens a fresh event channel;
/// tests inject server events into the most recent one.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<ConnectorState>,
}

impl FakeConnector {
    pub fn failing() -> Self {
        let connector = Self::default();
        connector.state.fail.store(true, Ordering::SeqCst);
        connector
    }

    /// Connects, then fails every send, starting with the handshake
    pub fn rejecting_sends() -> Self {
        let connector = Self::default();
        connector.state.reject_sends.store(true, Ordering::SeqCst);
        connector
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<ClientEvent> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn audio_blocks_sent(&self) -> Vec<Vec<i16>> {
        self.sent()
            .into_iter()
            .filter_map(|event| match event {
                ClientEvent::InputAudioAppend { audio } => {
                    let bytes = STANDARD.decode(audio).unwrap();
                    Some(
                        bytes
                            .chunks_exact(2)
                            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                            .collect(),
                    )
                }
                _ => None,
            })
            .collect()
    }

    pub fn push_event(&self, event: ServerEvent) {
        let senders = self.state.senders.lock().unwrap();
        senders
            .last()
            .expect("no connection open")
            .send(event)
            .expect("event stream dropped");
    }

    /// Server side hangs up
    pub fn drop_connection(&self) {
        self.state.senders.lock().unwrap().clear();
    }

    /// Wait until a session has connected and streamed some audio
    pub async fn wait_for_audio(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.audio_blocks_sent().is_empty() {
            assert!(Instant::now() < deadline, "no audio reached the transport");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<(Box<dyn EventSink>, Box<dyn EventStream>)> {
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(EdgeError::Transport("connection refused".to_string()));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.senders.lock().unwrap().push(tx);
        Ok((
            Box::new(FakeSink {
                state: Arc::clone(&self.state),
                closed: false,
            }),
            Box::new(FakeEvents { rx }),
        ))
    }
}

struct FakeSink {
    state: Arc<ConnectorState>,
    closed: bool,
}

#[async_trait]
impl EventSink for FakeSink {
    async fn send(&mut self, event: ClientEvent) -> Result<()> {
        if self.closed {
            return Err(EdgeError::Transport("closed".to_string()));
        }
        if self.state.reject_sends.load(Ordering::SeqCst) {
            return Err(EdgeError::Transport("broken pipe".to_string()));
        }
        self.state.sent.lock().unwrap().push(event);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeEvents {
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

#[async_trait]
impl EventStream for FakeEvents {
    async fn next_event(&mut self) -> Option<Result<ServerEvent>> {
        self.rx.recv().await.map(Ok)
    }
}
