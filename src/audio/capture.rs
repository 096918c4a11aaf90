use super::{AudioInput, ChannelExtractor, SampleBlock};
use crate::error::{EdgeError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, SupportedStreamConfig};
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Input device configuration
#[derive(Debug, Clone)]
pub struct InputDeviceConfig {
    pub sample_rate: u32,
    /// Substring of the device name, `None` for the default device
    pub device_name: Option<String>,
    /// Oldest samples are dropped once this much audio is buffered
    pub max_buffered: Duration,
}

impl Default for InputDeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            device_name: None,
            max_buffered: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct CaptureBuffer {
    samples: VecDeque<i16>,
    overruns: usize,
    failure: Option<String>,
}

type SharedBuffer = Arc<Mutex<CaptureBuffer>>;

/// Microphone handle. The cpal stream lives on its own thread so the handle is `Send`.
pub struct CpalInput {
    sample_rate: u32,
    buffer: SharedBuffer,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalInput {
    pub fn open(config: InputDeviceConfig) -> Result<Self> {
        log::info!("Initializing audio capture with config: {:?}", config);

        let buffer: SharedBuffer = Arc::new(Mutex::new(CaptureBuffer::default()));
        let thread_buffer = Arc::clone(&buffer);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("audio-input".to_string())
            .spawn(move || {
                let stream = match Self::start_stream(&config, thread_buffer) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until the handle is closed or dropped
                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("Audio input thread exiting");
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| EdgeError::Device("Audio input thread exited during setup".into()))??;

        Ok(Self {
            sample_rate,
            buffer,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    fn start_stream(config: &InputDeviceConfig, buffer: SharedBuffer) -> Result<(Stream, u32)> {
        let host = cpal::default_host();
        log::info!("Using audio host: {}", host.id().name());

        let device = Self::get_input_device(&host, config.device_name.as_deref())?;
        let device_name = device
            .name()
            .map_err(|e| EdgeError::Device(format!("Failed to get device name: {}", e)))?;
        log::info!("Using input device: {}", device_name);

        let supported = Self::configure_stream(&device, config.sample_rate)?;
        let stream_config = supported.config();
        let sample_rate = stream_config.sample_rate.0;
        let extractor = ChannelExtractor::new(0, stream_config.channels as usize)?;
        let max_samples = (config.max_buffered.as_secs_f64() * sample_rate as f64) as usize;

        let stream = match supported.sample_format() {
            SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &stream_config, extractor, buffer, max_samples)?
            }
            SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &stream_config, extractor, buffer, max_samples)?
            }
            SampleFormat::I32 => {
                Self::build_stream::<i32>(&device, &stream_config, extractor, buffer, max_samples)?
            }
            SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &stream_config, extractor, buffer, max_samples)?
            }
            format => {
                return Err(EdgeError::Device(format!(
                    "Unsupported input sample format: {:?}",
                    format
                )))
            }
        };

        stream
            .play()
            .map_err(|e| EdgeError::Device(format!("Failed to start audio stream: {}", e)))?;

        log::info!(
            "Audio capture started: {} channels @ {}Hz ({:?})",
            stream_config.channels,
            sample_rate,
            supported.sample_format()
        );
        Ok((stream, sample_rate))
    }

    fn get_input_device(host: &cpal::Host, device_name: Option<&str>) -> Result<Device> {
        match device_name {
            Some(wanted) => {
                let devices = host.input_devices().map_err(|e| {
                    EdgeError::Device(format!("Failed to enumerate input devices: {}", e))
                })?;
                for device in devices {
                    if device.name().map(|n| n.contains(wanted)).unwrap_or(false) {
                        return Ok(device);
                    }
                }
                Err(EdgeError::Device(format!(
                    "Input device '{}' not found",
                    wanted
                )))
            }
            None => host
                .default_input_device()
                .ok_or_else(|| EdgeError::Device("No default input device available".into())),
        }
    }

    /// Prefer mono at the requested rate, then any channel count at that rate,
    /// then the device default (the capture pipeline resamples from there).
    fn configure_stream(device: &Device, sample_rate: u32) -> Result<SupportedStreamConfig> {
        let supported_configs: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| EdgeError::Device(format!("Failed to get supported configs: {}", e)))?
            .collect();

        let supports_rate = |range: &cpal::SupportedStreamConfigRange| {
            range.min_sample_rate().0 <= sample_rate && range.max_sample_rate().0 >= sample_rate
        };

        if let Some(range) = supported_configs
            .iter()
            .find(|range| range.channels() == 1 && supports_rate(range))
            .or_else(|| supported_configs.iter().find(|range| supports_rate(range)))
        {
            return Ok(range.clone().with_sample_rate(cpal::SampleRate(sample_rate)));
        }

        let fallback = device
            .default_input_config()
            .map_err(|e| EdgeError::Device(format!("No usable input config: {}", e)))?;
        log::warn!(
            "Input device does not support {}Hz, capturing at {}Hz",
            sample_rate,
            fallback.sample_rate().0
        );
        Ok(fallback)
    }

    fn build_stream<T>(
        device: &Device,
        config: &cpal::StreamConfig,
        extractor: ChannelExtractor,
        buffer: SharedBuffer,
        max_samples: usize,
    ) -> Result<Stream>
    where
        T: SizedSample + Send + 'static,
        i16: FromSample<T>,
    {
        let error_buffer = Arc::clone(&buffer);

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let mut guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                    let converted = data.iter().map(|s| s.to_sample::<i16>()).collect::<Vec<_>>();
                    extractor.extract_into(&converted, &mut guard.samples);

                    let excess = guard.samples.len().saturating_sub(max_samples);
                    if excess > 0 {
                        guard.samples.drain(..excess);
                        guard.overruns += 1;
                    }
                },
                move |err| {
                    log::error!("Audio input stream error: {}", err);
                    let mut guard = error_buffer.lock().unwrap_or_else(PoisonError::into_inner);
                    guard.failure = Some(err.to_string());
                },
                None,
            )
            .map_err(|e| EdgeError::Device(format!("Failed to build input stream: {}", e)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CaptureBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioInput for CpalInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn available(&self) -> Result<usize> {
        let guard = self.lock();
        if let Some(failure) = &guard.failure {
            return Err(EdgeError::Device(failure.clone()));
        }
        if self.stop_tx.is_none() {
            return Err(EdgeError::Device("Audio input is closed".into()));
        }
        Ok(guard.samples.len())
    }

    fn read(&mut self, frames: usize) -> Result<SampleBlock> {
        let mut guard = self.lock();
        if let Some(failure) = &guard.failure {
            return Err(EdgeError::Device(failure.clone()));
        }
        if guard.overruns > 0 {
            log::warn!("Audio input overran {} times, oldest audio dropped", guard.overruns);
            guard.overruns = 0;
        }
        let take = frames.min(guard.samples.len());
        let samples: Vec<i16> = guard.samples.drain(..take).collect();
        Ok(SampleBlock::new(samples, self.sample_rate))
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            log::info!("Stopping audio capture");
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Audio input thread panicked");
            }
        }
        self.lock().samples.clear();
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}
