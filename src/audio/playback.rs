use super::{AudioOutput, PlaybackQueue};
use crate::error::{EdgeError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, SupportedStreamConfig};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OutputDeviceConfig {
    pub sample_rate: u32,
    pub device_name: Option<String>,
    /// Callback period requested from the device
    pub period: Duration,
}

impl Default for OutputDeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            device_name: None,
            period: Duration::from_millis(50),
        }
    }
}

/// Stream error reported by the device callback
type FailureSlot = Arc<Mutex<Option<String>>>;

/// Speaker handle. The device callback drains the shared [`PlaybackQueue`]
/// every period and plays silence when it runs dry.
pub struct CpalOutput {
    sample_rate: u32,
    failure: FailureSlot,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalOutput {
    pub fn open(config: OutputDeviceConfig, queue: PlaybackQueue) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let failure: FailureSlot = Arc::new(Mutex::new(None));
        let thread_failure = Arc::clone(&failure);

        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match Self::start_stream(&config, queue, thread_failure) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = stop_rx.recv();
                if let Err(e) = stream.pause() {
                    log::debug!("AudioSink: Failed to pause stream on close: {}", e);
                }
                drop(stream);
                log::debug!("AudioSink: Audio thread exiting");
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| EdgeError::Device("Audio output thread exited during setup".into()))??;

        Ok(Self {
            sample_rate,
            failure,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    fn start_stream(
        config: &OutputDeviceConfig,
        queue: PlaybackQueue,
        failure: FailureSlot,
    ) -> Result<(Stream, u32)> {
        let host = cpal::default_host();
        log::debug!("AudioSink: Using audio host: {:?}", host.id());

        let device = match &config.device_name {
            Some(wanted) => host
                .output_devices()
                .map_err(|e| EdgeError::Device(e.to_string()))?
                .find(|d| d.name().map(|n| n.contains(wanted.as_str())).unwrap_or(false))
                .ok_or_else(|| {
                    EdgeError::Device(format!("Output device '{}' not found", wanted))
                })?,
            None => host
                .default_output_device()
                .ok_or_else(|| EdgeError::Device("No output device found".into()))?,
        };
        log::info!("AudioSink: Using output device: {:?}", device.name());

        let supported = Self::configure_stream(&device, config.sample_rate)?;
        let sample_rate = supported.sample_rate().0;
        let period_frames = (config.period.as_secs_f64() * sample_rate as f64).round() as u32;

        let mut stream_config = supported.config();
        stream_config.buffer_size = cpal::BufferSize::Fixed(period_frames);

        let stream = match Self::build_for_format(
            &device,
            &supported,
            &stream_config,
            queue.clone(),
            Arc::clone(&failure),
        ) {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!(
                    "AudioSink: Fixed {}-frame period rejected ({}), using device default",
                    period_frames,
                    e
                );
                stream_config.buffer_size = cpal::BufferSize::Default;
                Self::build_for_format(&device, &supported, &stream_config, queue, failure)?
            }
        };

        stream
            .play()
            .map_err(|e| EdgeError::Device(format!("Failed to start output stream: {}", e)))?;

        log::info!(
            "AudioSink: Hardware format - {}Hz, {}ch, {:?}",
            sample_rate,
            stream_config.channels,
            supported.sample_format()
        );
        Ok((stream, sample_rate))
    }

    fn configure_stream(device: &Device, sample_rate: u32) -> Result<SupportedStreamConfig> {
        let supported_configs: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| EdgeError::Device(e.to_string()))?
            .collect();

        let supports_rate = |range: &cpal::SupportedStreamConfigRange| {
            range.min_sample_rate().0 <= sample_rate && range.max_sample_rate().0 >= sample_rate
        };

        // Fallback: try stereo or whatever carries the rate
        if let Some(range) = supported_configs
            .iter()
            .find(|range| range.channels() == 1 && supports_rate(range))
            .or_else(|| supported_configs.iter().find(|range| supports_rate(range)))
        {
            return Ok(range.clone().with_sample_rate(cpal::SampleRate(sample_rate)));
        }

        let fallback = device
            .default_output_config()
            .map_err(|e| EdgeError::Device(e.to_string()))?;
        log::warn!(
            "AudioSink: Output device does not support {}Hz, playing at {}Hz",
            sample_rate,
            fallback.sample_rate().0
        );
        Ok(fallback)
    }

    fn build_for_format(
        device: &Device,
        supported: &SupportedStreamConfig,
        config: &cpal::StreamConfig,
        queue: PlaybackQueue,
        failure: FailureSlot,
    ) -> Result<Stream> {
        match supported.sample_format() {
            SampleFormat::I16 => Self::build_stream::<i16>(device, config, queue, failure),
            SampleFormat::U16 => Self::build_stream::<u16>(device, config, queue, failure),
            SampleFormat::I32 => Self::build_stream::<i32>(device, config, queue, failure),
            SampleFormat::F32 => Self::build_stream::<f32>(device, config, queue, failure),
            format => Err(EdgeError::Device(format!(
                "Unsupported output sample format: {:?}",
                format
            ))),
        }
    }

    fn build_stream<T>(
        device: &Device,
        config: &cpal::StreamConfig,
        queue: PlaybackQueue,
        failure: FailureSlot,
    ) -> Result<Stream>
    where
        T: SizedSample + FromSample<i16> + Send + 'static,
    {
        let channels = config.channels as usize;
        let mut mono: Vec<i16> = Vec::new();

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    if mono.len() != frames {
                        mono.resize(frames, 0);
                    }
                    queue.pull_into(&mut mono);

                    for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                        let value = T::from_sample(sample);
                        for channel in frame.iter_mut() {
                            *channel = value;
                        }
                    }
                },
                move |err| {
                    log::error!("AudioSink: Stream error: {}", err);
                    *failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
                },
                None,
            )
            .map_err(|e| EdgeError::Device(format!("Failed to build output stream: {}", e)))
    }
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn check(&self) -> Result<()> {
        match &*self.failure.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(failure) => Err(EdgeError::Device(failure.clone())),
            None if self.stop_tx.is_none() => {
                Err(EdgeError::Device("Audio output is closed".into()))
            }
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            log::debug!("AudioSink: Stopping sink");
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("AudioSink: Audio thread panicked");
            }
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
