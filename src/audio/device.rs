use super::{CpalInput, CpalOutput, InputDeviceConfig, OutputDeviceConfig, PlaybackQueue, SampleBlock};
use crate::config::AudioConfig;
use crate::error::{EdgeError, Result};
use cpal::traits::{DeviceTrait, HostTrait};

/// Microphone as seen by the capture pipeline
pub trait AudioInput: Send {
    /// Native rate of the blocks returned by [`AudioInput::read`]
    fn sample_rate(&self) -> u32;

    /// Frames buffered and ready to read; errors once the device has failed
    fn available(&self) -> Result<usize>;

    /// Read up to `frames` buffered frames without blocking
    fn read(&mut self, frames: usize) -> Result<SampleBlock>;

    /// Release the device
    fn close(&mut self);
}

/// Speaker fed from a [`PlaybackQueue`] by the device's own clock
pub trait AudioOutput: Send {
    fn sample_rate(&self) -> u32;

    /// Errors once the device has failed or been closed
    fn check(&self) -> Result<()>;

    fn close(&mut self);
}

/// Opens the per-session audio devices
pub trait AudioBackend: Send + Sync {
    fn open_input(&self, config: &AudioConfig) -> Result<Box<dyn AudioInput>>;

    fn open_output(
        &self,
        config: &AudioConfig,
        queue: PlaybackQueue,
    ) -> Result<Box<dyn AudioOutput>>;
}

/// Real devices through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(&self, config: &AudioConfig) -> Result<Box<dyn AudioInput>> {
        let input = CpalInput::open(InputDeviceConfig {
            sample_rate: config.capture_rate,
            device_name: config.input_device.clone(),
            ..Default::default()
        })?;
        Ok(Box::new(input))
    }

    fn open_output(
        &self,
        config: &AudioConfig,
        queue: PlaybackQueue,
    ) -> Result<Box<dyn AudioOutput>> {
        let output = CpalOutput::open(
            OutputDeviceConfig {
                sample_rate: config.transport_rate,
                device_name: config.output_device.clone(),
                period: config.playback_period,
            },
            queue,
        )?;
        Ok(Box::new(output))
    }
}

/// Names of the input and output devices on the default host
pub fn list_devices() -> Result<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();

    let inputs = host
        .input_devices()
        .map_err(|e| EdgeError::Device(format!("Failed to enumerate input devices: {}", e)))?
        .map(|device| device.name().unwrap_or_else(|_| "Unknown Device".to_string()))
        .collect();

    let outputs = host
        .output_devices()
        .map_err(|e| EdgeError::Device(format!("Failed to enumerate output devices: {}", e)))?
        .map(|device| device.name().unwrap_or_else(|_| "Unknown Device".to_string()))
        .collect();

    Ok((inputs, outputs))
}
