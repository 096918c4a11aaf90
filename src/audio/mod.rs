pub mod capture;
pub mod channel;
pub mod device;
pub mod playback;
pub mod playback_queue;
pub mod tone;

pub use capture::{CpalInput, InputDeviceConfig};
pub use channel::ChannelExtractor;
pub use device::{AudioBackend, AudioInput, AudioOutput, CpalBackend};
pub use playback::{CpalOutput, OutputDeviceConfig};
pub use playback_queue::PlaybackQueue;

use std::time::Duration;

/// Mono signed 16-bit PCM samples tagged with their sample rate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBlock {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl SampleBlock {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn silence(frames: usize, sample_rate: u32) -> Self {
        Self::new(vec![0; frames], sample_rate)
    }

    /// Decode little-endian PCM16 bytes. A trailing odd byte is dropped.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Self {
        if bytes.len() % 2 != 0 {
            log::warn!(
                "PCM16 payload has odd length {}, dropping trailing byte",
                bytes.len()
            );
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self::new(samples, sample_rate)
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_bytes_decode() {
        let bytes = [0x01, 0x00, 0xff, 0xff, 0x00, 0x80];
        let block = SampleBlock::from_le_bytes(&bytes, 24_000);
        assert_eq!(block.samples(), &[1, -1, i16::MIN]);
        assert_eq!(block.to_le_bytes(), bytes.to_vec());
    }

    #[test]
    fn test_odd_length_payload_drops_last_byte() {
        let block = SampleBlock::from_le_bytes(&[0x10, 0x00, 0x7f], 24_000);
        assert_eq!(block.samples(), &[16]);
    }

    #[test]
    fn test_duration() {
        let block = SampleBlock::silence(1200, 24_000);
        assert_eq!(block.duration(), Duration::from_millis(50));
        assert_eq!(SampleBlock::silence(10, 0).duration(), Duration::ZERO);
    }
}
