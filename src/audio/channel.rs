use crate::error::{EdgeError, Result};

/// Extracts a specific channel from interleaved multi-channel audio
#[derive(Debug, Clone, Copy)]
pub struct ChannelExtractor {
    target_channel: usize,
    total_channels: usize,
}

impl ChannelExtractor {
    pub fn new(target_channel: usize, total_channels: usize) -> Result<Self> {
        if target_channel >= total_channels {
            return Err(EdgeError::Device(format!(
                "Target channel {} is out of range for {} channels",
                target_channel, total_channels
            )));
        }

        Ok(Self {
            target_channel,
            total_channels,
        })
    }

    pub fn total_channels(&self) -> usize {
        self.total_channels
    }

    /// Append the target channel of `interleaved` to `out`
    pub fn extract_into<T: Copy>(&self, interleaved: &[T], out: &mut impl Extend<T>) {
        if self.total_channels == 1 {
            out.extend(interleaved.iter().copied());
        } else {
            out.extend(
                interleaved
                    .chunks(self.total_channels)
                    .filter_map(|frame| frame.get(self.target_channel).copied()),
            );
        }
    }

    /// Extract the target channel from interleaved audio samples
    pub fn extract_channel<T: Copy>(&self, interleaved: &[T]) -> Vec<T> {
        let mut out = Vec::with_capacity(interleaved.len() / self.total_channels);
        self.extract_into(interleaved, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range_channel() {
        assert!(ChannelExtractor::new(2, 2).is_err());
        assert!(ChannelExtractor::new(0, 1).is_ok());
    }

    #[test]
    fn test_mono_passthrough() {
        let extractor = ChannelExtractor::new(0, 1).unwrap();
        assert_eq!(extractor.extract_channel(&[1i16, 2, 3]), vec![1, 2, 3]);
    }

    #[test]
    fn test_extracts_second_channel_of_three() {
        let extractor = ChannelExtractor::new(1, 3).unwrap();
        let interleaved = [10i16, 11, 12, 20, 21, 22, 30, 31];
        // trailing partial frame still yields its channel when present
        assert_eq!(extractor.extract_channel(&interleaved), vec![11, 21, 31]);
    }
}
