use crate::audio::SampleBlock;
use crate::error::{EdgeError, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Streaming PCM16 rate converter for one direction of one stream.
///
/// Input is accumulated until the fixed rubato chunk is full, so feeding a
/// stream in arbitrary pieces produces the same output as feeding it whole;
/// frames short of a chunk are carried into the next call.
pub struct StreamResampler {
    source_rate: u32,
    target_rate: u32,
    /// `None` when both rates match
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 || chunk_size == 0 {
            return Err(EdgeError::Resample(format!(
                "invalid resampler parameters: {}Hz -> {}Hz, chunk {}",
                source_rate, target_rate, chunk_size
            )));
        }

        let resampler = if source_rate == target_rate {
            None
        } else {
            let ratio = target_rate as f64 / source_rate as f64;
            log::info!(
                "Resampler: {}Hz -> {}Hz (ratio: {}, chunk: {})",
                source_rate,
                target_rate,
                ratio,
                chunk_size
            );
            let resampler = FastFixedIn::<f32>::new(
                ratio,
                1.0, // fixed ratio
                PolynomialDegree::Cubic,
                chunk_size,
                1,
            )
            .map_err(|e| EdgeError::Resample(format!("Failed to create resampler: {}", e)))?;
            Some(resampler)
        };

        Ok(Self {
            source_rate,
            target_rate,
            resampler,
            pending: Vec::with_capacity(chunk_size * 2),
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Input frames carried over to the next call
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    /// Resample the next piece of the stream. May return an empty block.
    pub fn process(&mut self, input: &[i16]) -> SampleBlock {
        let Some(resampler) = self.resampler.as_mut() else {
            return SampleBlock::new(input.to_vec(), self.target_rate);
        };

        self.pending
            .extend(input.iter().map(|&sample| sample as f32 / 32768.0));

        let mut output = Vec::new();
        let mut consumed = 0;
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }
            let chunk: [&[f32]; 1] = [&self.pending[consumed..consumed + needed]];
            match resampler.process(&chunk[..], None) {
                Ok(frames) => {
                    if let Some(channel) = frames.first() {
                        output.extend(channel.iter().map(|&value| to_i16(value)));
                    }
                    consumed += needed;
                }
                Err(e) => {
                    // Input sizes come from input_frames_next, so this is a rubato bug;
                    // keep the frames so nothing is silently lost.
                    log::error!("Resampler: process failed: {}", e);
                    break;
                }
            }
        }
        self.pending.drain(..consumed);

        log::trace!(
            "Resampler: {} in, {} out, {} carried",
            input.len(),
            output.len(),
            self.pending.len()
        );
        SampleBlock::new(output, self.target_rate)
    }

    /// Emit the carried frames and the filter tail, then start a fresh stream.
    pub fn flush(&mut self) -> SampleBlock {
        let Some(resampler) = self.resampler.as_mut() else {
            return SampleBlock::new(Vec::new(), self.target_rate);
        };
        if self.pending.is_empty() {
            resampler.reset();
            return SampleBlock::new(Vec::new(), self.target_rate);
        }

        let ratio = self.target_rate as f64 / self.source_rate as f64;
        let expected =
            (self.pending.len() as f64 * ratio).round() as usize + resampler.output_delay();

        let input: [&[f32]; 1] = [self.pending.as_slice()];
        let output = match resampler.process_partial(Some(&input[..]), None) {
            Ok(frames) => frames
                .first()
                .map(|channel| {
                    channel
                        .iter()
                        .take(expected)
                        .map(|&value| to_i16(value))
                        .collect()
                })
                .unwrap_or_default(),
            Err(e) => {
                log::error!("Resampler: flush failed: {}", e);
                Vec::new()
            }
        };

        self.pending.clear();
        resampler.reset();
        SampleBlock::new(output, self.target_rate)
    }
}

fn to_i16(value: f32) -> i16 {
    (value * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
