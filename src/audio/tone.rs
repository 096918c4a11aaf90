use super::SampleBlock;
use std::f32::consts::PI;
use std::time::Duration;

const BEEP_AMPLITUDE: f32 = 0.4;
const BEEP_TONE: Duration = Duration::from_millis(80);

/// Sine tone as PCM16
pub fn sine_wave(frequency: f32, duration: Duration, sample_rate: u32) -> SampleBlock {
    let frames = (duration.as_secs_f64() * sample_rate as f64).round() as usize;
    let step = 2.0 * PI * frequency / sample_rate as f32;
    let samples = (0..frames)
        .map(|i| {
            let value = (step * i as f32).sin() * BEEP_AMPLITUDE;
            (value * i16::MAX as f32) as i16
        })
        .collect();
    SampleBlock::new(samples, sample_rate)
}

/// Two-tone acknowledgement played when a session opens
pub fn ack_beep(sample_rate: u32) -> Vec<SampleBlock> {
    vec![
        sine_wave(400.0, BEEP_TONE, sample_rate),
        sine_wave(500.0, BEEP_TONE, sample_rate),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beep_length_and_level() {
        let tones = ack_beep(24_000);
        assert_eq!(tones.len(), 2);
        for tone in &tones {
            assert_eq!(tone.len(), 1920);
            let peak = tone.samples().iter().map(|s| s.unsigned_abs()).max().unwrap();
            assert!(peak > 10_000 && peak <= (i16::MAX as f32 * BEEP_AMPLITUDE) as u16 + 1);
        }
        assert_eq!(tones[0].samples()[0], 0);
    }
}
