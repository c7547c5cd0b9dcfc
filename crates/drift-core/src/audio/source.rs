//! Decoded waveform samples

use crate::types::{ChainMicros, MICROS_PER_SECOND};

/// An instrument waveform decoded to interleaved `f32` samples
///
/// Produced by a [`WaveformLoader`](super::WaveformLoader) already conformed
/// to the output frame rate and channel count.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSource {
    samples: Vec<f32>,
    channels: u16,
    frame_rate: u32,
}

impl DecodedSource {
    pub fn new(samples: Vec<f32>, channels: u16, frame_rate: u32) -> Self {
        let channels = channels.max(1);
        let mut samples = samples;
        samples.truncate(samples.len() - samples.len() % channels as usize);
        Self {
            samples,
            channels,
            frame_rate,
        }
    }

    /// Build from one sample vector per channel
    pub fn from_planar(planar: &[Vec<f32>], frame_rate: u32) -> Self {
        let channels = planar.len().max(1);
        let frames = planar.iter().map(Vec::len).min().unwrap_or(0);
        let mut samples = Vec::with_capacity(frames * channels);
        for frame in 0..frames {
            for channel in planar {
                samples.push(channel[frame]);
            }
        }
        Self::new(samples, channels as u16, frame_rate)
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at a frame; channels beyond the source wrap around
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.channels as usize;
        self.samples[frame * channels + channel % channels]
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn length_micros(&self) -> ChainMicros {
        if self.frame_rate == 0 {
            return 0;
        }
        (self.frame_count() as i128 * MICROS_PER_SECOND as i128 / self.frame_rate as i128)
            as ChainMicros
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planar_interleaves() {
        let source = DecodedSource::from_planar(&[vec![1.0, 2.0], vec![-1.0, -2.0]], 48_000);
        assert_eq!(source.samples(), &[1.0, -1.0, 2.0, -2.0]);
        assert_eq!(source.frame_count(), 2);
        assert_eq!(source.sample(1, 1), -2.0);
    }

    #[test]
    fn test_mono_source_wraps_channels() {
        let source = DecodedSource::new(vec![0.5, 0.25], 1, 2);
        assert_eq!(source.sample(1, 0), 0.25);
        assert_eq!(source.sample(1, 1), 0.25);
        assert_eq!(source.length_micros(), 1_000_000);
    }

    #[test]
    fn test_partial_frame_is_dropped() {
        let source = DecodedSource::new(vec![0.1, 0.2, 0.3], 2, 48_000);
        assert_eq!(source.frame_count(), 1);
    }
}
