//! Lookahead compressor with state that survives chunk boundaries
//!
//! Every `dsp_buffer_size` frames the compressor scans `ahead_frames` of
//! upcoming audio for its peak and derives a target ratio that would bring
//! that peak to `to_amplitude`. The applied ratio chases the target through
//! a smoothed rate of change, so gain moves with inertia instead of jumping.
//!
//! The ratio and its rate of change are kept between calls to
//! [`LookaheadCompressor::process`]: the first frame of a chunk continues
//! exactly where the last frame of the previous chunk left off.

use crate::model::TemplateConfig;

/// Peak scan stride in frames
const PEAK_SCAN_GRAIN: usize = 16;

pub struct LookaheadCompressor {
    to_amplitude: f32,
    ratio_min: f32,
    ratio_max: f32,
    ahead_frames: usize,
    decay_frames: f32,
    dsp_buffer_size: usize,

    /// Current gain ratio; zero until the first chunk is processed
    ratio: f32,
    /// Current per-frame change of `ratio`
    ratio_delta: f32,
}

impl LookaheadCompressor {
    pub fn new(config: &TemplateConfig, frame_rate: u32) -> Self {
        let frames = |seconds: f32| (seconds * frame_rate as f32).round().max(1.0);
        Self {
            to_amplitude: config.mix_compress_to_amplitude,
            ratio_min: config.mix_compress_ratio_min,
            ratio_max: config.mix_compress_ratio_max.max(config.mix_compress_ratio_min),
            ahead_frames: frames(config.mix_compress_ahead_seconds) as usize,
            decay_frames: frames(config.mix_compress_decay_seconds),
            dsp_buffer_size: config.dsp_buffer_size.max(1),
            ratio: 0.0,
            ratio_delta: 0.0,
        }
    }

    /// The ratio applied to the last processed frame
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Compress an interleaved buffer in-place
    pub fn process(&mut self, buffer: &mut [f32], channels: usize) {
        let frames = buffer.len() / channels;
        if frames == 0 {
            return;
        }
        if self.ratio == 0.0 {
            self.ratio = self.target(buffer, channels, 0);
        }

        let mut target = self.ratio;
        for frame in 0..frames {
            if frame % self.dsp_buffer_size == 0 {
                target = self.target(buffer, channels, frame);
            }
            let delta_delta = (target - self.ratio) / self.decay_frames;
            self.ratio_delta += (delta_delta - self.ratio_delta) / self.dsp_buffer_size as f32;
            self.ratio = (self.ratio + self.ratio_delta).clamp(self.ratio_min, self.ratio_max);

            for sample in &mut buffer[frame * channels..(frame + 1) * channels] {
                *sample *= self.ratio;
            }
        }
    }

    /// Ratio that would bring the upcoming peak to the target amplitude
    fn target(&self, buffer: &[f32], channels: usize, from_frame: usize) -> f32 {
        let frames = buffer.len() / channels;
        let to_frame = (from_frame + self.ahead_frames).min(frames);
        let peak = (from_frame..to_frame)
            .step_by(PEAK_SCAN_GRAIN)
            .flat_map(move |frame| &buffer[frame * channels..(frame + 1) * channels])
            .fold(0.0_f32, |peak, sample| peak.max(sample.abs()));

        if peak <= f32::EPSILON {
            return self.ratio_max;
        }
        (self.to_amplitude / peak).clamp(self.ratio_min, self.ratio_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TemplateConfig {
        TemplateConfig {
            mix_compress_to_amplitude: 0.5,
            mix_compress_ratio_min: 0.25,
            mix_compress_ratio_max: 1.0,
            ..TemplateConfig::default()
        }
    }

    #[test]
    fn test_hot_signal_is_pulled_toward_target() {
        let mut compressor = LookaheadCompressor::new(&config(), 8_000);
        let mut buffer = vec![1.0_f32; 8_000 * 2];
        compressor.process(&mut buffer, 2);

        let last = buffer[buffer.len() - 1];
        assert!((last - 0.5).abs() < 0.05, "last sample {}", last);
        assert!(compressor.ratio() >= 0.25 && compressor.ratio() <= 1.0);
    }

    #[test]
    fn test_ratio_carries_across_chunks() {
        let mut split = LookaheadCompressor::new(&config(), 8_000);
        let signal: Vec<f32> = (0..4_096).map(|i| if i < 2_048 { 1.0 } else { 0.8 }).collect();

        let (mut first, mut second) = (signal[..2_048].to_vec(), signal[2_048..].to_vec());
        split.process(&mut first, 1);
        let ratio_at_boundary = split.ratio();
        split.process(&mut second, 1);

        // No reset at the boundary: the second chunk starts from the carried ratio
        assert!((second[0] - 0.8 * ratio_at_boundary).abs() < 0.01);
        assert!(ratio_at_boundary < 1.0);
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut compressor = LookaheadCompressor::new(&config(), 8_000);
        let mut buffer = vec![0.0_f32; 1_000];
        compressor.process(&mut buffer, 1);
        assert!(buffer.iter().all(|s| *s == 0.0));
        assert_eq!(compressor.ratio(), 1.0);
    }
}
