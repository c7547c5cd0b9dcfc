//! Output safety clipper: ClipOnly2-style stateful clipper
//!
//! Based on the Airwindows ClipOnly2 algorithm by Chris Johnson.
//! Uses the Dottie number (fixed point of cos(x) = x ≈ 0.739) as an
//! interpolation ratio for smooth clip entry/exit transitions.
//!
//! Per-channel state persists across chunks, so a clip that starts at the
//! end of one chunk exits smoothly in the next.

/// Dottie number: the unique fixed point of cos(x) = x.
const HARDNESS: f32 = 0.739_085_13;
/// 1.0 - HARDNESS: interpolation weight favoring the signal value.
const SOFTNESS: f32 = 1.0 - HARDNESS;

/// Maximum supported spacing (supports frame rates up to ~352.8 kHz)
const MAX_SPACING: usize = 8;

#[derive(Clone, Copy, Default)]
struct ChannelState {
    last_sample: f32,
    was_pos_clip: bool,
    was_neg_clip: bool,
    intermediate: [f32; MAX_SPACING],
}

pub struct OutputClipper {
    threshold: f32,
    thresh_hard: f32,
    thresh_soft: f32,
    channels: Vec<ChannelState>,
    /// Spacing = floor(frame_rate / 44100), typically 1 at 48 kHz
    spacing: usize,
    /// Samples clipped since the last call to [`OutputClipper::take_clip_count`]
    clipped: usize,
}

impl OutputClipper {
    /// Create a clipper with the default threshold of -0.3 dBFS
    pub fn new(frame_rate: u32, channels: usize) -> Self {
        Self::with_threshold_db(frame_rate, channels, -0.3)
    }

    pub fn with_threshold_db(frame_rate: u32, channels: usize, db: f32) -> Self {
        let threshold = 10.0_f32.powf(db / 20.0);
        let spacing = (frame_rate as f32 / 44_100.0).floor() as usize;
        Self {
            threshold,
            thresh_hard: threshold * HARDNESS,
            thresh_soft: threshold * SOFTNESS,
            channels: vec![ChannelState::default(); channels.max(1)],
            spacing: spacing.clamp(1, MAX_SPACING),
            clipped: 0,
        }
    }

    /// Latency in frames introduced by this clipper
    pub fn latency_frames(&self) -> usize {
        self.spacing
    }

    /// Clipped sample count since the last call, then reset
    pub fn take_clip_count(&mut self) -> usize {
        std::mem::take(&mut self.clipped)
    }

    /// Process an interleaved buffer in-place
    pub fn process(&mut self, buffer: &mut [f32]) {
        let channels = self.channels.len();
        for frame in buffer.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = self.process_sample(*sample, ch);
            }
        }
    }

    #[inline]
    fn process_sample(&mut self, input: f32, ch: usize) -> f32 {
        let (threshold, thresh_hard, thresh_soft, spacing) =
            (self.threshold, self.thresh_hard, self.thresh_soft, self.spacing);
        let state = &mut self.channels[ch];
        let mut sample = input.clamp(-4.0, 4.0);

        if state.was_pos_clip {
            if sample < state.last_sample {
                state.last_sample = thresh_hard + sample * SOFTNESS;
            } else {
                state.last_sample = thresh_soft + state.last_sample * HARDNESS;
            }
        }
        state.was_pos_clip = false;

        if sample > threshold {
            state.was_pos_clip = true;
            self.clipped += 1;
            sample = thresh_hard + state.last_sample * SOFTNESS;
        }

        if state.was_neg_clip {
            if sample > state.last_sample {
                state.last_sample = -thresh_hard + sample * SOFTNESS;
            } else {
                state.last_sample = -thresh_soft + state.last_sample * HARDNESS;
            }
        }
        state.was_neg_clip = false;

        if sample < -threshold {
            state.was_neg_clip = true;
            self.clipped += 1;
            sample = -thresh_hard + state.last_sample * SOFTNESS;
        }

        // Frame-rate aware spacing delay
        state.intermediate[spacing - 1] = sample;
        let output = state.last_sample;
        state.last_sample = state.intermediate[0];
        state.intermediate.copy_within(1..spacing, 0);

        output
    }
}
