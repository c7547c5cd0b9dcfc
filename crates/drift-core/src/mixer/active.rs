//! Active audio: a pick resolved into a mix target for one chunk

use crate::model::{Instrument, InstrumentAudio, InstrumentType, SegmentChoiceArrangementPick, TemplateConfig};
use crate::types::{ChainMicros, EntityId, MICROS_PER_MILLI};

/// Gain of an audio at a chain intensity
///
/// An instrument's audios fall into `layers` equal bands by their own
/// intensity. The lowest band always plays. Band `n` plays at full gain
/// once the chain intensity reaches `n / layers`, fading in linearly over
/// the `threshold / layers` below that.
pub fn intensity_amplitude(audio_intensity: f64, layers: u32, threshold: f64, intensity: f64) -> f32 {
    let layers = layers.max(1) as f64;
    let layer = (audio_intensity.clamp(0.0, 1.0) * layers).floor().min(layers - 1.0);
    let entry = layer / layers;
    let ramp = threshold.max(0.0) / layers;
    let gain = if intensity >= entry {
        1.0
    } else if ramp <= 0.0 {
        0.0
    } else {
        ((intensity - (entry - ramp)) / ramp).clamp(0.0, 1.0)
    };
    gain as f32
}

/// A pick positioned relative to the start of the current mix chunk
///
/// `start_at_mixer_micros` is where the waveform's first frame lands, so the
/// transient pre-roll sits before the picked time and the hit lands exactly
/// on it. Either bound may fall outside the chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveAudio {
    pub pick: SegmentChoiceArrangementPick,
    pub instrument: Instrument,
    pub audio: InstrumentAudio,
    pub start_at_mixer_micros: ChainMicros,
    pub stop_at_mixer_micros: ChainMicros,
    pub release_micros: ChainMicros,
    /// Intensity gain at the first and last frame of the chunk
    pub intensity_from: f32,
    pub intensity_to: f32,
}

impl ActiveAudio {
    /// Position a pick against the chunk starting at `chunk_from`
    ///
    /// Returns `None` when the pick, release tail included, lies entirely
    /// outside `[0, mixer_length_micros]`.
    pub fn compute(
        pick: &SegmentChoiceArrangementPick,
        instrument: &Instrument,
        audio: &InstrumentAudio,
        segment_begin_micros: ChainMicros,
        chunk_from_micros: ChainMicros,
        mixer_length_micros: ChainMicros,
        default_release_millis: u32,
    ) -> Option<Self> {
        let transient = audio.transient_micros();
        let start = segment_begin_micros + pick.start_micros - transient - chunk_from_micros;
        let length = pick.length_micros.unwrap_or_else(|| audio.length_micros());
        let stop = start + transient + length;

        let release_millis = instrument.release_millis.unwrap_or(default_release_millis);
        let release = release_millis as ChainMicros * MICROS_PER_MILLI;
        // still sounding while its release tail reaches into the chunk
        if start > mixer_length_micros || stop + release < 0 {
            return None;
        }

        Some(Self {
            pick: pick.clone(),
            instrument: instrument.clone(),
            audio: audio.clone(),
            start_at_mixer_micros: start,
            stop_at_mixer_micros: stop,
            release_micros: release,
            intensity_from: 1.0,
            intensity_to: 1.0,
        })
    }

    /// Gate by intensity layer as the chain moves from `from` to `to`
    /// intensity over the chunk
    pub fn with_intensity(mut self, config: &TemplateConfig, from: f64, to: f64) -> Self {
        let instrument_type = self.instrument.instrument_type;
        let layers = config.intensity_layers(instrument_type);
        let threshold = config.intensity_threshold(instrument_type);
        self.intensity_from = intensity_amplitude(self.audio.intensity, layers, threshold, from);
        self.intensity_to = intensity_amplitude(self.audio.intensity, layers, threshold, to);
        self
    }

    /// Intensity gain at `position` through the chunk, 0.0 to 1.0
    pub fn intensity_at(&self, position: f32) -> f32 {
        self.intensity_from + (self.intensity_to - self.intensity_from) * position.clamp(0.0, 1.0)
    }

    /// Silent for the whole chunk
    pub fn is_gated(&self) -> bool {
        self.intensity_from <= 0.0 && self.intensity_to <= 0.0
    }

    pub fn id(&self) -> EntityId {
        self.pick.id
    }

    pub fn instrument_type(&self) -> InstrumentType {
        self.instrument.instrument_type
    }

    /// Combined pick, instrument and audio gain
    pub fn amplitude(&self) -> f32 {
        self.pick.amplitude * self.instrument.volume * self.audio.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    const SECOND: ChainMicros = 1_000_000;

    fn compute(start_micros: ChainMicros, segment_begin: ChainMicros, chunk_from: ChainMicros) -> Option<ActiveAudio> {
        let catalog = fixtures::catalog();
        let audio = catalog.audio(fixtures::KICK_AUDIO).unwrap();
        let instrument = catalog.instrument(audio.instrument_id).unwrap();
        let pick = fixtures::pick(1, fixtures::KICK_AUDIO, start_micros, Some(100_000));
        ActiveAudio::compute(&pick, instrument, audio, segment_begin, chunk_from, SECOND, 5)
    }

    #[test]
    fn test_transient_pre_roll_lands_hit_on_pick() {
        let active = compute(500_000, 2 * SECOND, 2 * SECOND).unwrap();
        // kick transient is 10ms
        assert_eq!(active.start_at_mixer_micros, 490_000);
        assert_eq!(active.stop_at_mixer_micros, 600_000);
        assert_eq!(active.release_micros, 5_000);
    }

    #[test]
    fn test_pick_after_chunk_is_excluded() {
        assert!(compute(SECOND + 20_000, 0, 0).is_none());
        assert!(compute(SECOND + 10_000, 0, 0).is_some());
    }

    #[test]
    fn test_pick_before_chunk_is_excluded() {
        // stops at 0.1s, chunk starts at 1s
        assert!(compute(0, 0, SECOND).is_none());
        // stops exactly at chunk start: still part of the window
        assert!(compute(0, 0, 100_000).is_some());
    }

    #[test]
    fn test_release_tail_keeps_pick_in_next_chunk() {
        // stops 3ms before the chunk, 5ms release still rings into it
        let active = compute(0, 0, 103_000).unwrap();
        assert_eq!(active.stop_at_mixer_micros, -3_000);
        assert!(active.stop_at_mixer_micros + active.release_micros > 0);
        // tail ends 2ms before the chunk starts
        assert!(compute(0, 0, 107_000).is_none());
    }

    #[test]
    fn test_intensity_layers_and_threshold() {
        // single layer always plays
        assert_eq!(intensity_amplitude(0.9, 1, 0.5, 0.0), 1.0);
        // lowest of three layers always plays
        assert_eq!(intensity_amplitude(0.1, 3, 0.5, 0.0), 1.0);
        // top layer enters at 2/3, fading in from 1/2
        assert_eq!(intensity_amplitude(0.9, 3, 0.5, 0.4), 0.0);
        assert!((intensity_amplitude(0.9, 3, 0.5, 7.0 / 12.0) - 0.5).abs() < 1e-5);
        assert_eq!(intensity_amplitude(0.9, 3, 0.5, 0.7), 1.0);
        // no threshold: a hard step at the layer's entry
        assert_eq!(intensity_amplitude(0.5, 2, 0.0, 0.49), 0.0);
        assert_eq!(intensity_amplitude(0.5, 2, 0.0, 0.5), 1.0);
    }

    #[test]
    fn test_intensity_gain_interpolates_across_chunk() {
        let catalog = fixtures::catalog();
        let mut audio = catalog.audio(fixtures::PAD_AUDIO).unwrap().clone();
        audio.intensity = 0.9;
        let instrument = catalog.instrument(audio.instrument_id).unwrap();
        let pick = fixtures::pick(3, fixtures::PAD_AUDIO, 0, None);
        let config = TemplateConfig::default();

        // pads have three layers: the top one is silent at 0.4, full at 0.8
        let active = ActiveAudio::compute(&pick, instrument, &audio, 0, 0, SECOND, 5)
            .unwrap()
            .with_intensity(&config, 0.4, 0.8);
        assert_eq!(active.intensity_from, 0.0);
        assert_eq!(active.intensity_to, 1.0);
        assert_eq!(active.intensity_at(0.0), 0.0);
        assert!((active.intensity_at(0.25) - 0.25).abs() < 1e-6);
        assert_eq!(active.intensity_at(1.0), 1.0);
        assert!(!active.is_gated());

        let quiet = active.clone().with_intensity(&config, 0.2, 0.2);
        assert!(quiet.is_gated());
    }

    #[test]
    fn test_missing_length_uses_audio_length() {
        let catalog = fixtures::catalog();
        let audio = catalog.audio(fixtures::PAD_AUDIO).unwrap();
        let instrument = catalog.instrument(audio.instrument_id).unwrap();
        let pick = fixtures::pick(2, fixtures::PAD_AUDIO, 0, None);
        let active = ActiveAudio::compute(&pick, instrument, audio, 0, 0, SECOND, 5).unwrap();
        assert_eq!(active.stop_at_mixer_micros - active.start_at_mixer_micros, audio.length_micros());
    }
}
