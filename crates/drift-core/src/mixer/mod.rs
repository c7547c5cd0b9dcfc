//! Multi-bus mixer rendering active audio into the output byte pipe
//!
//! Signal flow per chunk:
//!
//! ```text
//! targets ──► bus[instrument type] ──► bus compressor ──► × bus level ─┐
//!                                                                      ▼
//!   rtrb::Producer<u8> ◄── i16 LE ◄── clipper ◄── master compressor ◄── log range
//! ```
//!
//! Buses are assigned lazily the first time an instrument type is heard and
//! keep their number (and their compressor state) for the life of the mixer.
//! Every DSP stage carries its state across chunks, so chunk boundaries are
//! inaudible.

mod active;
mod clipper;
mod compressor;

pub use active::{intensity_amplitude, ActiveAudio};
pub use clipper::OutputClipper;
pub use compressor::LookaheadCompressor;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::audio::{AudioCache, Waveform};
use crate::model::{InstrumentType, TemplateConfig};
use crate::types::{AudioFormat, ChainMicros, EntityId};

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error("Mixer length must cover at least one frame")]
    ZeroLength,

    #[error("Output buffer full: need {needed} bytes, {free} free")]
    BufferFull { needed: usize, free: usize },
}

pub type MixerResult<T> = Result<T, MixerError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Buses and targets
// ═══════════════════════════════════════════════════════════════════════════════

struct Bus {
    instrument_type: InstrumentType,
    level: f32,
    buffer: Vec<f32>,
    compressor: LookaheadCompressor,
}

struct MixTarget {
    active: ActiveAudio,
    waveform: Waveform,
    bus: usize,
}

/// Logarithmic dynamic range: linear below unity, soft log knee above
#[inline]
fn log_dynamic_range(sample: f32) -> f32 {
    if sample < -1.0 {
        -(-sample - 0.85).ln() / 14.0 - 0.75
    } else if sample > 1.0 {
        (sample - 0.85).ln() / 14.0 + 0.75
    } else {
        sample / 1.618_034
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Mixer
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Mixer {
    format: AudioFormat,
    chunk_frames: usize,
    micros_per_frame: f64,
    config: TemplateConfig,
    cache: Arc<AudioCache>,
    producer: rtrb::Producer<u8>,

    bus_numbers: HashMap<InstrumentType, usize>,
    buses: Vec<Bus>,
    output: Vec<f32>,
    master: LookaheadCompressor,
    clipper: OutputClipper,
    targets: BTreeMap<EntityId, MixTarget>,
}

impl Mixer {
    pub fn new(
        format: AudioFormat,
        mixer_length_micros: ChainMicros,
        config: &TemplateConfig,
        cache: Arc<AudioCache>,
        producer: rtrb::Producer<u8>,
    ) -> MixerResult<Self> {
        let chunk_frames = format.frames_for_micros(mixer_length_micros);
        if chunk_frames == 0 {
            return Err(MixerError::ZeroLength);
        }
        let channels = format.channels as usize;
        log::info!(
            "[MIXER] {} frames per chunk at {} Hz, {} channel(s)",
            chunk_frames,
            format.frame_rate,
            channels
        );
        Ok(Self {
            format,
            chunk_frames,
            micros_per_frame: format.micros_per_frame(),
            config: config.clone(),
            cache,
            producer,
            bus_numbers: HashMap::new(),
            buses: Vec::new(),
            output: vec![0.0; chunk_frames * channels],
            master: LookaheadCompressor::new(config, format.frame_rate),
            clipper: OutputClipper::new(format.frame_rate, channels),
            targets: BTreeMap::new(),
        })
    }

    /// Bytes produced by one call to [`Mixer::mix`]
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_frames * self.format.frame_size()
    }

    /// Free space in the byte pipe
    pub fn free_bytes(&self) -> usize {
        self.producer.slots()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    /// Bus number for an instrument type, creating the bus on first use
    fn bus_for(&mut self, instrument_type: InstrumentType) -> usize {
        if let Some(bus) = self.bus_numbers.get(&instrument_type) {
            return *bus;
        }
        let number = self.buses.len();
        self.buses.push(Bus {
            instrument_type,
            level: self.config.bus_level(instrument_type),
            buffer: vec![0.0; self.output.len()],
            compressor: LookaheadCompressor::new(&self.config, self.format.frame_rate),
        });
        self.bus_numbers.insert(instrument_type, number);
        log::debug!("[MIXER] Bus {} assigned to {}", number, instrument_type);
        number
    }

    /// Replace the mix set for the next chunk
    ///
    /// New ids load their waveform from the cache; known ids take the new
    /// positions; ids not present are dropped. A waveform that cannot be
    /// loaded leaves its pick out of the mix.
    pub fn set_targets(&mut self, actives: Vec<ActiveAudio>) {
        let mut next = BTreeMap::new();
        for active in actives {
            let id = active.id();
            match self.targets.remove(&id) {
                Some(mut target) => {
                    target.active = active;
                    next.insert(id, target);
                }
                None => match self.cache.prepare(&active.audio) {
                    Ok(waveform) => {
                        let bus = self.bus_for(active.instrument_type());
                        next.insert(id, MixTarget { active, waveform, bus });
                    }
                    Err(e) => {
                        log::warn!(
                            "[MIXER] Skipping Pick[{}], InstrumentAudio[{}] unavailable: {}",
                            id,
                            active.audio.id,
                            e
                        );
                    }
                },
            }
        }
        self.targets = next;
    }

    /// Render exactly one chunk into the byte pipe
    ///
    /// Fails without touching any DSP state when the pipe cannot take a
    /// whole chunk.
    pub fn mix(&mut self) -> MixerResult<usize> {
        let needed = self.chunk_bytes();
        let free = self.free_bytes();
        if free < needed {
            return Err(MixerError::BufferFull { needed, free });
        }

        let channels = self.format.channels as usize;
        for bus in &mut self.buses {
            bus.buffer.fill(0.0);
        }
        self.output.fill(0.0);

        for target in self.targets.values() {
            Self::add_to_mix(
                target,
                &mut self.buses[target.bus].buffer,
                channels,
                self.chunk_frames,
                self.micros_per_frame,
            );
        }

        for bus in &mut self.buses {
            bus.compressor.process(&mut bus.buffer, channels);
            for (out, sample) in self.output.iter_mut().zip(&bus.buffer) {
                *out += sample * bus.level;
            }
        }

        for sample in &mut self.output {
            *sample = log_dynamic_range(*sample);
        }
        self.master.process(&mut self.output, channels);
        self.clipper.process(&mut self.output);

        let clipped = self.clipper.take_clip_count();
        if clipped > 0 {
            log::trace!("[MIXER] Clipped {} samples", clipped);
        }

        let bytes = self
            .output
            .iter()
            .flat_map(|sample| ((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes());
        let chunk = self
            .producer
            .write_chunk_uninit(needed)
            .map_err(|_| MixerError::BufferFull { needed, free })?;
        let written = chunk.fill_from_iter(bytes);
        Ok(written)
    }

    /// Sum one target into its bus, with a linear release after its stop and
    /// the intensity gain ramped across the chunk
    fn add_to_mix(
        target: &MixTarget,
        bus: &mut [f32],
        channels: usize,
        chunk_frames: usize,
        micros_per_frame: f64,
    ) {
        let active = &target.active;
        if active.is_gated() {
            return;
        }
        let to_frame = |micros: ChainMicros| (micros as f64 / micros_per_frame).round() as i64;
        let start = to_frame(active.start_at_mixer_micros);
        let stop = to_frame(active.stop_at_mixer_micros);
        let release = to_frame(active.release_micros).max(1);
        let amplitude = active.amplitude();
        let source_frames = target.waveform.frame_count() as i64;

        let from = start.max(0);
        let to = (stop + release).min(chunk_frames as i64).min(start + source_frames);
        for frame in from..to {
            let envelope = if frame < stop {
                1.0
            } else {
                1.0 - (frame - stop) as f32 / release as f32
            };
            let gain = amplitude * envelope * active.intensity_at(frame as f32 / chunk_frames as f32);
            let source_frame = (frame - start) as usize;
            let out = frame as usize * channels;
            for ch in 0..channels {
                bus[out + ch] += target.waveform.sample(source_frame, ch) * gain;
            }
        }
    }

    /// Instrument types with a bus, in bus order
    pub fn bus_types(&self) -> Vec<InstrumentType> {
        self.buses.iter().map(|bus| bus.instrument_type).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    const FRAME_RATE: u32 = 8_000;

    fn mixer(capacity: usize) -> (Mixer, rtrb::Consumer<u8>) {
        let format = AudioFormat::new(FRAME_RATE, 2);
        let loader = Arc::new(fixtures::SineLoader::default());
        let cache = Arc::new(AudioCache::new(loader, "/waveforms", "", format));
        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        let mixer = Mixer::new(format, 100_000, &TemplateConfig::default(), cache, producer).unwrap();
        (mixer, consumer)
    }

    fn active(pick_id: EntityId, audio_id: EntityId, start: ChainMicros) -> ActiveAudio {
        let catalog = fixtures::catalog();
        let audio = catalog.audio(audio_id).unwrap();
        let instrument = catalog.instrument(audio.instrument_id).unwrap();
        let pick = fixtures::pick(pick_id, audio_id, start, None);
        ActiveAudio::compute(&pick, instrument, audio, 0, 0, 100_000, 5).unwrap()
    }

    fn drain(consumer: &mut rtrb::Consumer<u8>) -> Vec<i16> {
        let available = consumer.slots();
        let chunk = consumer.read_chunk(available).unwrap();
        let (first, second) = chunk.as_slices();
        let bytes: Vec<u8> = first.iter().chain(second).copied().collect();
        chunk.commit_all();
        bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
    }

    #[test]
    fn test_zero_length_rejected() {
        let format = AudioFormat::new(FRAME_RATE, 2);
        let cache = Arc::new(AudioCache::new(Arc::new(fixtures::SineLoader::default()), "", "", format));
        let (producer, _) = rtrb::RingBuffer::new(16);
        assert!(matches!(
            Mixer::new(format, 10, &TemplateConfig::default(), cache, producer),
            Err(MixerError::ZeroLength)
        ));
    }

    #[test]
    fn test_silence_without_targets() {
        let (mut mixer, mut consumer) = mixer(8_192);
        assert_eq!(mixer.chunk_bytes(), 800 * 4);
        assert_eq!(mixer.mix().unwrap(), 3_200);
        let samples = drain(&mut consumer);
        assert_eq!(samples.len(), 1_600);
        assert!(samples.iter().all(|s| *s == 0));
    }

    #[test]
    fn test_target_is_audible() {
        let (mut mixer, mut consumer) = mixer(8_192);
        mixer.set_targets(vec![active(1, fixtures::KICK_AUDIO, 20_000)]);
        mixer.mix().unwrap();
        let samples = drain(&mut consumer);
        assert!(samples.iter().any(|s| *s != 0));
    }

    #[test]
    fn test_intensity_gate_silences_and_ramps() {
        let config = TemplateConfig::default();
        let layered = |from: f64, to: f64| {
            let mut target = active(1, fixtures::PAD_AUDIO, 0);
            target.audio.intensity = 0.9;
            target.with_intensity(&config, from, to)
        };

        let (mut mixer, mut consumer) = mixer(8_192);
        mixer.set_targets(vec![layered(0.2, 0.2)]);
        mixer.mix().unwrap();
        assert!(drain(&mut consumer).iter().all(|s| *s == 0));

        // fading in from silence: the first frame is still silent
        mixer.set_targets(vec![layered(0.2, 1.0)]);
        mixer.mix().unwrap();
        let samples = drain(&mut consumer);
        assert_eq!(samples[0], 0);
        assert!(samples.iter().any(|s| *s != 0));
    }

    #[test]
    fn test_buses_are_stable_per_instrument_type() {
        let (mut mixer, _consumer) = mixer(8_192);
        mixer.set_targets(vec![active(1, fixtures::PAD_AUDIO, 0), active(2, fixtures::KICK_AUDIO, 20_000)]);
        let types = mixer.bus_types();
        assert_eq!(mixer.bus_count(), 2);

        // A new drum pick reuses the drum bus
        mixer.set_targets(vec![active(3, fixtures::SNARE_AUDIO, 20_000)]);
        assert_eq!(mixer.target_count(), 1);
        assert_eq!(mixer.bus_types(), types);
    }

    #[test]
    fn test_full_pipe_leaves_state_untouched() {
        let (mut mixer, mut consumer) = mixer(4_000);
        mixer.mix().unwrap();
        assert!(matches!(
            mixer.mix(),
            Err(MixerError::BufferFull { needed: 3_200, free: 800 })
        ));
        drain(&mut consumer);
        assert!(mixer.mix().is_ok());
    }

    #[test]
    fn test_log_dynamic_range_is_continuous_enough() {
        assert!((log_dynamic_range(0.5) - 0.5 / 1.618_034).abs() < 1e-6);
        assert!(log_dynamic_range(3.0) < 1.0);
        assert!(log_dynamic_range(-3.0) > -1.0);
    }
}
