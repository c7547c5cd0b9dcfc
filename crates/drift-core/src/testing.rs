//! Shared test fixtures
//!
//! A two-macro, two-main catalog at 240 bpm (one bar of four beats lasts
//! exactly one second), a loader that synthesizes waveforms instead of
//! reading files, and a sink that captures shipped bytes in memory.

pub mod fixtures {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::audio::{AudioCache, AudioResult, DecodedSource, WaveformLoader, WaveformRequest};
    use crate::config::{FabricationSettings, OutputFileMode, OutputMode, RehydrateSettings};
    use crate::model::{
        Catalog, CatalogData, Chain, Instrument, InstrumentAudio, InstrumentType, Program,
        ProgramType, SegmentChoiceArrangementPick, Template, TemplateConfig,
    };
    use crate::output::{OutputResult, OutputSink, SinkFactory, SinkTarget};
    use crate::store::EntityStore;
    use crate::types::{ChainMicros, EntityId};
    use crate::work::FabricationContext;

    pub const TEMPLATE_KEY: &str = "test";

    pub const DAWN_MACRO: EntityId = 10;
    pub const DUSK_MACRO: EntityId = 11;
    pub const PULSE_MAIN: EntityId = 20;
    pub const DRIVE_MAIN: EntityId = 21;

    pub const KIT_INSTRUMENT: EntityId = 100;
    pub const PAD_INSTRUMENT: EntityId = 200;

    pub const KICK_AUDIO: EntityId = 1000;
    pub const SNARE_AUDIO: EntityId = 1001;
    pub const PAD_AUDIO: EntityId = 2000;

    fn program(id: EntityId, program_type: ProgramType, name: &str, meme: &str) -> Program {
        Program {
            id,
            name: name.to_string(),
            program_type,
            tempo: 240.0,
            beats_per_bar: 4,
            bars: 1,
            memes: vec![meme.to_string()],
            intensity: 0.5,
        }
    }

    fn instrument(id: EntityId, instrument_type: InstrumentType, pattern: Vec<f64>) -> Instrument {
        Instrument {
            id,
            name: format!("{} {}", instrument_type, id),
            instrument_type,
            volume: 1.0,
            memes: Vec::new(),
            pattern,
            release_millis: None,
            muted: false,
        }
    }

    fn audio(id: EntityId, instrument_id: EntityId, name: &str, length: f64, transient: f64) -> InstrumentAudio {
        InstrumentAudio {
            id,
            instrument_id,
            name: name.to_string(),
            waveform_key: format!("{}.wav", name),
            transient_seconds: transient,
            length_seconds: length,
            volume: 1.0,
            intensity: 0.0,
        }
    }

    pub fn catalog() -> Catalog {
        Catalog::from(CatalogData {
            templates: vec![Template {
                id: 1,
                key: TEMPLATE_KEY.to_string(),
                name: "Test".to_string(),
                config: TemplateConfig::default(),
            }],
            programs: vec![
                program(DAWN_MACRO, ProgramType::Macro, "Dawn", "calm"),
                program(DUSK_MACRO, ProgramType::Macro, "Dusk", "dark"),
                program(PULSE_MAIN, ProgramType::Main, "Pulse", "calm"),
                program(DRIVE_MAIN, ProgramType::Main, "Drive", "dark"),
            ],
            instruments: vec![
                instrument(KIT_INSTRUMENT, InstrumentType::Drum, vec![0.0, 1.0, 2.0, 3.0]),
                instrument(PAD_INSTRUMENT, InstrumentType::Pad, vec![0.0]),
            ],
            instrument_audios: vec![
                audio(KICK_AUDIO, KIT_INSTRUMENT, "kick", 0.1, 0.01),
                audio(SNARE_AUDIO, KIT_INSTRUMENT, "snare", 0.1, 0.01),
                audio(PAD_AUDIO, PAD_INSTRUMENT, "pad", 1.0, 0.0),
            ],
        })
    }

    /// Synthesizes a quarter second of 440Hz sine for every request
    #[derive(Debug, Default)]
    pub struct SineLoader {
        loads: AtomicUsize,
    }

    impl SineLoader {
        pub fn load_count(&self) -> usize {
            self.loads.load(Ordering::Relaxed)
        }
    }

    impl WaveformLoader for SineLoader {
        fn load(&self, request: &WaveformRequest<'_>) -> AudioResult<DecodedSource> {
            self.loads.fetch_add(1, Ordering::Relaxed);
            let frames = (request.frame_rate / 4) as usize;
            let channels = request.channels.max(1) as usize;
            let mut samples = Vec::with_capacity(frames * channels);
            for frame in 0..frames {
                let phase = std::f32::consts::TAU * 440.0 * frame as f32 / request.frame_rate as f32;
                let value = 0.5 * phase.sin();
                samples.extend(std::iter::repeat(value).take(channels));
            }
            Ok(DecodedSource::new(samples, request.channels, request.frame_rate))
        }
    }

    pub fn pick(
        id: EntityId,
        audio_id: EntityId,
        start_micros: ChainMicros,
        length_micros: Option<ChainMicros>,
    ) -> SegmentChoiceArrangementPick {
        SegmentChoiceArrangementPick {
            id,
            segment_id: 0,
            arrangement_id: 0,
            instrument_audio_id: audio_id,
            start_micros,
            length_micros,
            amplitude: 1.0,
            mute: false,
        }
    }

    /// Small, fast settings: 8kHz stereo, 1s mixer chunks, file output
    pub fn settings() -> FabricationSettings {
        FabricationSettings {
            input_template_key: TEMPLATE_KEY.to_string(),
            craft_ahead_seconds: 4,
            dub_ahead_seconds: 2,
            mixer_length_seconds: 1,
            output_frame_rate: 8_000,
            output_channels: 2,
            persistence_window_seconds: 60,
            output_mode: OutputMode::File,
            output_file_mode: OutputFileMode::Continuous,
            output_file_number_digits: 4,
            output_path_prefix: "/out/".to_string(),
            pcm_chunk_size_bytes: 4_096,
            output_seconds: 0,
            sync_ahead_seconds: 0.5,
            ship_cycle_audio_bytes: 8_192,
            cycle_millis: 1,
            health_stale_seconds: 30,
            waveform_path_prefix: "/waveforms".to_string(),
            waveform_base_url: String::new(),
            rehydrate: RehydrateSettings::default(),
        }
    }

    /// A fresh context over the fixture catalog and an empty chain
    pub fn context(settings: FabricationSettings) -> Arc<FabricationContext> {
        context_with(settings, catalog())
    }

    pub fn context_with(settings: FabricationSettings, catalog: Catalog) -> Arc<FabricationContext> {
        let catalog = Arc::new(catalog);
        let template = catalog
            .template(&settings.input_template_key)
            .map(|t| t.config.clone())
            .unwrap_or_default();
        let store = Arc::new(EntityStore::new());
        store.put_chain(Chain::new(1, TEMPLATE_KEY));
        let cache = Arc::new(AudioCache::new(
            Arc::new(SineLoader::default()),
            settings.waveform_path_prefix.clone(),
            "",
            settings.audio_format(),
        ));
        Arc::new(FabricationContext::new(settings, template, catalog, store, cache, 1, 0, 0))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Memory sink
    // ═══════════════════════════════════════════════════════════════════════

    /// Everything one sink received
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct CapturedOutput {
        /// `None` for playback
        pub path: Option<PathBuf>,
        pub bytes: Vec<u8>,
        pub finished: bool,
    }

    /// Outputs opened through a memory sink factory, in open order
    #[derive(Debug, Clone, Default)]
    pub struct Captured(Arc<Mutex<Vec<CapturedOutput>>>);

    impl Captured {
        pub fn outputs(&self) -> Vec<CapturedOutput> {
            self.0.lock().unwrap().clone()
        }
    }

    struct MemorySink {
        index: usize,
        captured: Captured,
        /// Total bytes this sink holds before it reports no room
        capacity: Option<usize>,
    }

    impl OutputSink for MemorySink {
        fn append(&mut self, bytes: &[u8]) -> OutputResult<()> {
            let mut outputs = self.captured.0.lock().unwrap();
            let output = &mut outputs[self.index];
            if !output.finished {
                output.bytes.extend_from_slice(bytes);
            }
            Ok(())
        }

        fn heard_at_chain_micros(&self) -> Option<ChainMicros> {
            None
        }

        fn writable_bytes(&self) -> Option<usize> {
            let held = self.captured.0.lock().unwrap()[self.index].bytes.len();
            self.capacity.map(|capacity| capacity.saturating_sub(held))
        }

        fn finish(&mut self) -> OutputResult<()> {
            self.captured.0.lock().unwrap()[self.index].finished = true;
            Ok(())
        }
    }

    pub fn memory_sink_factory() -> (SinkFactory, Captured) {
        bounded_memory_sink_factory(None)
    }

    /// Like [`memory_sink_factory`], but each sink only has room for
    /// `capacity` bytes and nothing ever drains it
    pub fn bounded_memory_sink_factory(capacity: Option<usize>) -> (SinkFactory, Captured) {
        let captured = Captured::default();
        let shared = captured.clone();
        let factory: SinkFactory = Box::new(move |target, _format| {
            let path = match target {
                SinkTarget::File(path) => Some(path.to_path_buf()),
                SinkTarget::Playback { .. } => None,
            };
            let index = {
                let mut outputs = shared.0.lock().unwrap();
                outputs.push(CapturedOutput {
                    path,
                    ..CapturedOutput::default()
                });
                outputs.len() - 1
            };
            Ok(Box::new(MemorySink {
                index,
                captured: shared.clone(),
                capacity,
            }) as Box<dyn OutputSink>)
        });
        (factory, captured)
    }
}
