//! Settings recognized by the fabrication pipeline

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::paths::default_drift_path;
use crate::output::PLAYBACK_RING_SECONDS;
use crate::types::{seconds_to_micros, AudioFormat, ChainMicros, MICROS_PER_SECOND};

/// Where shipped audio goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Live playback, paced to the listener
    Playback,
    /// WAV files, rendered as fast as audio is available
    File,
}

impl OutputMode {
    /// Whether shipping is paced to real time
    pub fn is_sync(&self) -> bool {
        matches!(self, OutputMode::Playback)
    }
}

/// When file output rolls over to a new file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFileMode {
    /// Never split
    Continuous,
    /// One file per segment
    Segment,
    /// New file when the main program changes
    Main,
    /// New file when the macro program changes
    Macro,
}

/// Startup from a previously shipped chain snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RehydrateSettings {
    pub enabled: bool,
    /// Snapshot read at startup and written when shipping finishes
    pub snapshot_path: Option<PathBuf>,
    /// Minimum crafted-ahead margin a snapshot needs to be worth restoring
    pub ahead_threshold_seconds: u32,
}

impl Default for RehydrateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            snapshot_path: None,
            ahead_threshold_seconds: 20,
        }
    }
}

/// All fabrication settings, loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricationSettings {
    /// Template to fabricate from
    pub input_template_key: String,
    /// How far Craft may run ahead of Ship
    pub craft_ahead_seconds: u32,
    /// How far Dub may run ahead of Ship
    pub dub_ahead_seconds: u32,
    /// Length of one mixer chunk
    pub mixer_length_seconds: u32,
    pub output_frame_rate: u32,
    pub output_channels: u16,
    /// Shipped history kept in the entity store
    pub persistence_window_seconds: u32,
    pub output_mode: OutputMode,
    pub output_file_mode: OutputFileMode,
    /// Zero-padding of the output file number
    pub output_file_number_digits: usize,
    /// Prepended to `{template}-{number}.wav`
    pub output_path_prefix: String,
    /// File output ships whole multiples of this many bytes
    pub pcm_chunk_size_bytes: usize,
    /// Stop after this much audio has shipped (0 = unbounded)
    pub output_seconds: u32,
    /// Playback may be at most this far ahead of what the listener heard
    pub sync_ahead_seconds: f64,
    /// Most bytes moved to the sink per ship cycle
    pub ship_cycle_audio_bytes: usize,
    /// Minimum interval between cycles of one fabrication thread
    pub cycle_millis: u64,
    /// A stage that has not advanced for this long is unhealthy
    pub health_stale_seconds: u32,
    /// Root directory of instrument waveforms
    pub waveform_path_prefix: String,
    /// Remote waveform location, for loaders that fetch
    pub waveform_base_url: String,
    pub rehydrate: RehydrateSettings,
}

impl Default for FabricationSettings {
    fn default() -> Self {
        let drift = default_drift_path();
        Self {
            input_template_key: "default".to_string(),
            craft_ahead_seconds: 20,
            dub_ahead_seconds: 10,
            mixer_length_seconds: 2,
            output_frame_rate: 48_000,
            output_channels: 2,
            persistence_window_seconds: 60,
            output_mode: OutputMode::Playback,
            output_file_mode: OutputFileMode::Continuous,
            output_file_number_digits: 7,
            output_path_prefix: format!("{}/", drift.join("output").display()),
            pcm_chunk_size_bytes: 4096,
            output_seconds: 0,
            sync_ahead_seconds: 0.5,
            ship_cycle_audio_bytes: 48_000,
            cycle_millis: 10,
            health_stale_seconds: 30,
            waveform_path_prefix: drift.join("waveforms").display().to_string(),
            waveform_base_url: String::new(),
            rehydrate: RehydrateSettings::default(),
        }
    }
}

/// Settings that cannot drive a consistent pipeline
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("dub ahead ({dub}s) must not exceed craft ahead ({craft}s)")]
    DubAheadExceedsCraftAhead { dub: u32, craft: u32 },

    #[error("mixer length must be at least one second")]
    ZeroMixerLength,

    #[error("output frame rate must be positive")]
    ZeroFrameRate,

    #[error("unsupported output channel count: {0} (expected 1 or 2)")]
    UnsupportedChannels(u16),

    #[error("PCM chunk of {chunk} bytes is not a whole number of {frame_size}-byte frames")]
    ChunkNotFrameAligned { chunk: usize, frame_size: usize },

    #[error("rehydration is enabled but no snapshot path is set")]
    MissingSnapshotPath,

    #[error("ship cycle must move at least one frame")]
    ZeroShipCycle,

    #[error("cycle interval must be at least one millisecond")]
    ZeroCycleMillis,

    #[error("sync ahead of {0}s must be under the {max}s playback buffer", max = PLAYBACK_RING_SECONDS)]
    SyncAheadExceedsPlaybackBuffer(f64),
}

impl FabricationSettings {
    /// Check the cross-field constraints the pipeline relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dub_ahead_seconds > self.craft_ahead_seconds {
            return Err(ConfigError::DubAheadExceedsCraftAhead {
                dub: self.dub_ahead_seconds,
                craft: self.craft_ahead_seconds,
            });
        }
        if self.mixer_length_seconds == 0 {
            return Err(ConfigError::ZeroMixerLength);
        }
        if self.output_frame_rate == 0 {
            return Err(ConfigError::ZeroFrameRate);
        }
        if !(1..=2).contains(&self.output_channels) {
            return Err(ConfigError::UnsupportedChannels(self.output_channels));
        }
        let frame_size = self.audio_format().frame_size();
        if self.pcm_chunk_size_bytes == 0 || self.pcm_chunk_size_bytes % frame_size != 0 {
            return Err(ConfigError::ChunkNotFrameAligned {
                chunk: self.pcm_chunk_size_bytes,
                frame_size,
            });
        }
        if self.ship_cycle_audio_bytes < frame_size {
            return Err(ConfigError::ZeroShipCycle);
        }
        if self.cycle_millis == 0 {
            return Err(ConfigError::ZeroCycleMillis);
        }
        if self.output_mode == OutputMode::Playback
            && self.sync_ahead_seconds >= PLAYBACK_RING_SECONDS as f64
        {
            return Err(ConfigError::SyncAheadExceedsPlaybackBuffer(self.sync_ahead_seconds));
        }
        if self.rehydrate.enabled && self.rehydrate.snapshot_path.is_none() {
            return Err(ConfigError::MissingSnapshotPath);
        }
        Ok(())
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::new(self.output_frame_rate, self.output_channels)
    }

    pub fn craft_ahead_micros(&self) -> ChainMicros {
        self.craft_ahead_seconds as ChainMicros * MICROS_PER_SECOND
    }

    pub fn dub_ahead_micros(&self) -> ChainMicros {
        self.dub_ahead_seconds as ChainMicros * MICROS_PER_SECOND
    }

    pub fn mixer_length_micros(&self) -> ChainMicros {
        self.mixer_length_seconds as ChainMicros * MICROS_PER_SECOND
    }

    pub fn persistence_window_micros(&self) -> ChainMicros {
        self.persistence_window_seconds as ChainMicros * MICROS_PER_SECOND
    }

    pub fn output_micros(&self) -> ChainMicros {
        self.output_seconds as ChainMicros * MICROS_PER_SECOND
    }

    pub fn sync_ahead_micros(&self) -> ChainMicros {
        seconds_to_micros(self.sync_ahead_seconds)
    }

    /// Bytes the mixer writes per chunk
    pub fn mixer_chunk_bytes(&self) -> usize {
        self.audio_format().bytes_for_micros(self.mixer_length_micros()) as usize
    }

    /// Capacity of the dub → ship byte pipe
    ///
    /// Dub may plan up to `dub_ahead + mixer_length` beyond what Ship has
    /// taken, so one spare chunk of headroom covers every legal backlog.
    pub fn byte_pipe_capacity(&self) -> usize {
        let seconds = self.dub_ahead_seconds + 2 * self.mixer_length_seconds;
        self.audio_format().bytes_for_micros(seconds as ChainMicros * MICROS_PER_SECOND) as usize
    }
}
