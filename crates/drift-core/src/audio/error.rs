//! Waveform loading error types

use std::path::PathBuf;

use thiserror::Error;

use crate::types::EntityId;

/// Errors that can occur while loading or caching waveforms
#[derive(Error, Debug)]
pub enum AudioError {
    /// Waveform file could not be opened or read
    #[error("Failed to read waveform {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Waveform contents could not be decoded
    #[error("Failed to decode waveform {path:?}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// Decoded stream has no usable audio track or layout
    #[error("Unsupported waveform format: {0}")]
    UnsupportedFormat(String),

    /// Sample rate conversion failed
    #[error("Failed to resample waveform: {0}")]
    Resample(String),

    /// Instrument audio has no waveform to load
    #[error("InstrumentAudio[{0}] has no waveform key")]
    NoWaveformKey(EntityId),

    /// The deferred-deallocation collector thread is not running
    #[error("Waveform collector thread is unavailable")]
    CollectorUnavailable,
}

/// Result type for waveform operations
pub type AudioResult<T> = Result<T, AudioError>;
