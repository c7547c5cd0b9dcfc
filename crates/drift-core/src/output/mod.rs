//! Output sinks for shipped audio
//!
//! Ship hands interleaved 16-bit little-endian PCM to an [`OutputSink`]:
//!
//! - [`PlaybackSink`]: a cpal output stream, fed through a lock-free ring
//!   (only with the `playback` feature)
//! - [`WavFileSink`]: one WAV file per sink, written with `hound`
//!
//! Sinks are created through a [`SinkFactory`] so tests and embedders can
//! capture the byte stream instead.

mod file_split;
#[cfg(feature = "playback")]
mod playback;
mod wav_file;

pub use file_split::{OutputFile, OutputFileSplit, ProgramLookup};
#[cfg(feature = "playback")]
pub use playback::PlaybackSink;
pub use wav_file::WavFileSink;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::{AudioFormat, ChainMicros};

/// Seconds of audio the playback buffer between Ship and the device holds
pub const PLAYBACK_RING_SECONDS: u32 = 4;

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors that can occur while opening or writing a sink
#[derive(Error, Debug)]
pub enum OutputError {
    /// Output file could not be created or written
    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// WAV encoder failure
    #[error("WAV error on {path:?}: {source}")]
    Wav { path: PathBuf, source: hound::Error },

    /// Failed to get default device
    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Playback was requested from a build without the `playback` feature
    #[error("Playback output is not available in this build")]
    PlaybackUnavailable,

    /// The playback thread could not be started or stopped
    #[error("Playback thread failed: {0}")]
    Thread(String),

    /// More bytes were appended than the sink reported room for
    #[error("Playback buffer overrun: {dropped} of {offered} samples would be lost")]
    Overrun { dropped: usize, offered: usize },
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Sinks
// ═══════════════════════════════════════════════════════════════════════════════

/// Destination of shipped PCM bytes
pub trait OutputSink: Send {
    /// Queue whole frames of interleaved 16-bit little-endian PCM
    fn append(&mut self, bytes: &[u8]) -> OutputResult<()>;

    /// Chain position the listener has actually heard, if the sink can tell
    fn heard_at_chain_micros(&self) -> Option<ChainMicros>;

    /// Bytes the next `append` can take without loss; `None` when unbounded
    fn writable_bytes(&self) -> Option<usize> {
        None
    }

    /// Flush and close; further appends are ignored
    fn finish(&mut self) -> OutputResult<()>;
}

/// What a [`SinkFactory`] is asked to open
#[derive(Debug, Clone, Copy)]
pub enum SinkTarget<'a> {
    /// Live playback whose first byte plays chain time `start_at_chain_micros`
    Playback { start_at_chain_micros: ChainMicros },
    /// A new WAV file
    File(&'a Path),
}

/// Opens sinks on behalf of Ship
pub type SinkFactory =
    Box<dyn Fn(SinkTarget<'_>, AudioFormat) -> OutputResult<Box<dyn OutputSink>> + Send>;

/// cpal playback and `hound` WAV files
pub fn default_sink_factory() -> SinkFactory {
    Box::new(|target, format| match target {
        SinkTarget::File(path) => Ok(Box::new(WavFileSink::open(path, format)?)),
        #[cfg(feature = "playback")]
        SinkTarget::Playback {
            start_at_chain_micros,
        } => Ok(Box::new(PlaybackSink::start(format, start_at_chain_micros)?)),
        #[cfg(not(feature = "playback"))]
        SinkTarget::Playback { .. } => Err(OutputError::PlaybackUnavailable),
    })
}
