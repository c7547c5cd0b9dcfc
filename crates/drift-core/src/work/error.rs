//! Fabrication error types

use std::path::PathBuf;

use thiserror::Error;

use crate::audio::AudioError;
use crate::config::ConfigError;
use crate::content::ContentError;
use crate::mixer::MixerError;
use crate::model::ProgramType;
use crate::output::OutputError;
use crate::store::StoreError;
use crate::types::EntityId;

use super::ManagerState;

/// Any error that stops fabrication
#[derive(Error, Debug)]
pub enum FabricationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Mixer(#[from] MixerError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("Invalid settings: {0}")]
    Config(#[from] ConfigError),

    #[error("Program[{0}] not found")]
    ProgramNotFound(EntityId),

    #[error("No {0:?} program carries memes {1:?}")]
    NoProgramWithMemes(ProgramType, Vec<String>),

    #[error("Catalog has no {0:?} programs")]
    NoPrograms(ProgramType),

    #[error("Segment[{segment}] timing invalid: {tempo} bpm, {beats_per_bar} beats per bar, {total_bars} bars")]
    InvalidTiming {
        segment: EntityId,
        tempo: f64,
        beats_per_bar: u32,
        total_bars: u32,
    },

    #[error("Intensity {0} is outside 0.0 to 1.0")]
    IntensityOutOfRange(f64),

    #[error("Segment[{0}] was crafted without a duration")]
    NoDuration(EntityId),

    #[error("Template '{0}' not found")]
    TemplateNotFound(String),

    #[error("Snapshot {path:?}: {reason}")]
    Snapshot { path: PathBuf, reason: String },

    #[error("Cannot {action} while {state}")]
    InvalidManagerState {
        action: &'static str,
        state: ManagerState,
    },

    #[error("Failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        source: std::io::Error,
    },
}

pub type FabricationResult<T> = Result<T, FabricationError>;
