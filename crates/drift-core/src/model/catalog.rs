//! Read-only catalog: programs, instruments and instrument audio
//!
//! Loaded once before the pipeline initializes and never mutated during a
//! run. The serialized form is a flat [`CatalogData`] document; lookups go
//! through id-keyed indexes built on load.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::template::Template;
use crate::types::{seconds_to_micros, ChainMicros, EntityId};

/// Role of a program in a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramType {
    Macro,
    Main,
}

/// Instrument family; each family mixes on its own bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentType {
    Drum,
    Bass,
    Pad,
    Stab,
    Sticky,
    Stripe,
    Hook,
    Percussion,
    Transition,
    Background,
}

impl InstrumentType {
    pub const ALL: [InstrumentType; 10] = [
        InstrumentType::Drum,
        InstrumentType::Bass,
        InstrumentType::Pad,
        InstrumentType::Stab,
        InstrumentType::Sticky,
        InstrumentType::Stripe,
        InstrumentType::Hook,
        InstrumentType::Percussion,
        InstrumentType::Transition,
        InstrumentType::Background,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InstrumentType::Drum => "Drum",
            InstrumentType::Bass => "Bass",
            InstrumentType::Pad => "Pad",
            InstrumentType::Stab => "Stab",
            InstrumentType::Sticky => "Sticky",
            InstrumentType::Stripe => "Stripe",
            InstrumentType::Hook => "Hook",
            InstrumentType::Percussion => "Percussion",
            InstrumentType::Transition => "Transition",
            InstrumentType::Background => "Background",
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: EntityId,
    pub name: String,
    pub program_type: ProgramType,
    /// Beats per minute
    pub tempo: f64,
    #[serde(default = "default_beats_per_bar")]
    pub beats_per_bar: u32,
    /// Bars per segment when this program is the main program
    #[serde(default = "default_bars")]
    pub bars: u32,
    #[serde(default)]
    pub memes: Vec<String>,
    /// 0.0 (sparse) to 1.0 (full); segments take the mean of their macro
    /// and main programs
    #[serde(default = "default_intensity")]
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: EntityId,
    pub name: String,
    pub instrument_type: InstrumentType,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub memes: Vec<String>,
    /// Beat positions within each bar where this instrument plays
    #[serde(default)]
    pub pattern: Vec<f64>,
    /// Overrides the template release time for this instrument
    #[serde(default)]
    pub release_millis: Option<u32>,
    #[serde(default)]
    pub muted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentAudio {
    pub id: EntityId,
    pub instrument_id: EntityId,
    pub name: String,
    /// Storage key of the waveform, relative to the instrument directory
    pub waveform_key: String,
    /// Pre-roll before the musical hit inside the waveform
    #[serde(default)]
    pub transient_seconds: f64,
    pub length_seconds: f64,
    #[serde(default = "default_volume")]
    pub volume: f32,
    /// Which intensity layer of its instrument this audio belongs to, 0.0 to 1.0
    #[serde(default)]
    pub intensity: f64,
}

impl InstrumentAudio {
    pub fn transient_micros(&self) -> ChainMicros {
        seconds_to_micros(self.transient_seconds)
    }

    pub fn length_micros(&self) -> ChainMicros {
        seconds_to_micros(self.length_seconds)
    }
}

fn default_beats_per_bar() -> u32 {
    4
}

fn default_bars() -> u32 {
    4
}

fn default_volume() -> f32 {
    1.0
}

pub(crate) fn default_intensity() -> f64 {
    0.5
}

/// Serialized catalog document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogData {
    pub templates: Vec<Template>,
    pub programs: Vec<Program>,
    pub instruments: Vec<Instrument>,
    pub instrument_audios: Vec<InstrumentAudio>,
}

/// Indexed, immutable catalog for one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "CatalogData", into = "CatalogData")]
pub struct Catalog {
    templates: Vec<Template>,
    programs: BTreeMap<EntityId, Program>,
    instruments: BTreeMap<EntityId, Instrument>,
    audios: BTreeMap<EntityId, InstrumentAudio>,
}

impl From<CatalogData> for Catalog {
    fn from(data: CatalogData) -> Self {
        Self {
            templates: data.templates,
            programs: data.programs.into_iter().map(|p| (p.id, p)).collect(),
            instruments: data.instruments.into_iter().map(|i| (i.id, i)).collect(),
            audios: data.instrument_audios.into_iter().map(|a| (a.id, a)).collect(),
        }
    }
}

impl From<Catalog> for CatalogData {
    fn from(catalog: Catalog) -> Self {
        Self {
            templates: catalog.templates,
            programs: catalog.programs.into_values().collect(),
            instruments: catalog.instruments.into_values().collect(),
            instrument_audios: catalog.audios.into_values().collect(),
        }
    }
}

impl Catalog {
    pub fn template(&self, key: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.key == key)
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn program(&self, id: EntityId) -> Option<&Program> {
        self.programs.get(&id)
    }

    /// Programs of one type, in id order
    pub fn programs_of_type(&self, program_type: ProgramType) -> Vec<&Program> {
        self.programs
            .values()
            .filter(|p| p.program_type == program_type)
            .collect()
    }

    /// First program of the type carrying every one of the memes
    pub fn program_with_memes(&self, program_type: ProgramType, memes: &[String]) -> Option<&Program> {
        self.programs_of_type(program_type)
            .into_iter()
            .find(|p| memes.iter().all(|m| p.memes.iter().any(|pm| pm.eq_ignore_ascii_case(m))))
    }

    pub fn instrument(&self, id: EntityId) -> Option<&Instrument> {
        self.instruments.get(&id)
    }

    /// Unmuted instruments of one type, in id order
    pub fn instruments_of_type(&self, instrument_type: InstrumentType) -> Vec<&Instrument> {
        self.instruments
            .values()
            .filter(|i| i.instrument_type == instrument_type && !i.muted)
            .collect()
    }

    pub fn audio(&self, id: EntityId) -> Option<&InstrumentAudio> {
        self.audios.get(&id)
    }

    /// Audio belonging to one instrument, in id order
    pub fn audios_of_instrument(&self, instrument_id: EntityId) -> Vec<&InstrumentAudio> {
        self.audios
            .values()
            .filter(|a| a.instrument_id == instrument_id)
            .collect()
    }

    pub fn audios(&self) -> impl Iterator<Item = &InstrumentAudio> {
        self.audios.values()
    }

    pub fn audio_count(&self) -> usize {
        self.audios.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG_YAML: &str = r#"
templates:
  - id: 1
    key: slow
    name: Slow Drift
programs:
  - id: 10
    name: Dawn
    program_type: macro
    tempo: 90
    memes: [Calm]
  - id: 20
    name: Pulse
    program_type: main
    tempo: 120
    bars: 2
    memes: [calm, bright]
instruments:
  - id: 100
    name: Kit
    instrument_type: drum
    pattern: [0, 2]
instrument_audios:
  - id: 1000
    instrument_id: 100
    name: Kick
    waveform_key: kick.wav
    transient_seconds: 0.01
    length_seconds: 0.5
"#;

    #[test]
    fn test_yaml_catalog_is_indexed() {
        let catalog: Catalog = serde_yaml::from_str(CATALOG_YAML).unwrap();
        assert!(catalog.template("slow").is_some());
        assert_eq!(catalog.program(20).map(|p| p.bars), Some(2));
        assert_eq!(catalog.program(10).map(|p| p.beats_per_bar), Some(4));
        assert_eq!(catalog.instruments_of_type(InstrumentType::Drum).len(), 1);
        assert_eq!(catalog.audios_of_instrument(100).len(), 1);
        assert_eq!(catalog.audio(1000).map(|a| a.transient_micros()), Some(10_000));
    }

    #[test]
    fn test_program_with_memes_is_case_insensitive() {
        let catalog: Catalog = serde_yaml::from_str(CATALOG_YAML).unwrap();
        let memes = vec!["CALM".to_string(), "Bright".to_string()];
        assert_eq!(
            catalog.program_with_memes(ProgramType::Main, &memes).map(|p| p.id),
            Some(20)
        );
        assert!(catalog
            .program_with_memes(ProgramType::Macro, &memes)
            .is_none());
    }
}
