//! Templates and their mixer configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::catalog::InstrumentType;
use crate::types::EntityId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: EntityId,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub config: TemplateConfig,
}

/// Per-template mixer settings
///
/// Compressor times are expressed in seconds and converted to frames at the
/// output frame rate when the mixer is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Amplitude the lookahead compressors steer toward
    pub mix_compress_to_amplitude: f32,
    /// Lookahead window used to find the upcoming peak
    pub mix_compress_ahead_seconds: f32,
    /// Time for the compression ratio to settle on a new target
    pub mix_compress_decay_seconds: f32,
    pub mix_compress_ratio_min: f32,
    pub mix_compress_ratio_max: f32,
    /// Frames between compressor target recomputations
    pub dsp_buffer_size: usize,
    /// Release tail applied after a pick's stop time
    pub release_millis: u32,
    /// Output level per instrument bus (1.0 when absent)
    pub bus_levels: BTreeMap<InstrumentType, f32>,
    /// An override cuts the playing segment short at the first multiple of
    /// this many bars past what has been dubbed (0 never cuts)
    pub cutoff_minimum_bars: u32,
    /// Intensity layers per instrument type (1 when absent)
    pub intensity_layers: BTreeMap<InstrumentType, u32>,
    /// Share of a layer's intensity span over which it fades in (0.5 when absent)
    pub intensity_threshold: BTreeMap<InstrumentType, f64>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            mix_compress_to_amplitude: 1.0,
            mix_compress_ahead_seconds: 0.05,
            mix_compress_decay_seconds: 0.01,
            mix_compress_ratio_min: 0.5,
            mix_compress_ratio_max: 1.5,
            dsp_buffer_size: 1024,
            release_millis: 5,
            bus_levels: BTreeMap::new(),
            cutoff_minimum_bars: 2,
            intensity_layers: BTreeMap::from([
                (InstrumentType::Background, 3),
                (InstrumentType::Bass, 1),
                (InstrumentType::Drum, 1),
                (InstrumentType::Hook, 3),
                (InstrumentType::Pad, 3),
                (InstrumentType::Percussion, 3),
                (InstrumentType::Stab, 2),
                (InstrumentType::Sticky, 2),
                (InstrumentType::Stripe, 2),
                (InstrumentType::Transition, 3),
            ]),
            intensity_threshold: BTreeMap::new(),
        }
    }
}

impl TemplateConfig {
    pub fn bus_level(&self, instrument_type: InstrumentType) -> f32 {
        self.bus_levels.get(&instrument_type).copied().unwrap_or(1.0)
    }

    pub fn intensity_layers(&self, instrument_type: InstrumentType) -> u32 {
        self.intensity_layers.get(&instrument_type).copied().unwrap_or(1).max(1)
    }

    pub fn intensity_threshold(&self, instrument_type: InstrumentType) -> f64 {
        self.intensity_threshold.get(&instrument_type).copied().unwrap_or(0.5)
    }
}
