//! Layer phase: places one instrument per type on the segment's beat grid

use super::{CraftPhase, Fabricator};
use crate::model::{InstrumentType, SegmentChoice};
use crate::types::ChainMicros;
use crate::work::FabricationResult;

/// Crafts a layer for each of its instrument types
///
/// The instrument rotates through the unmuted instruments of the type, one
/// step per segment. Each beat position of the instrument's pattern gets a
/// pick in every bar, cycling through the instrument's audio. Types without
/// instruments or audio are left silent.
#[derive(Debug)]
pub struct LayerCraft {
    name: String,
    instrument_types: Vec<InstrumentType>,
}

impl LayerCraft {
    pub fn new(name: impl Into<String>, instrument_types: &[InstrumentType]) -> Self {
        Self {
            name: name.into(),
            instrument_types: instrument_types.to_vec(),
        }
    }

    fn craft_layer(
        fabricator: &mut Fabricator<'_>,
        instrument_type: InstrumentType,
    ) -> FabricationResult<usize> {
        let catalog = fabricator.catalog();
        let instruments = catalog.instruments_of_type(instrument_type);
        if instruments.is_empty() {
            return Ok(0);
        }
        let segment = fabricator.segment().clone();
        let instrument = instruments[segment.id as usize % instruments.len()];
        let audios = catalog.audios_of_instrument(instrument.id);
        if audios.is_empty() {
            log::debug!("[CRAFT] Instrument[{}] '{}' has no audio", instrument.id, instrument.name);
            return Ok(0);
        }

        let choice = fabricator.add_choice(SegmentChoice::instrument(
            segment.id,
            instrument_type,
            instrument.id,
        ))?;
        let arrangement = fabricator.add_arrangement(&choice, instrument.id)?;

        let beats_per_bar = segment.beats_per_bar as f64;
        let micros_per_beat = segment.micros_per_beat();
        let mut placed = 0;
        for bar in 0..segment.total_bars {
            for beat in instrument.pattern.iter().filter(|b| **b >= 0.0 && **b < beats_per_bar) {
                let position = bar as f64 * beats_per_bar + beat;
                let start = (position * micros_per_beat).round() as ChainMicros;
                let audio = audios[placed % audios.len()];
                fabricator.add_pick(&arrangement, audio.id, start, None, 1.0)?;
                placed += 1;
            }
        }
        Ok(placed)
    }
}

impl CraftPhase for LayerCraft {
    fn name(&self) -> &str {
        &self.name
    }

    fn do_work(&mut self, fabricator: &mut Fabricator<'_>) -> FabricationResult<()> {
        for instrument_type in &self.instrument_types {
            let placed = Self::craft_layer(fabricator, *instrument_type)?;
            if placed > 0 {
                log::trace!(
                    "[CRAFT] Segment[{}] {} layer: {} picks",
                    fabricator.segment().id,
                    instrument_type,
                    placed
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::craft::MacroMainCraft;
    use crate::model::{Segment, SegmentState};
    use crate::store::EntityStore;
    use crate::testing::fixtures;
    use crate::work::CraftOverride;

    fn crafted_store(phase: &mut LayerCraft) -> EntityStore {
        let (store, catalog) = (EntityStore::new(), fixtures::catalog());
        store.create_segment(Segment::planned(0, 1, 0)).unwrap();
        store
            .update_segment_state(0, SegmentState::Planned, SegmentState::Crafting)
            .unwrap();
        let segment = store.read_segment(0).unwrap();
        let mut fabricator = Fabricator::new(&store, &catalog, segment, None, CraftOverride::Ready);
        MacroMainCraft::new().do_work(&mut fabricator).unwrap();
        phase.do_work(&mut fabricator).unwrap();
        store
    }

    #[test]
    fn test_drum_pattern_lands_on_beats() {
        let store = crafted_store(&mut LayerCraft::new("beat", &[InstrumentType::Drum]));
        let picks = store.read_picks(&[0]);
        let starts: Vec<ChainMicros> = picks.iter().map(|p| p.start_micros).collect();
        // 4 beats per bar at 240 bpm
        assert_eq!(starts, vec![0, 250_000, 500_000, 750_000]);
        // alternates kick and snare
        assert_eq!(picks[0].instrument_audio_id, fixtures::KICK_AUDIO);
        assert_eq!(picks[1].instrument_audio_id, fixtures::SNARE_AUDIO);
    }

    #[test]
    fn test_missing_instrument_type_is_silent() {
        let store = crafted_store(&mut LayerCraft::new("hook", &[InstrumentType::Hook]));
        assert!(store.read_picks(&[0]).is_empty());
        assert_eq!(store.read_choices(0).len(), 2);
    }
}
