//! Fabricator: the craft phases' view of one segment under construction

use crate::model::{
    Catalog, InstrumentType, ProgramType, Segment, SegmentChoice, SegmentChoiceArrangement,
    SegmentChoiceArrangementPick, SegmentType,
};
use crate::store::{EntityStore, SegmentRecord};
use crate::types::{ChainMicros, EntityId};
use crate::work::{CraftOverride, FabricationError, FabricationResult};

/// Bound to a single `Crafting` segment for the length of one craft
///
/// Every entity added here is written straight to the store, attached to the
/// bound segment.
pub struct Fabricator<'a> {
    store: &'a EntityStore,
    catalog: &'a Catalog,
    segment: Segment,
    previous: Option<SegmentRecord>,
    craft_override: CraftOverride,
}

impl<'a> Fabricator<'a> {
    pub fn new(
        store: &'a EntityStore,
        catalog: &'a Catalog,
        segment: Segment,
        previous: Option<SegmentRecord>,
        craft_override: CraftOverride,
    ) -> Self {
        Self {
            store,
            catalog,
            segment,
            previous,
            craft_override,
        }
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn previous_segment(&self) -> Option<&Segment> {
        self.previous.as_ref().map(|r| &r.segment)
    }

    /// The override this segment was requested under
    pub fn craft_override(&self) -> &CraftOverride {
        &self.craft_override
    }

    /// Program of one type chosen for the previous segment
    pub fn previous_program_id(&self, program_type: ProgramType) -> Option<EntityId> {
        self.previous.as_ref().and_then(|r| {
            r.choices
                .iter()
                .find(|c| c.program_type == Some(program_type))
                .and_then(|c| c.program_id)
        })
    }

    /// Instrument of one type chosen for the previous segment
    pub fn previous_instrument_id(&self, instrument_type: InstrumentType) -> Option<EntityId> {
        self.previous.as_ref().and_then(|r| {
            r.choices
                .iter()
                .find(|c| c.instrument_type == Some(instrument_type))
                .and_then(|c| c.instrument_id)
        })
    }

    /// Program of one type already chosen for this segment
    pub fn program_id(&self, program_type: ProgramType) -> Option<EntityId> {
        self.store
            .read_program_choice(self.segment.id, program_type)
            .and_then(|c| c.program_id)
    }

    pub fn add_choice(&mut self, choice: SegmentChoice) -> FabricationResult<SegmentChoice> {
        Ok(self.store.put_choice(choice)?)
    }

    pub fn add_arrangement(
        &mut self,
        choice: &SegmentChoice,
        instrument_id: EntityId,
    ) -> FabricationResult<SegmentChoiceArrangement> {
        Ok(self.store.put_arrangement(SegmentChoiceArrangement {
            id: 0,
            segment_id: self.segment.id,
            choice_id: choice.id,
            instrument_id,
            mute: false,
        })?)
    }

    /// Place one audio event, `start_micros` relative to the segment begin
    pub fn add_pick(
        &mut self,
        arrangement: &SegmentChoiceArrangement,
        instrument_audio_id: EntityId,
        start_micros: ChainMicros,
        length_micros: Option<ChainMicros>,
        amplitude: f32,
    ) -> FabricationResult<SegmentChoiceArrangementPick> {
        Ok(self.store.put_pick(SegmentChoiceArrangementPick {
            id: 0,
            segment_id: self.segment.id,
            arrangement_id: arrangement.id,
            instrument_audio_id,
            start_micros,
            length_micros,
            amplitude,
            mute: false,
        })?)
    }

    /// Fix the segment's type, meter and length
    ///
    /// Duration is `bars × beats per bar` beats at `tempo`.
    pub fn set_timing(
        &mut self,
        segment_type: SegmentType,
        tempo: f64,
        beats_per_bar: u32,
        total_bars: u32,
    ) -> FabricationResult<()> {
        if tempo <= 0.0 || beats_per_bar == 0 || total_bars == 0 {
            return Err(FabricationError::InvalidTiming {
                segment: self.segment.id,
                tempo,
                beats_per_bar,
                total_bars,
            });
        }
        self.segment.segment_type = segment_type;
        self.segment.tempo = tempo;
        self.segment.beats_per_bar = beats_per_bar;
        self.segment.total_bars = total_bars;
        let beats = (total_bars * beats_per_bar) as f64;
        self.segment.duration_micros = (beats * self.segment.micros_per_beat()).round() as ChainMicros;
        self.store.update_segment(&self.segment)?;
        Ok(())
    }

    /// Clamped to `[0, 1]`
    pub fn set_intensity(&mut self, intensity: f64) -> FabricationResult<()> {
        self.segment.intensity = intensity.clamp(0.0, 1.0);
        self.store.update_segment(&self.segment)?;
        Ok(())
    }

    /// The segment as crafted so far
    pub fn into_segment(self) -> Segment {
        self.segment
    }
}
