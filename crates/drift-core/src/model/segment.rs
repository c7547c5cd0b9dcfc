//! Segment and the craft entities attached to it

use std::fmt;

use serde::{Deserialize, Serialize};

use super::catalog::{default_intensity, InstrumentType, ProgramType};
use crate::types::{ChainMicros, EntityId};

/// Per-segment lifecycle: `Planned → Crafting → Crafted → Dubbing → Dubbed`
///
/// Ordered so that `state >= Crafted` means the segment's content is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    Planned,
    Crafting,
    Crafted,
    Dubbing,
    Dubbed,
}

impl SegmentState {
    /// Craft has completed; the segment may be mixed and shipped
    pub fn is_crafted(self) -> bool {
        self >= SegmentState::Crafted
    }

    /// Whether `next` is the single legal step after this state
    pub fn can_advance_to(self, next: SegmentState) -> bool {
        matches!(
            (self, next),
            (SegmentState::Planned, SegmentState::Crafting)
                | (SegmentState::Crafting, SegmentState::Crafted)
                | (SegmentState::Crafted, SegmentState::Dubbing)
                | (SegmentState::Dubbing, SegmentState::Dubbed)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            SegmentState::Planned => "Planned",
            SegmentState::Crafting => "Crafting",
            SegmentState::Crafted => "Crafted",
            SegmentState::Dubbing => "Dubbing",
            SegmentState::Dubbed => "Dubbed",
        }
    }
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a segment relates to the one before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    /// Not yet decided; set by the macro/main craft phase
    Pending,
    Initial,
    Continue,
    NextMain,
    NextMacro,
}

/// One fixed-duration slice of the chain timeline
///
/// `id` doubles as the segment offset: contiguous integers from the chain's
/// first segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: EntityId,
    pub chain_id: EntityId,
    pub begin_micros: ChainMicros,
    /// Zero until the macro/main craft phase decides the length
    pub duration_micros: ChainMicros,
    pub segment_type: SegmentType,
    pub state: SegmentState,
    pub tempo: f64,
    pub beats_per_bar: u32,
    pub total_bars: u32,
    /// How full the arrangement plays, 0.0 to 1.0
    #[serde(default = "default_intensity")]
    pub intensity: f64,
}

impl Segment {
    /// A new segment in `Planned` state
    pub fn planned(id: EntityId, chain_id: EntityId, begin_micros: ChainMicros) -> Self {
        Self {
            id,
            chain_id,
            begin_micros,
            duration_micros: 0,
            segment_type: SegmentType::Pending,
            state: SegmentState::Planned,
            tempo: 0.0,
            beats_per_bar: 4,
            total_bars: 0,
            intensity: default_intensity(),
        }
    }

    pub fn end_micros(&self) -> ChainMicros {
        self.begin_micros + self.duration_micros
    }

    /// Whether the chain instant falls inside `[begin, end)`
    pub fn contains(&self, micros: ChainMicros) -> bool {
        self.begin_micros <= micros && micros < self.end_micros()
    }

    /// Microseconds per beat at the segment tempo
    pub fn micros_per_beat(&self) -> f64 {
        if self.tempo > 0.0 {
            60_000_000.0 / self.tempo
        } else {
            0.0
        }
    }
}

/// A program or instrument chosen for a segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentChoice {
    pub id: EntityId,
    pub segment_id: EntityId,
    pub program_id: Option<EntityId>,
    pub program_type: Option<ProgramType>,
    pub instrument_id: Option<EntityId>,
    pub instrument_type: Option<InstrumentType>,
    pub mute: bool,
}

impl SegmentChoice {
    pub fn program(segment_id: EntityId, program_type: ProgramType, program_id: EntityId) -> Self {
        Self {
            id: 0,
            segment_id,
            program_id: Some(program_id),
            program_type: Some(program_type),
            instrument_id: None,
            instrument_type: None,
            mute: false,
        }
    }

    pub fn instrument(
        segment_id: EntityId,
        instrument_type: InstrumentType,
        instrument_id: EntityId,
    ) -> Self {
        Self {
            id: 0,
            segment_id,
            program_id: None,
            program_type: None,
            instrument_id: Some(instrument_id),
            instrument_type: Some(instrument_type),
            mute: false,
        }
    }
}

/// Binding of a choice to an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentChoiceArrangement {
    pub id: EntityId,
    pub segment_id: EntityId,
    pub choice_id: EntityId,
    pub instrument_id: EntityId,
    pub mute: bool,
}

/// One concrete audio event to mix
///
/// `start_micros` is relative to the segment begin. A missing length means
/// the whole instrument audio plays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentChoiceArrangementPick {
    pub id: EntityId,
    pub segment_id: EntityId,
    pub arrangement_id: EntityId,
    pub instrument_audio_id: EntityId,
    pub start_micros: ChainMicros,
    pub length_micros: Option<ChainMicros>,
    pub amplitude: f32,
    pub mute: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_order_marks_crafted() {
        assert!(!SegmentState::Planned.is_crafted());
        assert!(!SegmentState::Crafting.is_crafted());
        assert!(SegmentState::Crafted.is_crafted());
        assert!(SegmentState::Dubbing.is_crafted());
        assert!(SegmentState::Dubbed.is_crafted());
    }

    #[test]
    fn test_only_single_steps_are_legal() {
        assert!(SegmentState::Planned.can_advance_to(SegmentState::Crafting));
        assert!(SegmentState::Dubbing.can_advance_to(SegmentState::Dubbed));
        assert!(!SegmentState::Planned.can_advance_to(SegmentState::Crafted));
        assert!(!SegmentState::Crafted.can_advance_to(SegmentState::Crafting));
        assert!(!SegmentState::Dubbed.can_advance_to(SegmentState::Dubbed));
    }

    #[test]
    fn test_contains_is_half_open() {
        let mut segment = Segment::planned(3, 1, 1_000_000);
        segment.duration_micros = 500_000;
        assert!(segment.contains(1_000_000));
        assert!(segment.contains(1_499_999));
        assert!(!segment.contains(1_500_000));
        assert_eq!(segment.end_micros(), 1_500_000);
    }
}
