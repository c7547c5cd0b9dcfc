//! In-memory entity store
//!
//! The single source of truth for the chain and its segments. Craft appends
//! segments and advances their state; Dub and Ship read. Every read clones
//! out of a short read-locked section, so a reader never observes a record
//! mid-write.

mod error;

pub use error::{StoreError, StoreResult};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::model::{
    Chain, ChainState, ProgramType, Segment, SegmentChoice, SegmentChoiceArrangement,
    SegmentChoiceArrangementPick, SegmentState,
};
use crate::types::{ChainMicros, EntityId};

/// A segment together with every entity crafted for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub segment: Segment,
    #[serde(default)]
    pub choices: Vec<SegmentChoice>,
    #[serde(default)]
    pub arrangements: Vec<SegmentChoiceArrangement>,
    #[serde(default)]
    pub picks: Vec<SegmentChoiceArrangementPick>,
}

impl SegmentRecord {
    fn new(segment: Segment) -> Self {
        Self {
            segment,
            choices: Vec::new(),
            arrangements: Vec::new(),
            picks: Vec::new(),
        }
    }
}

/// Thread-safe store of the chain, segments, choices, arrangements and picks
pub struct EntityStore {
    chain: RwLock<Option<Chain>>,
    segments: RwLock<BTreeMap<EntityId, SegmentRecord>>,
    /// Id source for choices, arrangements and picks
    next_entity_id: AtomicU64,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            chain: RwLock::new(None),
            segments: RwLock::new(BTreeMap::new()),
            next_entity_id: AtomicU64::new(1),
        }
    }

    fn segments(&self) -> RwLockReadGuard<'_, BTreeMap<EntityId, SegmentRecord>> {
        self.segments.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn segments_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<EntityId, SegmentRecord>> {
        self.segments.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> EntityId {
        self.next_entity_id.fetch_add(1, Ordering::Relaxed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Chain
    // ═══════════════════════════════════════════════════════════════════════

    pub fn put_chain(&self, chain: Chain) {
        *self.chain.write().unwrap_or_else(PoisonError::into_inner) = Some(chain);
    }

    pub fn read_chain(&self) -> Option<Chain> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn update_chain_state(&self, state: ChainState) -> StoreResult<Chain> {
        let mut guard = self.chain.write().unwrap_or_else(PoisonError::into_inner);
        let chain = guard.as_mut().ok_or(StoreError::NoChain)?;
        chain.state = state;
        Ok(chain.clone())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Segments
    // ═══════════════════════════════════════════════════════════════════════

    /// Append a segment, enforcing offset and timeline contiguity
    ///
    /// The first segment of an empty store may start anywhere; every later
    /// segment must take the next offset and begin where the last one ends.
    pub fn create_segment(&self, segment: Segment) -> StoreResult<Segment> {
        let mut segments = self.segments_mut();
        if let Some(last) = segments.values().next_back().map(|r| &r.segment) {
            if segment.id != last.id + 1 {
                return Err(StoreError::OffsetGap {
                    id: segment.id,
                    expected: last.id + 1,
                });
            }
            if segment.begin_micros != last.end_micros() {
                return Err(StoreError::NotContiguous {
                    id: segment.id,
                    previous: last.id,
                    expected: last.end_micros(),
                    found: segment.begin_micros,
                });
            }
        }
        segments.insert(segment.id, SegmentRecord::new(segment.clone()));
        Ok(segment)
    }

    pub fn read_segment(&self, id: EntityId) -> Option<Segment> {
        self.segments().get(&id).map(|r| r.segment.clone())
    }

    pub fn read_last_segment(&self) -> Option<Segment> {
        self.segments().values().next_back().map(|r| r.segment.clone())
    }

    pub fn read_first_segment(&self) -> Option<Segment> {
        self.segments().values().next().map(|r| r.segment.clone())
    }

    /// The most recent segment whose craft has completed
    pub fn read_last_crafted_segment(&self) -> Option<Segment> {
        self.segments()
            .values()
            .rev()
            .find(|r| r.segment.state.is_crafted())
            .map(|r| r.segment.clone())
    }

    pub fn read_all_segments(&self) -> Vec<Segment> {
        self.segments().values().map(|r| r.segment.clone()).collect()
    }

    /// Segments overlapping `[from, to]`, in offset order, any state
    ///
    /// A zero-width range returns the segment containing that instant.
    pub fn read_segments_spanning(&self, from: ChainMicros, to: ChainMicros) -> Vec<Segment> {
        self.segments()
            .values()
            .map(|r| &r.segment)
            .filter(|s| {
                if from == to {
                    s.contains(from)
                } else {
                    s.begin_micros < to && s.end_micros() > from
                }
            })
            .cloned()
            .collect()
    }

    /// The crafted segment containing a chain instant
    pub fn read_segment_at_chain_micros(&self, micros: ChainMicros) -> Option<Segment> {
        self.segments()
            .values()
            .map(|r| &r.segment)
            .find(|s| s.state.is_crafted() && s.contains(micros))
            .cloned()
    }

    pub fn segment_count(&self) -> usize {
        self.segments().len()
    }

    /// Replace a segment's attributes without touching its state
    pub fn update_segment(&self, segment: &Segment) -> StoreResult<()> {
        let mut segments = self.segments_mut();
        let record = segments
            .get_mut(&segment.id)
            .ok_or(StoreError::SegmentNotFound(segment.id))?;
        let state = record.segment.state;
        record.segment = segment.clone();
        record.segment.state = state;
        Ok(())
    }

    /// Advance a segment one step through its lifecycle
    ///
    /// Fails if the step is not a legal transition or the segment is not in
    /// the `from` state.
    pub fn update_segment_state(
        &self,
        id: EntityId,
        from: SegmentState,
        to: SegmentState,
    ) -> StoreResult<Segment> {
        if !from.can_advance_to(to) {
            return Err(StoreError::IllegalTransition { id, from, to });
        }
        let mut segments = self.segments_mut();
        let record = segments.get_mut(&id).ok_or(StoreError::SegmentNotFound(id))?;
        if record.segment.state != from {
            return Err(StoreError::InvalidState {
                id,
                required: from,
                found: record.segment.state,
            });
        }
        record.segment.state = to;
        Ok(record.segment.clone())
    }

    /// Delete every segment with an offset greater than `id`
    pub fn delete_segments_after(&self, id: EntityId) -> usize {
        let mut segments = self.segments_mut();
        let removed = segments.split_off(&(id + 1));
        removed.len()
    }

    /// Shorten the last segment to `duration_micros` and trim its picks
    ///
    /// Picks starting at or past the new end are deleted; picks with a
    /// length running past it are shortened to end there. Returns the
    /// updated segment and the number of picks deleted or shortened.
    pub fn cut_segment_short(
        &self,
        id: EntityId,
        duration_micros: ChainMicros,
        total_bars: u32,
    ) -> StoreResult<(Segment, usize)> {
        let mut segments = self.segments_mut();
        if segments.keys().next_back() != Some(&id) {
            return Err(StoreError::NotLastSegment(id));
        }
        let record = segments.get_mut(&id).ok_or(StoreError::SegmentNotFound(id))?;
        let duration = record.segment.duration_micros;
        if duration_micros <= 0 || duration_micros > duration {
            return Err(StoreError::CutoffOutOfRange {
                id,
                requested: duration_micros,
                duration,
            });
        }

        let before = record.picks.len();
        record.picks.retain(|p| p.start_micros < duration_micros);
        let mut trimmed = before - record.picks.len();
        for pick in &mut record.picks {
            let end = pick.length_micros.map(|length| pick.start_micros + length);
            if end.is_some_and(|end| end > duration_micros) {
                pick.length_micros = Some(duration_micros - pick.start_micros);
                trimmed += 1;
            }
        }
        record.segment.duration_micros = duration_micros;
        record.segment.total_bars = total_bars;
        Ok((record.segment.clone(), trimmed))
    }

    /// Delete every segment with an offset less than `id`
    pub fn delete_segments_before(&self, id: EntityId) -> usize {
        let mut segments = self.segments_mut();
        let kept = segments.split_off(&id);
        let removed = segments.len();
        *segments = kept;
        removed
    }

    /// Delete every segment that ends strictly before `micros`
    ///
    /// A segment ending exactly at `micros` is kept.
    pub fn delete_segments_ending_before(&self, micros: ChainMicros) -> usize {
        let first_kept = self
            .segments()
            .values()
            .find(|r| r.segment.end_micros() >= micros)
            .map(|r| r.segment.id);
        match first_kept {
            Some(id) => self.delete_segments_before(id),
            None => {
                let mut segments = self.segments_mut();
                let removed = segments.len();
                segments.clear();
                removed
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Choices, arrangements, picks
    // ═══════════════════════════════════════════════════════════════════════

    pub fn put_choice(&self, mut choice: SegmentChoice) -> StoreResult<SegmentChoice> {
        let mut segments = self.segments_mut();
        let record = segments
            .get_mut(&choice.segment_id)
            .ok_or(StoreError::SegmentNotFound(choice.segment_id))?;
        choice.id = self.next_id();
        record.choices.push(choice.clone());
        Ok(choice)
    }

    pub fn put_arrangement(
        &self,
        mut arrangement: SegmentChoiceArrangement,
    ) -> StoreResult<SegmentChoiceArrangement> {
        let mut segments = self.segments_mut();
        let record = segments
            .get_mut(&arrangement.segment_id)
            .ok_or(StoreError::SegmentNotFound(arrangement.segment_id))?;
        if !record.choices.iter().any(|c| c.id == arrangement.choice_id) {
            return Err(StoreError::ChoiceNotFound(arrangement.choice_id));
        }
        arrangement.id = self.next_id();
        record.arrangements.push(arrangement.clone());
        Ok(arrangement)
    }

    pub fn put_pick(
        &self,
        mut pick: SegmentChoiceArrangementPick,
    ) -> StoreResult<SegmentChoiceArrangementPick> {
        let mut segments = self.segments_mut();
        let record = segments
            .get_mut(&pick.segment_id)
            .ok_or(StoreError::SegmentNotFound(pick.segment_id))?;
        if !record.arrangements.iter().any(|a| a.id == pick.arrangement_id) {
            return Err(StoreError::ArrangementNotFound(pick.arrangement_id));
        }
        pick.id = self.next_id();
        record.picks.push(pick.clone());
        Ok(pick)
    }

    pub fn read_choices(&self, segment_id: EntityId) -> Vec<SegmentChoice> {
        self.segments()
            .get(&segment_id)
            .map(|r| r.choices.clone())
            .unwrap_or_default()
    }

    /// The program choice of one type in a segment
    pub fn read_program_choice(
        &self,
        segment_id: EntityId,
        program_type: ProgramType,
    ) -> Option<SegmentChoice> {
        self.segments().get(&segment_id).and_then(|r| {
            r.choices
                .iter()
                .find(|c| c.program_type == Some(program_type))
                .cloned()
        })
    }

    /// Picks across several segments, ordered by chain start time
    pub fn read_picks(&self, segment_ids: &[EntityId]) -> Vec<SegmentChoiceArrangementPick> {
        let segments = self.segments();
        let mut picks: Vec<(ChainMicros, SegmentChoiceArrangementPick)> = segment_ids
            .iter()
            .filter_map(|id| segments.get(id))
            .flat_map(|r| {
                let begin = r.segment.begin_micros;
                r.picks.iter().map(move |p| (begin + p.start_micros, p.clone()))
            })
            .collect();
        picks.sort_by_key(|(start, pick)| (*start, pick.id));
        picks.into_iter().map(|(_, pick)| pick).collect()
    }

    pub fn read_record(&self, segment_id: EntityId) -> Option<SegmentRecord> {
        self.segments().get(&segment_id).cloned()
    }

    pub fn read_records(&self, segment_ids: &[EntityId]) -> Vec<SegmentRecord> {
        let segments = self.segments();
        segment_ids
            .iter()
            .filter_map(|id| segments.get(id).cloned())
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Whole-store operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Every record, in offset order
    pub fn snapshot(&self) -> Vec<SegmentRecord> {
        self.segments().values().cloned().collect()
    }

    /// Replace the store contents with a previously captured chain
    pub fn restore(&self, chain: Chain, records: Vec<SegmentRecord>) -> StoreResult<()> {
        let mut previous: Option<&Segment> = None;
        for record in &records {
            if let Some(last) = previous {
                if record.segment.id != last.id + 1 {
                    return Err(StoreError::OffsetGap {
                        id: record.segment.id,
                        expected: last.id + 1,
                    });
                }
                if record.segment.begin_micros != last.end_micros() {
                    return Err(StoreError::NotContiguous {
                        id: record.segment.id,
                        previous: last.id,
                        expected: last.end_micros(),
                        found: record.segment.begin_micros,
                    });
                }
            }
            previous = Some(&record.segment);
        }

        let max_entity_id = records
            .iter()
            .flat_map(|r| {
                r.choices
                    .iter()
                    .map(|c| c.id)
                    .chain(r.arrangements.iter().map(|a| a.id))
                    .chain(r.picks.iter().map(|p| p.id))
            })
            .max()
            .unwrap_or(0);
        self.next_entity_id.store(max_entity_id + 1, Ordering::Relaxed);

        *self.segments_mut() = records.into_iter().map(|r| (r.segment.id, r)).collect();
        self.put_chain(chain);
        Ok(())
    }

    pub fn clear(&self) {
        self.segments_mut().clear();
        *self.chain.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.next_entity_id.store(1, Ordering::Relaxed);
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}
