//! When file output starts a new file

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::OutputFileMode;
use crate::model::{ProgramType, Segment};
use crate::store::EntityStore;
use crate::types::{ChainMicros, EntityId};

/// Resolves the program a segment was crafted with
pub type ProgramLookup = Arc<dyn Fn(&Segment) -> Option<EntityId> + Send + Sync>;

/// Rule deciding whether the next segment continues the open file
#[derive(Clone)]
pub enum OutputFileSplit {
    Continuous,
    Segment,
    /// Split when the main program changes
    Main(ProgramLookup),
    /// Split when the macro program changes
    Macro(ProgramLookup),
}

impl OutputFileSplit {
    /// The split rule for a mode, resolving programs through the store
    pub fn from_mode(mode: OutputFileMode, store: Arc<EntityStore>) -> Self {
        let lookup = |program_type: ProgramType| -> ProgramLookup {
            let store = store.clone();
            Arc::new(move |segment: &Segment| {
                store
                    .read_program_choice(segment.id, program_type)
                    .and_then(|c| c.program_id)
            })
        };
        match mode {
            OutputFileMode::Continuous => Self::Continuous,
            OutputFileMode::Segment => Self::Segment,
            OutputFileMode::Main => Self::Main(lookup(ProgramType::Main)),
            OutputFileMode::Macro => Self::Macro(lookup(ProgramType::Macro)),
        }
    }

    /// Whether `next` belongs in the same file as `last`
    ///
    /// An unresolvable program keeps the segment in the current file.
    pub fn continues(&self, last: &Segment, next: &Segment) -> bool {
        let lookup = match self {
            Self::Continuous => return true,
            Self::Segment => return false,
            Self::Main(lookup) | Self::Macro(lookup) => lookup,
        };
        match (lookup(last), lookup(next)) {
            (Some(current), Some(upcoming)) => current == upcoming,
            (current, upcoming) => {
                log::warn!(
                    "[SHIP] Cannot resolve {} program (Segment[{}]: {:?}, Segment[{}]: {:?}); continuing current file",
                    self.name(),
                    last.id,
                    current,
                    next.id,
                    upcoming
                );
                true
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::Segment => "segment",
            Self::Main(_) => "main",
            Self::Macro(_) => "macro",
        }
    }
}

impl fmt::Debug for OutputFileSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputFileSplit::{}", self.name())
    }
}

/// The file currently being written and the segments it spans
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub number: u64,
    pub path: PathBuf,
    segment_ids: Vec<EntityId>,
    last_segment: Segment,
    from_micros: ChainMicros,
    to_micros: ChainMicros,
}

impl OutputFile {
    pub fn new(number: u64, path: PathBuf, first: &Segment) -> Self {
        Self {
            number,
            path,
            segment_ids: vec![first.id],
            last_segment: first.clone(),
            from_micros: first.begin_micros,
            to_micros: first.end_micros(),
        }
    }

    pub fn add(&mut self, segment: &Segment) {
        self.segment_ids.push(segment.id);
        self.last_segment = segment.clone();
        self.to_micros = segment.end_micros();
    }

    /// Take a newer copy of the last segment, whose end may have moved
    pub fn refresh_last(&mut self, segment: &Segment) {
        if segment.id == self.last_segment.id {
            self.to_micros = segment.end_micros();
            self.last_segment = segment.clone();
        }
    }

    pub fn contains(&self, segment_id: EntityId) -> bool {
        self.segment_ids.contains(&segment_id)
    }

    pub fn last_segment(&self) -> &Segment {
        &self.last_segment
    }

    pub fn segment_ids(&self) -> &[EntityId] {
        &self.segment_ids
    }

    pub fn from_micros(&self) -> ChainMicros {
        self.from_micros
    }

    /// Chain time at which this file ends
    pub fn to_micros(&self) -> ChainMicros {
        self.to_micros
    }
}
