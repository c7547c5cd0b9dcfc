//! Entity store error types

use thiserror::Error;

use crate::model::SegmentState;
use crate::types::{ChainMicros, EntityId};

#[derive(Error, Debug)]
pub enum StoreError {
    /// Segment is not in the state a transition starts from
    #[error("Segment[{id}] requires state {required}, found {found}")]
    InvalidState {
        id: EntityId,
        required: SegmentState,
        found: SegmentState,
    },

    /// Transition skips or reverses a lifecycle step
    #[error("Segment[{id}] cannot move from {from} to {to}")]
    IllegalTransition {
        id: EntityId,
        from: SegmentState,
        to: SegmentState,
    },

    #[error("Segment[{0}] not found")]
    SegmentNotFound(EntityId),

    #[error("Segment[{id}] breaks offset order, expected offset {expected}")]
    OffsetGap { id: EntityId, expected: EntityId },

    #[error("Segment[{id}] must begin at {expected}µs where Segment[{previous}] ends, found {found}µs")]
    NotContiguous {
        id: EntityId,
        previous: EntityId,
        expected: ChainMicros,
        found: ChainMicros,
    },

    #[error("Segment[{0}] is not the last segment of the chain")]
    NotLastSegment(EntityId),

    #[error("Segment[{id}] cannot be cut to {requested}µs, it lasts {duration}µs")]
    CutoffOutOfRange {
        id: EntityId,
        requested: ChainMicros,
        duration: ChainMicros,
    },

    #[error("Choice[{0}] not found")]
    ChoiceNotFound(EntityId),

    #[error("Arrangement[{0}] not found")]
    ArrangementNotFound(EntityId),

    #[error("No chain has been created")]
    NoChain,
}

pub type StoreResult<T> = Result<T, StoreError>;
