//! Fabrication entities and read-only catalog reference data
//!
//! - [`Chain`] and the per-segment entities are written by the Craft stage
//!   and read by Dub and Ship through the [`EntityStore`](crate::store::EntityStore).
//! - [`Catalog`] holds programs, instruments and instrument audio loaded once
//!   per run from a [`ContentProvider`](crate::content::ContentProvider).

mod catalog;
mod chain;
mod segment;
mod template;

pub use catalog::{
    Catalog, CatalogData, Instrument, InstrumentAudio, InstrumentType, Program, ProgramType,
};
pub use chain::{Chain, ChainState};
pub use segment::{
    Segment, SegmentChoice, SegmentChoiceArrangement, SegmentChoiceArrangementPick, SegmentState,
    SegmentType,
};
pub use template::{Template, TemplateConfig};
