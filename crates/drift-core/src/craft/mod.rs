//! Craft phases: the pluggable steps that turn a planned segment into an
//! arranged one
//!
//! Phases run in a fixed order against a [`Fabricator`] bound to the segment
//! being crafted. The segment only becomes `Crafted` once every phase has
//! returned `Ok`.

mod fabricator;
mod layer;
mod macro_main;

pub use fabricator::Fabricator;
pub use layer::LayerCraft;
pub use macro_main::MacroMainCraft;

use crate::model::InstrumentType;
use crate::work::FabricationResult;

/// One step of segment craft
pub trait CraftPhase: Send {
    /// Name used in logs and failure reports
    fn name(&self) -> &str;

    fn do_work(&mut self, fabricator: &mut Fabricator<'_>) -> FabricationResult<()>;
}

/// The standard phase list: macro/main, beat, hook, detail, perc-loop,
/// transition, background
pub fn default_phases() -> Vec<Box<dyn CraftPhase>> {
    vec![
        Box::new(MacroMainCraft::new()),
        Box::new(LayerCraft::new("beat", &[InstrumentType::Drum])),
        Box::new(LayerCraft::new("hook", &[InstrumentType::Hook])),
        Box::new(LayerCraft::new(
            "detail",
            &[
                InstrumentType::Bass,
                InstrumentType::Pad,
                InstrumentType::Stab,
                InstrumentType::Sticky,
                InstrumentType::Stripe,
            ],
        )),
        Box::new(LayerCraft::new("perc-loop", &[InstrumentType::Percussion])),
        Box::new(LayerCraft::new("transition", &[InstrumentType::Transition])),
        Box::new(LayerCraft::new("background", &[InstrumentType::Background])),
    ]
}
