//! Macro/main phase: chooses the segment's programs, type and timing

use super::{CraftPhase, Fabricator};
use crate::model::{Program, ProgramType, SegmentChoice, SegmentType};
use crate::types::EntityId;
use crate::work::{CraftOverride, FabricationError, FabricationResult};

/// Chooses macro and main programs
///
/// - An override picks the macro program (by id or by memes) and restarts
///   the main rotation from the main program best matching it.
/// - Otherwise the macro program carries over and the main program steps to
///   the next main program in catalog order.
#[derive(Debug, Default)]
pub struct MacroMainCraft;

impl MacroMainCraft {
    pub fn new() -> Self {
        Self
    }

    fn choose_macro<'c>(
        fabricator: &Fabricator<'c>,
        macros: &[&'c Program],
    ) -> FabricationResult<&'c Program> {
        let catalog = fabricator.catalog();
        match fabricator.craft_override() {
            CraftOverride::GotoMacro(id) => catalog
                .program(*id)
                .filter(|p| p.program_type == ProgramType::Macro)
                .ok_or(FabricationError::ProgramNotFound(*id)),
            CraftOverride::GotoMemes(memes) => catalog
                .program_with_memes(ProgramType::Macro, memes)
                .ok_or_else(|| FabricationError::NoProgramWithMemes(ProgramType::Macro, memes.clone())),
            CraftOverride::Ready => Ok(fabricator
                .previous_program_id(ProgramType::Macro)
                .and_then(|id| catalog.program(id))
                .unwrap_or(macros[0])),
        }
    }

    fn choose_main<'c>(
        fabricator: &Fabricator<'c>,
        macro_program: &Program,
        mains: &[&'c Program],
    ) -> &'c Program {
        let overridden = !matches!(fabricator.craft_override(), CraftOverride::Ready);
        let previous = fabricator.previous_program_id(ProgramType::Main);
        match previous {
            Some(id) if !overridden => {
                let at = mains.iter().position(|p| p.id == id).map_or(0, |i| i + 1);
                mains[at % mains.len()]
            }
            _ => fabricator
                .catalog()
                .program_with_memes(ProgramType::Main, &macro_program.memes)
                .unwrap_or(mains[0]),
        }
    }
}

impl CraftPhase for MacroMainCraft {
    fn name(&self) -> &str {
        "macro-main"
    }

    fn do_work(&mut self, fabricator: &mut Fabricator<'_>) -> FabricationResult<()> {
        let catalog = fabricator.catalog();
        let macros = catalog.programs_of_type(ProgramType::Macro);
        let mains = catalog.programs_of_type(ProgramType::Main);
        if macros.is_empty() {
            return Err(FabricationError::NoPrograms(ProgramType::Macro));
        }
        if mains.is_empty() {
            return Err(FabricationError::NoPrograms(ProgramType::Main));
        }

        let macro_program = Self::choose_macro(fabricator, &macros)?;
        let main_program = Self::choose_main(fabricator, macro_program, &mains);

        let previous_macro: Option<EntityId> = fabricator.previous_program_id(ProgramType::Macro);
        let previous_main: Option<EntityId> = fabricator.previous_program_id(ProgramType::Main);
        let segment_type = if fabricator.previous_segment().is_none() {
            SegmentType::Initial
        } else if !matches!(fabricator.craft_override(), CraftOverride::Ready)
            || previous_macro != Some(macro_program.id)
        {
            SegmentType::NextMacro
        } else if previous_main != Some(main_program.id) {
            SegmentType::NextMain
        } else {
            SegmentType::Continue
        };

        let segment_id = fabricator.segment().id;
        fabricator.add_choice(SegmentChoice::program(segment_id, ProgramType::Macro, macro_program.id))?;
        fabricator.add_choice(SegmentChoice::program(segment_id, ProgramType::Main, main_program.id))?;
        fabricator.set_timing(
            segment_type,
            main_program.tempo,
            main_program.beats_per_bar,
            main_program.bars,
        )?;
        fabricator.set_intensity((macro_program.intensity + main_program.intensity) / 2.0)?;

        log::debug!(
            "[CRAFT] Segment[{}] {:?}: macro '{}', main '{}' at {} bpm",
            segment_id,
            segment_type,
            macro_program.name,
            main_program.name,
            main_program.tempo
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Catalog, CatalogData, Segment, SegmentState};
    use crate::store::EntityStore;
    use crate::testing::fixtures;

    fn craft(
        store: &EntityStore,
        catalog: &Catalog,
        craft_override: CraftOverride,
    ) -> FabricationResult<Segment> {
        let previous = store.read_last_segment();
        let segment = match &previous {
            Some(last) => Segment::planned(last.id + 1, 1, last.end_micros()),
            None => Segment::planned(0, 1, 0),
        };
        store.create_segment(segment.clone()).unwrap();
        store
            .update_segment_state(segment.id, SegmentState::Planned, SegmentState::Crafting)
            .unwrap();
        let previous = previous.and_then(|p| store.read_record(p.id));
        let mut fabricator = Fabricator::new(store, catalog, segment, previous, craft_override);
        MacroMainCraft::new().do_work(&mut fabricator)?;
        let segment = fabricator.into_segment();
        store
            .update_segment_state(segment.id, SegmentState::Crafting, SegmentState::Crafted)
            .unwrap();
        Ok(segment)
    }

    #[test]
    fn test_initial_segment_timing() {
        let (store, catalog) = (EntityStore::new(), fixtures::catalog());
        let segment = craft(&store, &catalog, CraftOverride::Ready).unwrap();
        assert_eq!(segment.segment_type, SegmentType::Initial);
        // 1 bar of 4 beats at 240 bpm
        assert_eq!(segment.duration_micros, 1_000_000);
        assert_eq!(store.read_segment(0).unwrap().duration_micros, 1_000_000);
        assert!(store.read_program_choice(0, ProgramType::Macro).is_some());
    }

    #[test]
    fn test_main_rotates_and_macro_carries_over() {
        let (store, catalog) = (EntityStore::new(), fixtures::catalog());
        craft(&store, &catalog, CraftOverride::Ready).unwrap();
        let second = craft(&store, &catalog, CraftOverride::Ready).unwrap();

        let macro_of = |id| store.read_program_choice(id, ProgramType::Macro).unwrap().program_id;
        let main_of = |id| store.read_program_choice(id, ProgramType::Main).unwrap().program_id;
        assert_eq!(macro_of(0), macro_of(1));
        assert_ne!(main_of(0), main_of(1));
        assert_eq!(second.segment_type, SegmentType::NextMain);
        assert_eq!(second.begin_micros, 1_000_000);
    }

    #[test]
    fn test_override_by_memes() {
        let (store, catalog) = (EntityStore::new(), fixtures::catalog());
        craft(&store, &catalog, CraftOverride::Ready).unwrap();
        let segment = craft(&store, &catalog, CraftOverride::GotoMemes(vec!["DARK".into()])).unwrap();

        assert_eq!(segment.segment_type, SegmentType::NextMacro);
        let macro_id = store.read_program_choice(1, ProgramType::Macro).unwrap().program_id;
        assert_eq!(macro_id, Some(fixtures::DUSK_MACRO));
        let main_id = store.read_program_choice(1, ProgramType::Main).unwrap().program_id;
        assert_eq!(main_id, Some(fixtures::DRIVE_MAIN));
    }

    #[test]
    fn test_intensity_is_mean_of_macro_and_main() {
        let store = EntityStore::new();
        let mut data = CatalogData::from(fixtures::catalog());
        for program in &mut data.programs {
            program.intensity = if program.program_type == ProgramType::Macro { 0.2 } else { 0.8 };
        }
        let catalog = Catalog::from(data);
        let segment = craft(&store, &catalog, CraftOverride::Ready).unwrap();
        assert!((segment.intensity - 0.5).abs() < 1e-9);
        assert!((store.read_segment(0).unwrap().intensity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_override_to_unknown_program_fails() {
        let (store, catalog) = (EntityStore::new(), fixtures::catalog());
        let result = craft(&store, &catalog, CraftOverride::GotoMacro(999));
        assert!(matches!(result, Err(FabricationError::ProgramNotFound(999))));
    }
}
