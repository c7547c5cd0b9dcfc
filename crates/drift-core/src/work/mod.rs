//! Fabrication work: the Craft, Dub and Ship stages and their manager
//!
//! ```text
//! CraftWork ──segments──► EntityStore ──► DubWork ──PCM bytes──► ShipWork ──► OutputSink
//!     ▲                                      │                      │
//!     └──────── StageProgress (atomics) ◄────┴──────────────────────┘
//! ```
//!
//! Every stage holds the run's [`FabricationContext`]. Stages only ever read
//! each other's positions; the byte pipe between Dub and Ship is the single
//! hand-off of audio.

mod context;
mod craft_work;
mod dub_work;
mod error;
mod manager;
mod rehydrate;
mod ship_work;

pub use context::{CraftOverride, FabricationContext, Stage, StageProgress};
pub use craft_work::CraftWork;
pub use dub_work::DubWork;
pub use error::{FabricationError, FabricationResult};
pub use manager::{FabricationManager, FabricationProgress, ManagerEvent, ManagerState};
pub use rehydrate::{select_snapshot, write_snapshot, ChainSnapshot, FileSnapshotSource, SnapshotSource};
pub use ship_work::ShipWork;
