//! The bitmap lifecycle core: [`PackLog`], [`BitmapBuilder`], [`Preserver`],
//! and the legacy [`PruneOrchestrator`], plus the thin [`actions`] dispatch
//! layer the `ghs-maintenance` binary calls into.

mod actions;
mod bitmap_builder;
mod pack_log;
mod preserver;
mod prune_orchestrator;
mod util;

pub use actions::{run_action, ActionName, RunOptions, UnknownActionError};
pub use bitmap_builder::{BitmapBuilder, BitmapBuilderOptions};
pub use pack_log::PackLog;
pub use preserver::{PreserveInfo, Preserver};
pub use prune_orchestrator::PruneOrchestrator;
