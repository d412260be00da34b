//! Maps the five CLI action names onto the components above. Replaces a
//! reflective class-lookup dispatch with a plain, explicit `FromStr`/`match`
//! pair; no dynamic loading needed.

use std::str::FromStr;

use ghs_api_types::{ActionResult, MaintenanceError};
use ghs_git::GitRepository;

use crate::bitmap_builder::{BitmapBuilder, BitmapBuilderOptions};
use crate::preserver::Preserver;
use crate::prune_orchestrator::PruneOrchestrator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionName {
    BitmapGeneration,
    GarbageCollection,
    PackRefs,
    PreserveOutdatedBitmaps,
    PruneOutdatedBitmaps,
}

impl ActionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionName::BitmapGeneration => "BitmapGenerationAction",
            ActionName::GarbageCollection => "GarbageCollectionAction",
            ActionName::PackRefs => "PackRefsAction",
            ActionName::PreserveOutdatedBitmaps => "PreserveOutdatedBitmapsAction",
            ActionName::PruneOutdatedBitmaps => "PruneOutdatedBitmapsAction",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown action {0:?}")]
pub struct UnknownActionError(pub String);

impl FromStr for ActionName {
    type Err = UnknownActionError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "BitmapGenerationAction" => Ok(ActionName::BitmapGeneration),
            "GarbageCollectionAction" => Ok(ActionName::GarbageCollection),
            "PackRefsAction" => Ok(ActionName::PackRefs),
            "PreserveOutdatedBitmapsAction" => Ok(ActionName::PreserveOutdatedBitmaps),
            "PruneOutdatedBitmapsAction" => Ok(ActionName::PruneOutdatedBitmaps),
            other => Err(UnknownActionError(other.to_string())),
        }
    }
}

/// Flags that affect how an action runs, threaded down from the CLI.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub single_pack: bool,
}

/// Run `action` against `git`, turning the component's `Result` into the
/// `ActionResult` shape the Result JSON carries. This is the only place
/// `BitmapAlreadyOngoing`/`GcLockHeld` get downgraded from an error into a
/// successful-or-failed no-op result instead.
pub fn run_action(action: ActionName, git: &dyn GitRepository, options: &RunOptions) -> ActionResult {
    match action {
        ActionName::BitmapGeneration => {
            let builder_options = BitmapBuilderOptions {
                single_pack: options.single_pack,
                ..Default::default()
            };
            match BitmapBuilder::run(git, &builder_options) {
                Ok(produced) if produced.is_empty() => {
                    ActionResult::ok_with_message("Nothing to repack")
                }
                Ok(produced) => ActionResult::ok_with_message(format!(
                    "Generated bitmap for {} pack(s)",
                    produced.len()
                )),
                Err(MaintenanceError::BitmapAlreadyOngoing) => ActionResult::ok_with_message(
                    "Skipped bitmap generation: already in progress",
                ),
                Err(err) => ActionResult::failed(err.to_string()),
            }
        }
        ActionName::PreserveOutdatedBitmaps => match Preserver::run(git) {
            Ok(info) => ActionResult::ok_with_message(format!("Preserved {} pack file(s)", info.moved)),
            Err(MaintenanceError::GcLockHeld) => {
                ActionResult::failed("Skipped: gc lock held by another process")
            }
            Err(err) => ActionResult::failed(err.to_string()),
        },
        ActionName::PruneOutdatedBitmaps => match PruneOrchestrator::run(git) {
            Ok(info) => ActionResult::ok_with_message(format!("Pruned {} pack file(s)", info.moved)),
            Err(MaintenanceError::GcLockHeld) => {
                ActionResult::failed("Skipped: gc lock held by another process")
            }
            Err(err) => ActionResult::failed(err.to_string()),
        },
        // these invoke the `ghs-git` contract's library primitives directly
        // and contain no design of their own.
        ActionName::GarbageCollection => match git.run_gc() {
            Ok(()) => ActionResult::ok(),
            Err(err) => ActionResult::failed(err.to_string()),
        },
        ActionName::PackRefs => match git.pack_refs() {
            Ok(()) => ActionResult::ok(),
            Err(err) => ActionResult::failed(err.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_round_trip() {
        for action in [
            ActionName::BitmapGeneration,
            ActionName::GarbageCollection,
            ActionName::PackRefs,
            ActionName::PreserveOutdatedBitmaps,
            ActionName::PruneOutdatedBitmaps,
        ] {
            let parsed: ActionName = action.as_str().parse().unwrap();
            assert_eq!(parsed, action);
        }
    }

    #[test]
    fn unknown_action_name_is_rejected() {
        assert!("NotARealAction".parse::<ActionName>().is_err());
    }
}
