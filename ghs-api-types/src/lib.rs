//! Shared result/error/identifier types for the bitmap lifecycle maintenance
//! core. Kept dependency-light (no `proxmox-schema`/REST machinery, see
//! DESIGN.md) since this crate has no API surface of its own: it is only
//! ever linked into `ghs-pack-maintenance` and the `ghs-maintenance` binary.

mod action;
mod error;
mod pack_id;

pub use action::{ActionOutput, ActionResult, ActionStats};
pub use error::MaintenanceError;
pub use pack_id::{PackId, PackIdParseError, PACK_ID_SIZE};
