//! The legacy prune variant that keeps exactly the last two log entries,
//! included to cover the repository's historical retention behavior.
//! Locking, the snapshot protocol, and rename semantics are identical to
//! [`crate::Preserver`]; only the retention policy differs.

use ghs_api_types::{MaintenanceError, PackId};
use ghs_git::GitRepository;

use crate::pack_log::PackLog;
use crate::preserver::PreserveInfo;
use crate::util::{delete_triple_everywhere, move_triple, try_gc_lock};

const PRESERVED_DIR: &str = "preserved";

pub struct PruneOrchestrator;

impl PruneOrchestrator {
    pub fn run(git: &dyn GitRepository) -> Result<PreserveInfo, MaintenanceError> {
        let _guard =
            try_gc_lock(&git.gc_pid_path()).map_err(|_| MaintenanceError::GcLockHeld)?;

        let pack_dir = git.objects_pack_dir();
        let Some(snapshot_path) = PackLog::snapshot(&pack_dir)? else {
            return Ok(PreserveInfo::default());
        };

        let preserved_dir = pack_dir.join(PRESERVED_DIR);
        std::fs::create_dir_all(&preserved_dir)?;

        let entries = PackLog::read_all(&snapshot_path)?;
        let (keep, moved) = retention_plan(&pack_dir, &preserved_dir, &entries)?;

        match std::fs::remove_file(&snapshot_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        if keep.is_empty() {
            PackLog::delete(&pack_dir)?;
        } else {
            PackLog::rewrite(&pack_dir, &keep)?;
        }

        Ok(PreserveInfo { moved })
    }
}

/// The legacy "second to last" retention rule is read here as
/// "index == total - 2 in log order": the last entry is retained
/// untouched, the second-to-last is moved to `preserved/` but kept in the
/// log, and everything earlier is deleted outright. Fewer than two entries
/// means there is no "earlier" tier at all; the log is left as-is.
fn retention_plan(
    pack_dir: &std::path::Path,
    preserved_dir: &std::path::Path,
    entries: &[PackId],
) -> Result<(Vec<PackId>, u64), MaintenanceError> {
    if entries.len() <= 1 {
        return Ok((entries.to_vec(), 0));
    }

    let n = entries.len();
    let second_to_last = entries[n - 2];
    let last = entries[n - 1];

    let moved = move_triple(pack_dir, preserved_dir, &second_to_last)?;

    for id in &entries[..n - 2] {
        delete_triple_everywhere(pack_dir, preserved_dir, id)?;
    }

    Ok((vec![second_to_last, last], moved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghs_git::test_support::FakeGit;

    fn id(byte: u8) -> PackId {
        PackId::from_raw([byte; ghs_api_types::PACK_ID_SIZE])
    }

    fn touch_triple(pack_dir: &std::path::Path, pack_id: PackId) {
        for filename in [
            pack_id.pack_filename(),
            pack_id.idx_filename(),
            pack_id.bitmap_filename(),
        ] {
            std::fs::write(pack_dir.join(filename), b"data").unwrap();
        }
    }

    #[test]
    fn keeps_last_two_and_deletes_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path());
        let pack_dir = git.objects_pack_dir();
        std::fs::create_dir_all(&pack_dir).unwrap();

        let a = id(1);
        let b = id(2);
        let c = id(3);
        for pack_id in [a, b, c] {
            touch_triple(&pack_dir, pack_id);
        }
        PackLog::append(&pack_dir, &[a, b, c]).unwrap();

        let info = PruneOrchestrator::run(&git).unwrap();
        assert_eq!(info.moved, 3);

        // a was deleted entirely.
        assert!(!pack_dir.join(a.pack_filename()).exists());
        // b moved to preserved/, still tracked.
        assert!(pack_dir.join("preserved").join(b.pack_filename()).exists());
        assert!(!pack_dir.join(b.pack_filename()).exists());
        // c (last) untouched.
        assert!(pack_dir.join(c.pack_filename()).exists());

        let kept = PackLog::read_all(&PackLog::log_path(&pack_dir)).unwrap();
        assert_eq!(kept, vec![b, c]);
    }

    #[test]
    fn fewer_than_two_entries_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path());
        let pack_dir = git.objects_pack_dir();
        std::fs::create_dir_all(&pack_dir).unwrap();

        let only = id(9);
        touch_triple(&pack_dir, only);
        PackLog::append(&pack_dir, &[only]).unwrap();

        let info = PruneOrchestrator::run(&git).unwrap();
        assert_eq!(info.moved, 0);
        assert!(pack_dir.join(only.pack_filename()).exists());

        let kept = PackLog::read_all(&PackLog::log_path(&pack_dir)).unwrap();
        assert_eq!(kept, vec![only]);
    }
}
