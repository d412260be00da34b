//! Ages outdated packs into `objects/pack/preserved/` once a grace window
//! has passed, unless they carry the most recently generated bitmap.
//! Operates on a snapshot of the pack log so a concurrent bitmap-generation
//! run cannot change the decision set out from under it.

use std::path::Path;

use ghs_api_types::{MaintenanceError, PackId};
use ghs_git::{time_expr, GitRepository};

use crate::pack_log::PackLog;
use crate::util::{mtime_epoch_secs, move_triple, to_io, try_gc_lock};

const PRESERVED_DIR: &str = "preserved";

/// Outcome of one preserve pass: how many pack triples were actually moved.
/// A plain product type, not a record with a nullable payload, since there
/// is nothing optional here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PreserveInfo {
    pub moved: u64,
}

pub struct Preserver;

impl Preserver {
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
        let most_recent_bitmap = find_most_recent_bitmap(&pack_dir)?;
        let cutoff = time_expr::resolve_cutoff(
            git.get_raw("gc", "prunePackExpire").map_err(to_io)?.as_deref(),
        );

        let mut keep = Vec::new();
        let mut moved = 0u64;

        for id in &entries {
            if most_recent_bitmap == Some(*id) {
                keep.push(*id);
                continue;
            }

            let pack_path = pack_dir.join(id.pack_filename());
            let expired = match mtime_epoch_secs(&pack_path) {
                Ok(mtime) => mtime <= cutoff,
                // no pack file on disk: nothing left to guard, treat as
                // already-expired so the id drops out of the log.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
                Err(err) => return Err(err.into()),
            };

            if !expired {
                keep.push(*id);
                continue;
            }

            moved += move_triple(&pack_dir, &preserved_dir, id)?;
        }

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

/// The `pack-*.bitmap` file in `pack_dir` (not `preserved/`) with the
/// greatest mtime, as a `PackId`. `None` if no bitmaps exist.
fn find_most_recent_bitmap(pack_dir: &Path) -> Result<Option<PackId>, MaintenanceError> {
    let read_dir = match std::fs::read_dir(pack_dir) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut best: Option<(i64, PackId)> = None;
    for entry in read_dir {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(hex) = name.strip_prefix("pack-").and_then(|s| s.strip_suffix(".bitmap")) else {
            continue;
        };
        let Ok(id) = hex.parse::<PackId>() else {
            continue;
        };
        let mtime = mtime_epoch_secs(&entry.path())?;
        if best.map_or(true, |(best_mtime, _)| mtime > best_mtime) {
            best = Some((mtime, id));
        }
    }
    Ok(best.map(|(_, id)| id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghs_git::test_support::FakeGit;
    use std::time::{Duration, SystemTime};

    fn id(byte: u8) -> PackId {
        PackId::from_raw([byte; ghs_api_types::PACK_ID_SIZE])
    }

    fn touch_triple(pack_dir: &Path, pack_id: PackId, age_secs: Option<u64>) {
        for filename in [
            pack_id.pack_filename(),
            pack_id.idx_filename(),
            pack_id.bitmap_filename(),
        ] {
            let path = pack_dir.join(&filename);
            std::fs::write(&path, b"data").unwrap();
            if let Some(age) = age_secs {
                let when = SystemTime::now() - Duration::from_secs(age);
                let secs = mtime_to_secs(when);
                set_mtime(&path, secs, secs);
            }
        }
    }

    // minimal utime wrapper so tests don't need an extra crate dependency.
    fn mtime_to_secs(t: SystemTime) -> i64 {
        t.duration_since(std::time::UNIX_EPOCH).unwrap().as_secs() as i64
    }

    fn set_mtime(path: &Path, mtime: i64, atime: i64) {
        let c_path = std::ffi::CString::new(path.to_str().unwrap()).unwrap();
        let times = [
            libc::timespec {
                tv_sec: atime,
                tv_nsec: 0,
            },
            libc::timespec {
                tv_sec: mtime,
                tv_nsec: 0,
            },
        ];
        unsafe {
            libc::utimensat(libc::AT_FDCWD, c_path.as_ptr(), times.as_ptr(), 0);
        }
    }

    #[test]
    fn no_log_is_a_clean_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path());
        std::fs::create_dir_all(git.objects_pack_dir()).unwrap();
        let info = Preserver::run(&git).unwrap();
        assert_eq!(info.moved, 0);
    }

    #[test]
    fn two_generation_preserve_moves_older_pack() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path()).with_config("gc", "prunePackExpire", "now");
        let pack_dir = git.objects_pack_dir();
        std::fs::create_dir_all(&pack_dir).unwrap();

        let older = id(1);
        let newer = id(2);
        touch_triple(&pack_dir, older, Some(3600));
        touch_triple(&pack_dir, newer, Some(0));

        PackLog::append(&pack_dir, &[older, newer]).unwrap();

        let info = Preserver::run(&git).unwrap();
        assert_eq!(info.moved, 3);

        let preserved_dir = pack_dir.join("preserved");
        assert!(preserved_dir.join(older.pack_filename()).exists());
        assert!(!pack_dir.join(older.pack_filename()).exists());
        assert!(pack_dir.join(newer.pack_filename()).exists());

        let kept = PackLog::read_all(&PackLog::log_path(&pack_dir)).unwrap();
        assert_eq!(kept, vec![newer]);
    }

    #[test]
    fn grace_window_protects_recent_pack() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path()).with_config("gc", "prunePackExpire", "10.seconds.ago");
        let pack_dir = git.objects_pack_dir();
        std::fs::create_dir_all(&pack_dir).unwrap();

        let older = id(1);
        let newer = id(2);
        touch_triple(&pack_dir, older, Some(1));
        touch_triple(&pack_dir, newer, Some(0));

        PackLog::append(&pack_dir, &[older, newer]).unwrap();

        let info = Preserver::run(&git).unwrap();
        assert_eq!(info.moved, 0);
        assert!(pack_dir.join("preserved").read_dir().unwrap().next().is_none());

        let kept = PackLog::read_all(&PackLog::log_path(&pack_dir)).unwrap();
        assert_eq!(kept, vec![older, newer]);
    }

    #[test]
    fn most_recent_bitmap_is_retained_mid_log() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path()).with_config("gc", "prunePackExpire", "now");
        let pack_dir = git.objects_pack_dir();
        std::fs::create_dir_all(&pack_dir).unwrap();

        let a = id(0xa1);
        let m = id(0xa2);
        let b = id(0xa3);

        // A and B have no files on disk at all (synthetic log-only ids);
        // only M's bitmap exists, and it is the most recent.
        touch_triple(&pack_dir, m, Some(0));

        PackLog::append(&pack_dir, &[a, m, b]).unwrap();

        let info = Preserver::run(&git).unwrap();
        // A and B have no files to move; only the (absent) triples are
        // dropped from the log, M's pack/idx/bitmap are untouched.
        assert_eq!(info.moved, 0);

        let kept = PackLog::read_all(&PackLog::log_path(&pack_dir)).unwrap();
        assert_eq!(kept, vec![m]);
        assert!(pack_dir.join(m.bitmap_filename()).exists());
    }

    #[test]
    fn idempotent_second_run_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path()).with_config("gc", "prunePackExpire", "now");
        let pack_dir = git.objects_pack_dir();
        std::fs::create_dir_all(&pack_dir).unwrap();

        let older = id(1);
        let newer = id(2);
        touch_triple(&pack_dir, older, Some(3600));
        touch_triple(&pack_dir, newer, Some(0));
        PackLog::append(&pack_dir, &[older, newer]).unwrap();

        Preserver::run(&git).unwrap();
        let info = Preserver::run(&git).unwrap();
        assert_eq!(info.moved, 0);

        let kept = PackLog::read_all(&PackLog::log_path(&pack_dir)).unwrap();
        assert_eq!(kept, vec![newer]);
    }

    #[test]
    fn empty_keep_set_deletes_log() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path()).with_config("gc", "prunePackExpire", "now");
        let pack_dir = git.objects_pack_dir();
        std::fs::create_dir_all(&pack_dir).unwrap();

        let only = id(7);
        touch_triple(&pack_dir, only, Some(3600));
        PackLog::append(&pack_dir, &[only]).unwrap();

        Preserver::run(&git).unwrap();
        assert!(!PackLog::log_path(&pack_dir).exists());
    }
}
