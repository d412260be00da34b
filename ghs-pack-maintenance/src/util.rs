//! Small pieces shared by the bitmap builder, preserver, and prune
//! orchestrator: the GC PID lock guard, cross-device tolerant file
//! moves/deletes for pack triples, and mtime access.

use std::path::Path;

use ghs_api_types::{MaintenanceError, PackId};
use ghs_process_lock::{ProcessLockExclusiveGuard, ProcessLocker};

pub(crate) fn to_io(err: anyhow::Error) -> MaintenanceError {
    MaintenanceError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        err.to_string(),
    ))
}

/// Try to take the GC PID lock. Callers map the failure to whichever error
/// their action reports it as (`BitmapAlreadyOngoing` for bitmap
/// generation, `GcLockHeld` for preserve/prune).
pub(crate) fn try_gc_lock(gc_pid_path: &Path) -> Result<ProcessLockExclusiveGuard, anyhow::Error> {
    let locker = ProcessLocker::new(gc_pid_path)?;
    ProcessLocker::try_exclusive_lock(locker)
}

pub(crate) fn mtime_epoch_secs(path: &Path) -> std::io::Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0))
}

/// Move a pack's `.pack`/`.idx`/`.bitmap` triple from `pack_dir` into
/// `preserved_dir`. Missing source files are tolerated; cross-device
/// filesystems fall back to copy+delete. Returns the number of files
/// actually moved.
pub(crate) fn move_triple(
    pack_dir: &Path,
    preserved_dir: &Path,
    id: &PackId,
) -> Result<u64, MaintenanceError> {
    let mut moved = 0u64;
    for filename in [id.pack_filename(), id.idx_filename(), id.bitmap_filename()] {
        let src = pack_dir.join(&filename);
        let dst = preserved_dir.join(&filename);
        match std::fs::rename(&src, &dst) {
            Ok(()) => moved += 1,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) if err.raw_os_error() == Some(libc::EXDEV) => {
                std::fs::copy(&src, &dst)?;
                std::fs::remove_file(&src)?;
                moved += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(moved)
}

/// Delete a pack's triple wherever it happens to be (active or preserved),
/// used by the legacy prune orchestrator's retention policy once a pack
/// falls off its two-entry window.
pub(crate) fn delete_triple_everywhere(
    pack_dir: &Path,
    preserved_dir: &Path,
    id: &PackId,
) -> Result<(), MaintenanceError> {
    for dir in [pack_dir, preserved_dir] {
        for filename in [id.pack_filename(), id.idx_filename(), id.bitmap_filename()] {
            let path = dir.join(&filename);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}
