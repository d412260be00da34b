//! The append-only binary log of packs produced by [`crate::BitmapBuilder`].
//! A flat sequence of 20-byte [`PackId`] records; no header, no separators.
//! All operations take the log file's exclusive OS lock for their
//! duration, via the same `proxmox_sys::fs::open_file_locked` /
//! `replace_file` primitives `pbs-config` uses for its own lock files;
//! see DESIGN.md for why a hand-rolled flock wrapper was not reinvented here.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use proxmox_sys::fs::CreateOptions;

use ghs_api_types::{MaintenanceError, PackId, PACK_ID_SIZE};

const LOG_FILENAME: &str = ".ghs-packs.log";
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PackLog;

impl PackLog {
    /// Path of the live log inside a repository's `objects/pack/` dir.
    pub fn log_path(objects_pack_dir: &Path) -> PathBuf {
        objects_pack_dir.join(LOG_FILENAME)
    }

    /// Append `ids` to the log, skipping any already present. The whole
    /// read-check-write sequence runs under one lock acquisition,
    /// so it either durably records all new ids or none.
    pub fn append(objects_pack_dir: &Path, ids: &[PackId]) -> Result<(), MaintenanceError> {
        std::fs::create_dir_all(objects_pack_dir)?;
        let path = Self::log_path(objects_pack_dir);
        let mut file = lock_for_write(&path)?;

        let existing = read_records(&mut file)?;
        let mut seen: HashSet<PackId> = existing.into_iter().collect();
        file.seek(SeekFrom::End(0))?;

        for id in ids {
            if seen.insert(*id) {
                file.write_all(id.raw_bytes())?;
            } else {
                info!("pack {id} already present in {}, skipping", path.display());
            }
        }
        file.sync_all()?;
        Ok(())
    }

    /// Read every record of `path` (the live log or a snapshot), in file
    /// order. Takes the exclusive lock even for a read, so it cannot race
    /// a concurrent writer.
    pub fn read_all(path: &Path) -> Result<Vec<PackId>, MaintenanceError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut file = lock_for_write(path)?;
        read_records(&mut file)
    }

    /// Atomically rename the live log to a timestamped, immutable snapshot
    /// sibling. Returns `None` if there is no live log to snapshot. The
    /// lock is held only long enough to perform the rename;
    /// any append racing this call either completes fully before or starts
    /// fresh against a brand new (absent) live log after.
    pub fn snapshot(objects_pack_dir: &Path) -> Result<Option<PathBuf>, MaintenanceError> {
        let live = Self::log_path(objects_pack_dir);
        if !live.exists() {
            return Ok(None);
        }
        let _file = lock_for_write(&live)?;

        let millis = (proxmox_time::epoch_f64() * 1000.0) as i64;
        let snapshot_path = objects_pack_dir.join(format!("packs.log.{millis}.snapshot"));

        match std::fs::rename(&live, &snapshot_path) {
            Ok(()) => {}
            // defensive: same-directory renames are always atomic on a single
            // filesystem, but fall back to copy+delete if the OS disagrees.
            Err(err) if err.raw_os_error() == Some(libc::EXDEV) => {
                std::fs::copy(&live, &snapshot_path)?;
                std::fs::remove_file(&live)?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(Some(snapshot_path))
    }

    /// Replace the live log with exactly `keep_ids`, in the given order.
    /// Holds the exclusive lock for the duration so concurrent appends
    /// serialize behind the rewrite.
    pub fn rewrite(objects_pack_dir: &Path, keep_ids: &[PackId]) -> Result<(), MaintenanceError> {
        let live = Self::log_path(objects_pack_dir);
        let _file = lock_for_write(&live)?;

        let mut data = Vec::with_capacity(keep_ids.len() * PACK_ID_SIZE);
        for id in keep_ids {
            data.extend_from_slice(id.raw_bytes());
        }
        proxmox_sys::fs::replace_file(&live, &data, CreateOptions::new(), true)
            .map_err(to_maintenance_io_error)?;
        Ok(())
    }

    /// Remove the live log entirely (used when the retained set is empty).
    pub fn delete(objects_pack_dir: &Path) -> Result<(), MaintenanceError> {
        let live = Self::log_path(objects_pack_dir);
        match std::fs::remove_file(&live) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn lock_for_write(path: &Path) -> Result<File, MaintenanceError> {
    proxmox_sys::fs::open_file_locked(path, LOCK_TIMEOUT, true, CreateOptions::new())
        .map_err(to_maintenance_io_error)
}

fn to_maintenance_io_error(err: anyhow::Error) -> MaintenanceError {
    MaintenanceError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        err.to_string(),
    ))
}

/// Read every 20-byte record from `file`, from the start, rejecting a size
/// that is not a multiple of [`PACK_ID_SIZE`].
fn read_records(file: &mut File) -> Result<Vec<PackId>, MaintenanceError> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    if buf.len() % PACK_ID_SIZE != 0 {
        return Err(MaintenanceError::CorruptLog(format!(
            "log size {} is not a multiple of {PACK_ID_SIZE}",
            buf.len()
        )));
    }

    let mut ids = Vec::with_capacity(buf.len() / PACK_ID_SIZE);
    for chunk in buf.chunks_exact(PACK_ID_SIZE) {
        let mut raw = [0u8; PACK_ID_SIZE];
        raw.copy_from_slice(chunk);
        ids.push(PackId::from_raw(raw));
    }
    Ok(ids)
}
