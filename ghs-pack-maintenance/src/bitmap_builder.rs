//! Computes the reachable object set, asks the `ghs-git` contract's
//! `PackWriter` to pack it, then publishes the result into `objects/pack/`.
//! A port of a known Git garbage collector's repack-with-bitmap phase, with
//! the actual object database/pack writer behind the contract.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, SystemTime};

use ghs_api_types::{MaintenanceError, PackId};
use ghs_git::{GitRepository, PackWriteOutcome, PackWriteRequest};

use crate::pack_log::PackLog;
use crate::util::{to_io, try_gc_lock};

/// Tunables the CLI exposes: `--sequential-bitmap-generation` maps to
/// `single_pack`. `repack_kept_objects` and `bitmap_exclude_ref_prefixes`
/// are part of the algorithm's generality but have no CLI switch of their
/// own; they default to the conservative choice.
#[derive(Clone, Debug, Default)]
pub struct BitmapBuilderOptions {
    pub single_pack: bool,
    pub repack_kept_objects: bool,
    pub bitmap_exclude_ref_prefixes: Vec<String>,
}

pub struct BitmapBuilder;

impl BitmapBuilder {
    /// Run one bitmap-generation pass. Returns the ids of the packs
    /// produced (empty if there was nothing new to pack).
    pub fn run(
        git: &dyn GitRepository,
        options: &BitmapBuilderOptions,
    ) -> Result<Vec<PackId>, MaintenanceError> {
        let _guard = try_gc_lock(&git.gc_pid_path())
            .map_err(|_| MaintenanceError::BitmapAlreadyOngoing)?;

        let pack_dir = git.objects_pack_dir();
        std::fs::create_dir_all(&pack_dir)?;

        let Sets {
            mut all_heads_and_tags,
            all_tags,
            mut non_heads,
            tag_targets,
            refs_to_exclude_from_bitmap,
        } = collect_sets(git)?;

        let excluded: Vec<PackId> = if options.repack_kept_objects {
            Vec::new()
        } else {
            git.kept_pack_objects().map_err(to_io)?
        };

        if options.single_pack {
            all_heads_and_tags.extend(non_heads.drain());
        }

        let request = PackWriteRequest {
            want: all_heads_and_tags.iter().copied().collect(),
            have: Vec::new(),
            no_bitmap: all_tags.iter().copied().collect(),
            tags: refs_to_exclude_from_bitmap,
            tag_targets: tag_targets.into_iter().collect(),
            exclude_objects: excluded.clone(),
            create_bitmap: true,
        };

        let main_outcome = git.write_pack(&request).map_err(to_io)?;
        if main_outcome.object_count == 0 {
            return Ok(Vec::new());
        }

        publish(&pack_dir, &main_outcome)?;
        let mut produced = vec![main_outcome.id];

        if !non_heads.is_empty() {
            let second_request = PackWriteRequest {
                want: non_heads.into_iter().collect(),
                have: all_heads_and_tags.into_iter().collect(),
                no_bitmap: Vec::new(),
                tags: Vec::new(),
                tag_targets: Vec::new(),
                exclude_objects: excluded,
                create_bitmap: false,
            };
            let second_outcome = git.write_pack(&second_request).map_err(to_io)?;
            if second_outcome.object_count > 0 {
                publish(&pack_dir, &second_outcome)?;
                produced.push(second_outcome.id);
            }
        }

        cleanup_stale_tmp_files(&pack_dir);

        PackLog::append(&pack_dir, &produced)?;

        Ok(produced)
    }
}

struct Sets {
    all_heads_and_tags: HashSet<PackId>,
    all_tags: HashSet<PackId>,
    non_heads: HashSet<PackId>,
    tag_targets: HashSet<PackId>,
    refs_to_exclude_from_bitmap: Vec<PackId>,
}

/// Classify refs, collect reflog/index objects, and compute the object
/// sets the pack writer call needs.
fn collect_sets(git: &dyn GitRepository) -> Result<Sets, MaintenanceError> {
    let refs = git.for_each_ref().map_err(to_io)?;

    let mut all_heads: HashSet<PackId> = HashSet::new();
    let mut all_tags: HashSet<PackId> = HashSet::new();
    let mut other_targets: HashSet<PackId> = HashSet::new();
    let mut tag_targets: HashSet<PackId> = HashSet::new();
    let mut reflog_reachable: HashSet<PackId> = HashSet::new();
    let mut refs_to_exclude_from_bitmap: Vec<PackId> = Vec::new();

    // prefixes whose matching refs should be excluded from bitmap coverage;
    // no CLI surface carries this today (see `BitmapBuilderOptions`), but
    // the classification step still needs somewhere to plug it in.
    let exclude_prefixes: &[&str] = &[];

    for entry in &refs {
        if entry.symbolic {
            continue;
        }

        if entry.name.starts_with("refs/heads/") {
            all_heads.insert(entry.target);
        } else if entry.name.starts_with("refs/tags/") {
            all_tags.insert(entry.target);
        } else {
            other_targets.insert(entry.target);
        }

        if let Some(peeled) = entry.peeled {
            tag_targets.insert(peeled);
        }

        if exclude_prefixes.iter().any(|p| entry.name.starts_with(p)) {
            refs_to_exclude_from_bitmap.push(entry.target);
        }

        for reachable in git.reflog_entries(&entry.name).map_err(to_io)? {
            reflog_reachable.insert(reachable);
        }
    }

    // allTags = tags minus heads (a ref can be both, e.g. a lightweight tag
    // pointing at a head commit).
    all_tags.retain(|id| !all_heads.contains(id));

    let all_heads_and_tags: HashSet<PackId> = all_heads.union(&all_tags).copied().collect();
    // tagTargets includes the union of heads and tags, not just peeled ids.
    tag_targets.extend(all_heads_and_tags.iter().copied());

    let index_only: HashSet<PackId> = git.index_only_objects().map_err(to_io)?.into_iter().collect();
    let non_heads: HashSet<PackId> = reflog_reachable
        .into_iter()
        .chain(index_only)
        .chain(other_targets)
        .collect();

    Ok(Sets {
        all_heads_and_tags,
        all_tags,
        non_heads,
        tag_targets,
        refs_to_exclude_from_bitmap,
    })
}

/// Rename the writer's temp output into place (pack, then bitmap, index
/// last) and wait out the racy-pack window.
fn publish(pack_dir: &Path, outcome: &PackWriteOutcome) -> Result<(), MaintenanceError> {
    set_readonly(&outcome.pack_tmp)?;
    set_readonly(&outcome.idx_tmp)?;
    if let Some(bitmap_tmp) = &outcome.bitmap_tmp {
        set_readonly(bitmap_tmp)?;
    }

    let pack_path = pack_dir.join(outcome.id.pack_filename());
    rename_into_place(&outcome.pack_tmp, &pack_path)?;
    if let Some(bitmap_tmp) = &outcome.bitmap_tmp {
        rename_into_place(bitmap_tmp, &pack_dir.join(outcome.id.bitmap_filename()))?;
    }
    // index last, so a concurrent scanner only sees the new pack once all
    // three files exist.
    rename_into_place(&outcome.idx_tmp, &pack_dir.join(outcome.id.idx_filename()))?;

    wait_for_racy_pack(&pack_path);
    Ok(())
}

fn set_readonly(path: &Path) -> Result<(), MaintenanceError> {
    let mut perm = std::fs::metadata(path)?.permissions();
    perm.set_readonly(true);
    std::fs::set_permissions(path, perm)?;
    Ok(())
}

/// Atomic rename, falling back to a non-atomic copy into a `.new` sibling
/// (and a reported error) when the temp file and the pack directory live on
/// different filesystems. Same-directory renames, the only case this crate
/// ever exercises, are always atomic.
fn rename_into_place(src: &Path, dst: &Path) -> Result<(), MaintenanceError> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(err) if err.raw_os_error() == Some(libc::EXDEV) => {
            let sibling = dst.with_file_name(format!(
                "{}.new",
                dst.file_name().unwrap_or_default().to_string_lossy()
            ));
            std::fs::copy(src, &sibling)?;
            std::fs::remove_file(src)?;
            Err(MaintenanceError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!(
                    "cannot atomically rename {} to {} (cross-device); wrote {} instead",
                    src.display(),
                    dst.display(),
                    sibling.display()
                ),
            )))
        }
        Err(err) => Err(err.into()),
    }
}

/// Wait until the published pack's mtime is clearly in the past relative to
/// the filesystem clock, guarding against the classic "racy git" false
/// negative where a pack and a later read share one mtime tick. Best
/// effort: gives up after a few short sleeps rather than blocking the
/// action indefinitely.
fn wait_for_racy_pack(pack_path: &Path) {
    let mtime = match std::fs::metadata(pack_path).and_then(|m| m.modified()) {
        Ok(mtime) => mtime,
        Err(_) => return,
    };
    for _ in 0..5 {
        if let Ok(elapsed) = SystemTime::now().duration_since(mtime) {
            if elapsed >= Duration::from_secs(1) {
                return;
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn cleanup_stale_tmp_files(pack_dir: &Path) {
    let read_dir = match std::fs::read_dir(pack_dir) {
        Ok(read_dir) => read_dir,
        Err(_) => return,
    };
    let cutoff = SystemTime::now() - Duration::from_secs(24 * 3600);
    for entry in read_dir.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with("gc_") && name.contains("_tmp")) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let Ok(mtime) = meta.modified() else {
            continue;
        };
        if mtime < cutoff {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghs_git::test_support::FakeGit;
    use ghs_git::{ObjectId, RefEntry};

    fn oid(byte: u8) -> ObjectId {
        ObjectId::from_raw([byte; ghs_api_types::PACK_ID_SIZE])
    }

    fn write_tmp_triple(dir: &Path, base: &str, pack_id: PackId) -> PackWriteOutcome {
        let pack_tmp = dir.join(format!("{base}.pack"));
        let idx_tmp = dir.join(format!("{base}.idx"));
        let bitmap_tmp = dir.join(format!("{base}.bitmap"));
        std::fs::write(&pack_tmp, b"pack").unwrap();
        std::fs::write(&idx_tmp, b"idx").unwrap();
        std::fs::write(&bitmap_tmp, b"bitmap").unwrap();
        PackWriteOutcome {
            id: pack_id,
            object_count: 1,
            pack_tmp,
            idx_tmp,
            bitmap_tmp: Some(bitmap_tmp),
        }
    }

    #[test]
    fn fresh_repo_publishes_pack_and_appends_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut git = FakeGit::new(dir.path());
        git.refs.push(RefEntry {
            name: "refs/heads/main".to_string(),
            target: oid(1),
            peeled: None,
            symbolic: false,
        });

        let pack_dir = git.objects_pack_dir();
        std::fs::create_dir_all(&pack_dir).unwrap();
        let outcome = write_tmp_triple(&pack_dir, "gc_1_2_tmp-aa", PackId::from_raw([0xaa; 20]));
        git.push_outcome(outcome);

        let produced = BitmapBuilder::run(&git, &BitmapBuilderOptions::default()).unwrap();
        assert_eq!(produced, vec![PackId::from_raw([0xaa; 20])]);

        assert!(pack_dir.join(produced[0].pack_filename()).exists());
        assert!(pack_dir.join(produced[0].idx_filename()).exists());
        assert!(pack_dir.join(produced[0].bitmap_filename()).exists());

        let log_ids = PackLog::read_all(&PackLog::log_path(&pack_dir)).unwrap();
        assert_eq!(log_ids, vec![PackId::from_raw([0xaa; 20])]);
    }

    #[test]
    fn empty_object_set_produces_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path());
        let pack_dir = git.objects_pack_dir();
        std::fs::create_dir_all(&pack_dir).unwrap();
        git.push_outcome(PackWriteOutcome {
            id: PackId::from_raw([1; 20]),
            object_count: 0,
            pack_tmp: pack_dir.join("gc_0_tmp.pack"),
            idx_tmp: pack_dir.join("gc_0_tmp.idx"),
            bitmap_tmp: None,
        });

        let produced = BitmapBuilder::run(&git, &BitmapBuilderOptions::default()).unwrap();
        assert!(produced.is_empty());
        assert!(!PackLog::log_path(&pack_dir).exists());
    }

    #[test]
    fn concurrent_builder_reports_already_ongoing() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path());
        let pack_dir = git.objects_pack_dir();
        std::fs::create_dir_all(&pack_dir).unwrap();

        // fcntl/F_SETLK record locks only exclude other processes, not a
        // second fd opened by this same one, so this has to be driven
        // through a real fork to mean anything.
        with_gc_lock_held_by_child(&git.gc_pid_path(), || {
            let err = BitmapBuilder::run(&git, &BitmapBuilderOptions::default()).unwrap_err();
            assert!(matches!(err, MaintenanceError::BitmapAlreadyOngoing));
        });

        assert!(!PackLog::log_path(&pack_dir).exists());
    }

    /// Forks a child that takes the GC PID lock at `path` and holds it for
    /// the duration of `during`, then waits for the child to exit cleanly.
    fn with_gc_lock_held_by_child(path: &Path, during: impl FnOnce()) {
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::{close, fork, pipe, read, write, ForkResult};

        let (child_ready_r, child_ready_w) = pipe().unwrap();
        let (release_r, release_w) = pipe().unwrap();

        match fork().unwrap() {
            ForkResult::Child => {
                close(child_ready_r).unwrap();
                close(release_w).unwrap();

                let locker = ghs_process_lock::ProcessLocker::new(path).unwrap();
                let _guard = ghs_process_lock::ProcessLocker::try_exclusive_lock(locker).unwrap();

                write(child_ready_w, &[1]).unwrap();
                let mut buf = [0u8; 1];
                read(release_r, &mut buf).unwrap();
                unsafe { libc::_exit(0) };
            }
            ForkResult::Parent { child } => {
                close(child_ready_w).unwrap();
                close(release_r).unwrap();

                let mut buf = [0u8; 1];
                read(child_ready_r, &mut buf).unwrap();

                during();

                write(release_w, &[1]).unwrap();
                match waitpid(child, None).unwrap() {
                    WaitStatus::Exited(_, 0) => {}
                    other => panic!("child holding the gc lock did not exit cleanly: {other:?}"),
                }
            }
        }
    }

    #[test]
    fn duplicate_run_skips_duplicate_log_entry() {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path());
        let pack_dir = git.objects_pack_dir();
        std::fs::create_dir_all(&pack_dir).unwrap();

        for i in 0..2 {
            let outcome = write_tmp_triple(
                &pack_dir,
                &format!("gc_1_{i}_tmp-bb"),
                PackId::from_raw([0xbb; 20]),
            );
            git.push_outcome(outcome);
            BitmapBuilder::run(&git, &BitmapBuilderOptions::default()).unwrap();
        }

        let log_ids = PackLog::read_all(&PackLog::log_path(&pack_dir)).unwrap();
        assert_eq!(log_ids.len(), 1);
    }
}
