//! The contract the bitmap maintenance core expects from a Git repository
//! implementation. Only the operations the bitmap builder, preserver, and
//! prune orchestrator actually use are named here; everything else about
//! the object database, ref database, reflog, and config parser is out of
//! scope.

use anyhow::Error;
use ghs_api_types::PackId;
use std::path::PathBuf;

/// A 20-byte Git object id. Reuses `PackId`'s hex/raw representation since
/// both are raw SHA-1 values; kept as a distinct name at this seam because
/// conceptually an object id and a pack id are different things.
pub type ObjectId = PackId;

/// One ref as enumerated by the ref database.
#[derive(Clone, Debug)]
pub struct RefEntry {
    pub name: String,
    pub target: ObjectId,
    pub peeled: Option<ObjectId>,
    pub symbolic: bool,
}

pub trait RefDatabase {
    fn for_each_ref(&self) -> Result<Vec<RefEntry>, Error>;
}

pub trait ReflogReader {
    /// Every object id that has ever been the target of `ref_name`,
    /// according to its reflog.
    fn reflog_entries(&self, ref_name: &str) -> Result<Vec<ObjectId>, Error>;
}

pub trait WorkingTreeIndex {
    /// Objects reachable from the working-tree index but not from HEAD.
    fn index_only_objects(&self) -> Result<Vec<ObjectId>, Error>;
}

/// Parameters for one pack-writer invocation. Field names and shapes mirror
/// `git pack-objects`'s own object-selection arguments directly.
#[derive(Clone, Debug, Default)]
pub struct PackWriteRequest {
    pub want: Vec<ObjectId>,
    pub have: Vec<ObjectId>,
    pub no_bitmap: Vec<ObjectId>,
    pub tags: Vec<ObjectId>,
    pub tag_targets: Vec<ObjectId>,
    pub exclude_objects: Vec<ObjectId>,
    pub create_bitmap: bool,
}

/// Where the pack writer left its (already-fsynced) temp output. Filenames
/// follow Git's own `gc_*_tmp` convention.
#[derive(Clone, Debug)]
pub struct PackWriteOutcome {
    /// Identity of the produced pack, as computed by the writer itself (raw
    /// SHA-1 of the pack contents). `BitmapBuilder` uses this directly
    /// instead of re-deriving it from a temp filename.
    pub id: PackId,
    pub object_count: u64,
    pub pack_tmp: PathBuf,
    pub idx_tmp: PathBuf,
    pub bitmap_tmp: Option<PathBuf>,
}

pub trait PackWriter {
    fn write_pack(&self, request: &PackWriteRequest) -> Result<PackWriteOutcome, Error>;

    /// Objects covered by any on-disk pack carrying a `.keep` marker.
    /// Excluded from the repack unless the caller is configured to repack
    /// kept objects. Default: no kept packs.
    fn kept_pack_objects(&self) -> Result<Vec<ObjectId>, Error> {
        Ok(Vec::new())
    }
}

/// The two library-primitive actions that have no design of their own here:
/// plain garbage collection and ref-compaction. The core only needs to
/// invoke them, not orchestrate them.
pub trait Maintenance {
    fn run_gc(&self) -> Result<(), Error>;
    fn pack_refs(&self) -> Result<(), Error>;
}

/// Where on disk the repository's pack directory, GC PID lock, and config
/// file live.
pub trait RepositoryLayout {
    fn objects_pack_dir(&self) -> PathBuf;
    fn gc_pid_path(&self) -> PathBuf;
    fn config_path(&self) -> PathBuf;
}

pub trait ConfigReader {
    /// Raw string value of `[section]\n\tkey = ...`, or `None` if absent.
    fn get_raw(&self, section: &str, key: &str) -> Result<Option<String>, Error>;
}

/// The full set of capabilities a concrete Git implementation must provide.
/// `ShellGit` (shell.rs) is the one real adapter shipped here; tests use
/// `FakeGit` (test_support.rs).
pub trait GitRepository:
    RefDatabase
    + ReflogReader
    + WorkingTreeIndex
    + PackWriter
    + RepositoryLayout
    + ConfigReader
    + Maintenance
{
}

impl<T> GitRepository for T where
    T: RefDatabase
        + ReflogReader
        + WorkingTreeIndex
        + PackWriter
        + RepositoryLayout
        + ConfigReader
        + Maintenance
{
}
