//! An in-memory `GitRepository` double for tests, analogous to the
//! `#[test]`-only store doubles `pbs-datastore`'s chunk store tests use in
//! place of a full on-disk store.

use std::cell::RefCell;
use std::path::PathBuf;

use anyhow::{bail, Error};

use crate::contract::{
    ConfigReader, Maintenance, ObjectId, PackWriteOutcome, PackWriteRequest, PackWriter,
    ReflogReader, RefDatabase, RefEntry, RepositoryLayout, WorkingTreeIndex,
};

#[derive(Default)]
pub struct FakeGit {
    pub refs: Vec<RefEntry>,
    pub reflogs: std::collections::HashMap<String, Vec<ObjectId>>,
    pub index_only: Vec<ObjectId>,
    pub config: std::collections::HashMap<(String, String), String>,
    pub repo_root: PathBuf,
    pub kept_objects: Vec<ObjectId>,
    /// Each call to `write_pack` pops the next prepared outcome so tests can
    /// script a sequence of bitmap-generation runs.
    pub scripted_outcomes: RefCell<Vec<PackWriteOutcome>>,
    pub write_pack_requests: RefCell<Vec<PackWriteRequest>>,
    pub gc_calls: RefCell<u32>,
    pub pack_refs_calls: RefCell<u32>,
}

impl FakeGit {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        FakeGit {
            repo_root: repo_root.into(),
            ..Default::default()
        }
    }

    pub fn with_config(mut self, section: &str, key: &str, value: &str) -> Self {
        self.config
            .insert((section.to_string(), key.to_string()), value.to_string());
        self
    }

    pub fn push_outcome(&self, outcome: PackWriteOutcome) {
        self.scripted_outcomes.borrow_mut().push(outcome);
    }
}

impl RefDatabase for FakeGit {
    fn for_each_ref(&self) -> Result<Vec<RefEntry>, Error> {
        Ok(self.refs.clone())
    }
}

impl ReflogReader for FakeGit {
    fn reflog_entries(&self, ref_name: &str) -> Result<Vec<ObjectId>, Error> {
        Ok(self.reflogs.get(ref_name).cloned().unwrap_or_default())
    }
}

impl WorkingTreeIndex for FakeGit {
    fn index_only_objects(&self) -> Result<Vec<ObjectId>, Error> {
        Ok(self.index_only.clone())
    }
}

impl PackWriter for FakeGit {
    fn write_pack(&self, request: &PackWriteRequest) -> Result<PackWriteOutcome, Error> {
        self.write_pack_requests.borrow_mut().push(request.clone());
        let mut outcomes = self.scripted_outcomes.borrow_mut();
        if outcomes.is_empty() {
            bail!("FakeGit has no scripted write_pack outcome left");
        }
        Ok(outcomes.remove(0))
    }

    fn kept_pack_objects(&self) -> Result<Vec<ObjectId>, Error> {
        Ok(self.kept_objects.clone())
    }
}

impl Maintenance for FakeGit {
    fn run_gc(&self) -> Result<(), Error> {
        *self.gc_calls.borrow_mut() += 1;
        Ok(())
    }

    fn pack_refs(&self) -> Result<(), Error> {
        *self.pack_refs_calls.borrow_mut() += 1;
        Ok(())
    }
}

impl RepositoryLayout for FakeGit {
    fn objects_pack_dir(&self) -> PathBuf {
        self.repo_root.join("objects").join("pack")
    }

    fn gc_pid_path(&self) -> PathBuf {
        self.repo_root.join("gc.pid")
    }

    fn config_path(&self) -> PathBuf {
        self.repo_root.join("config")
    }
}

impl ConfigReader for FakeGit {
    fn get_raw(&self, section: &str, key: &str) -> Result<Option<String>, Error> {
        Ok(self
            .config
            .get(&(section.to_string(), key.to_string()))
            .cloned())
    }
}
