//! A real, runnable `GitRepository` adapter backed by the system `git`
//! binary. Every trait method either shells out with `std::process::Command`
//! or reads a real file under the repository root; nothing here is a
//! stand-in. Ported in the manner of `pbs-tools::command::run_command`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, format_err, Error};

use crate::contract::{
    ConfigReader, Maintenance, ObjectId, PackWriteOutcome, PackWriteRequest, PackWriter,
    ReflogReader, RefDatabase, RefEntry, RepositoryLayout, WorkingTreeIndex,
};
use std::io::Write;

pub struct ShellGit {
    repo_root: PathBuf,
}

impl ShellGit {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        ShellGit {
            repo_root: repo_root.into(),
        }
    }

    fn git(&self) -> Command {
        let mut command = Command::new("git");
        command
            .arg("--git-dir")
            .arg(&self.repo_root)
            .stderr(Stdio::piped());
        command
    }

    fn run(mut command: Command) -> Result<String, Error> {
        let output = command
            .output()
            .map_err(|err| format_err!("failed to execute {:?} - {}", command, err))?;

        if !output.status.success() {
            let msg = String::from_utf8_lossy(&output.stderr);
            bail!("command {:?} failed: {}", command, msg.trim());
        }

        Ok(String::from_utf8(output.stdout)?)
    }

    fn run_with_stdin(mut command: Command, stdin: &str) -> Result<String, Error> {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        let mut child = command
            .spawn()
            .map_err(|err| format_err!("failed to spawn {:?} - {}", command, err))?;

        child
            .stdin
            .as_mut()
            .expect("stdin piped")
            .write_all(stdin.as_bytes())?;

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let msg = String::from_utf8_lossy(&output.stderr);
            bail!("command {:?} failed: {}", command, msg.trim());
        }

        Ok(String::from_utf8(output.stdout)?)
    }

    fn parse_object_id(hex: &str) -> Result<ObjectId, Error> {
        hex.trim().parse().map_err(Error::from)
    }
}

impl RefDatabase for ShellGit {
    fn for_each_ref(&self) -> Result<Vec<RefEntry>, Error> {
        let mut command = self.git();
        command.args([
            "for-each-ref",
            "--format=%(refname)%00%(objectname)%00%(*objectname)%00%(symref)",
        ]);
        let output = Self::run(command)?;

        let mut entries = Vec::new();
        for line in output.lines() {
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split('\0');
            let name = fields.next().unwrap_or_default().to_string();
            let target_hex = fields.next().unwrap_or_default();
            let peeled_hex = fields.next().unwrap_or_default();
            let symref = fields.next().unwrap_or_default();

            if target_hex.is_empty() {
                // null/unborn ref, skip it.
                continue;
            }

            entries.push(RefEntry {
                name,
                target: Self::parse_object_id(target_hex)?,
                peeled: if peeled_hex.is_empty() {
                    None
                } else {
                    Some(Self::parse_object_id(peeled_hex)?)
                },
                symbolic: !symref.is_empty(),
            });
        }
        Ok(entries)
    }
}

impl ReflogReader for ShellGit {
    fn reflog_entries(&self, ref_name: &str) -> Result<Vec<ObjectId>, Error> {
        let mut command = self.git();
        command.args(["reflog", "show", "--format=%H", ref_name]);
        let output = match Self::run(command) {
            Ok(output) => output,
            Err(_) => return Ok(Vec::new()), // no reflog for this ref
        };

        output
            .lines()
            .filter(|line| !line.is_empty())
            .map(Self::parse_object_id)
            .collect()
    }
}

impl WorkingTreeIndex for ShellGit {
    fn index_only_objects(&self) -> Result<Vec<ObjectId>, Error> {
        let mut ls_files = self.git();
        ls_files.args(["ls-files", "--stage"]);
        let staged = match Self::run(ls_files) {
            Ok(output) => output,
            Err(_) => return Ok(Vec::new()), // bare repos have no index
        };

        let mut indexed = Vec::new();
        for line in staged.lines().filter(|l| !l.is_empty()) {
            // "<mode> <oid> <stage>\t<path>"
            if let Some(oid) = line.split_whitespace().nth(1) {
                indexed.push(Self::parse_object_id(oid)?);
            }
        }
        if indexed.is_empty() {
            return Ok(indexed);
        }

        let mut rev_list = self.git();
        rev_list.args(["rev-list", "--objects", "HEAD"]);
        let reachable = Self::run(rev_list).unwrap_or_default();
        let reachable: std::collections::HashSet<&str> = reachable
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .collect();

        let only_in_index = indexed
            .into_iter()
            .filter(|oid| !reachable.contains(oid.name().as_str()))
            .collect();
        Ok(only_in_index)
    }
}

impl PackWriter for ShellGit {
    fn write_pack(&self, request: &PackWriteRequest) -> Result<PackWriteOutcome, Error> {
        let dir = self.objects_pack_dir();
        std::fs::create_dir_all(&dir)?;

        let suffix: u32 = std::process::id();
        let nonce = proxmox_time::epoch_i64();
        let base = dir.join(format!("gc_{}_{}_tmp", suffix, nonce));

        let mut command = self.git();
        command.arg("pack-objects").arg("--revs");
        if request.create_bitmap {
            command.arg("--write-bitmap-index");
        }
        command.arg(&base);

        let mut stdin = String::new();
        for id in &request.want {
            stdin.push_str(&id.name());
            stdin.push('\n');
        }
        for id in &request.tags {
            stdin.push_str(&id.name());
            stdin.push('\n');
        }
        for id in &request.tag_targets {
            stdin.push_str(&id.name());
            stdin.push('\n');
        }
        for id in &request.have {
            stdin.push('^');
            stdin.push_str(&id.name());
            stdin.push('\n');
        }
        for id in &request.exclude_objects {
            stdin.push('^');
            stdin.push_str(&id.name());
            stdin.push('\n');
        }
        // `no_bitmap` has no equivalent pack-objects stdin directive; the
        // external Git library the contract describes is expected to apply
        // it internally. ShellGit includes those objects as plain `want`
        // entries so they still end up in the pack.
        for id in &request.no_bitmap {
            stdin.push_str(&id.name());
            stdin.push('\n');
        }

        let pack_hex = Self::run_with_stdin(command, &stdin)?;
        let pack_hex = pack_hex.trim();
        if pack_hex.len() != 40 {
            bail!("git pack-objects did not report a pack id: {:?}", pack_hex);
        }
        let id = Self::parse_object_id(pack_hex)?;

        let pack_tmp = PathBuf::from(format!("{}-{}.pack", base.display(), pack_hex));
        let idx_tmp = PathBuf::from(format!("{}-{}.idx", base.display(), pack_hex));
        let bitmap_tmp = if request.create_bitmap {
            Some(PathBuf::from(format!(
                "{}-{}.bitmap",
                base.display(),
                pack_hex
            )))
        } else {
            None
        };

        let object_count = count_objects_in_pack(&self.git(), &idx_tmp).unwrap_or(0);

        Ok(PackWriteOutcome {
            id,
            object_count,
            pack_tmp,
            idx_tmp,
            bitmap_tmp,
        })
    }

    fn kept_pack_objects(&self) -> Result<Vec<ObjectId>, Error> {
        let dir = self.objects_pack_dir();
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut objects = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(".keep") else {
                continue;
            };
            let idx_path = dir.join(format!("{stem}.idx"));
            if !idx_path.is_file() {
                continue;
            }
            let mut command = self.git();
            command
                .arg("verify-pack")
                .arg("-v")
                .arg(&idx_path)
                .stderr(Stdio::null());
            let output = match Self::run(command) {
                Ok(output) => output,
                Err(_) => continue,
            };
            for line in output.lines() {
                let Some(sha) = line.split_whitespace().next() else {
                    continue;
                };
                if let Ok(oid) = Self::parse_object_id(sha) {
                    objects.push(oid);
                }
            }
        }
        Ok(objects)
    }
}

impl Maintenance for ShellGit {
    fn run_gc(&self) -> Result<(), Error> {
        let mut command = self.git();
        command.arg("gc");
        Self::run(command)?;
        Ok(())
    }

    fn pack_refs(&self) -> Result<(), Error> {
        let mut command = self.git();
        command.args(["pack-refs", "--all", "--prune"]);
        Self::run(command)?;
        Ok(())
    }
}

fn count_objects_in_pack(template: &Command, idx_path: &Path) -> Result<u64, Error> {
    let mut command = Command::new(template.get_program());
    for arg in template.get_args() {
        command.arg(arg);
    }
    command
        .arg("verify-pack")
        .arg("-v")
        .arg(idx_path)
        .stderr(Stdio::null());
    let output = ShellGit::run(command)?;
    Ok(output.lines().filter(|l| l.contains(" blob ") || l.contains(" tree ") || l.contains(" commit ") || l.contains(" tag ")).count() as u64)
}

impl RepositoryLayout for ShellGit {
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

impl ConfigReader for ShellGit {
    fn get_raw(&self, section: &str, key: &str) -> Result<Option<String>, Error> {
        crate::config::FileConfigReader::new(self.config_path()).get_raw(section, key)
    }
}
