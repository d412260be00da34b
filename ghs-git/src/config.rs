//! A minimal reader for the subset of Git's config grammar this core
//! actually needs: `[section]` headers followed by indented `key = value`
//! lines. This is deliberately not a general git-config implementation;
//! that parser lives in the external Git library this crate only talks to.
//! We only need to resolve one key (`gc.prunePackExpire`) reliably.

use anyhow::Error;
use std::path::Path;

use crate::contract::ConfigReader;

pub struct FileConfigReader {
    path: std::path::PathBuf,
}

impl FileConfigReader {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        FileConfigReader { path: path.into() }
    }
}

impl ConfigReader for FileConfigReader {
    fn get_raw(&self, section: &str, key: &str) -> Result<Option<String>, Error> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(parse_value(&content, section, key))
    }
}

fn parse_value(content: &str, section: &str, key: &str) -> Option<String> {
    let mut in_section = false;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = parse_section_header(line) {
            in_section = name.eq_ignore_ascii_case(section);
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((found_key, value)) = line.split_once('=') {
            if found_key.trim().eq_ignore_ascii_case(key) {
                return Some(value.trim().trim_matches('"').to_string());
            }
        }
    }
    None
}

fn parse_section_header(line: &str) -> Option<&str> {
    let line = line.strip_prefix('[')?;
    let line = line.strip_suffix(']')?;
    Some(line.trim())
}

/// Read `gc.prunePackExpire` from the repository's `config` file.
pub fn read_prune_pack_expire(config_path: &Path) -> Result<Option<String>, Error> {
    FileConfigReader::new(config_path).get_raw("gc", "prunePackExpire")
}
