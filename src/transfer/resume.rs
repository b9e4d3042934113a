// ABOUTME: Durable record of chunks already loaded, keyed by table
// ABOUTME: Every mutation is a merge with on-disk state followed by an atomic rewrite

use crate::error::TransferError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Persisted set of chunk filenames already loaded, keyed by the table's
/// normalized `log_key` (`<db>_<table>`).
///
/// The log is the loader's private state. It is read once at load start and
/// rewritten after every successful chunk load, so a crash after N
/// successful chunks resumes at N. Each `record` is a full
/// read-modify-write: the on-disk entry is re-read and merged (set union,
/// never removal) before the rewrite, so a concurrent loader for a
/// different table never has its entries clobbered. Callers serialize
/// access for one table behind a mutex; see the loader.
#[derive(Debug)]
pub struct ResumeLog {
    path: PathBuf,
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl ResumeLog {
    /// Open a resume log, starting empty when the file does not exist yet.
    pub fn open(path: &Path) -> Result<ResumeLog, TransferError> {
        let entries = read_entries(path)?;
        Ok(ResumeLog {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Chunk filenames recorded as loaded for `log_key`.
    pub fn loaded_chunks(&self, log_key: &str) -> BTreeSet<String> {
        self.entries.get(log_key).cloned().unwrap_or_default()
    }

    /// Record one successfully loaded chunk and persist immediately.
    ///
    /// Durability per chunk is the point: batching records would reopen the
    /// window this log exists to close.
    pub fn record(&mut self, log_key: &str, chunk_file: &str) -> Result<(), TransferError> {
        // Merge with whatever is on disk before rewriting, in case another
        // invocation (for a different table) wrote since we last read.
        let mut merged = read_entries(&self.path)?;
        for (key, files) in &self.entries {
            merged.entry(key.clone()).or_default().extend(files.iter().cloned());
        }
        merged
            .entry(log_key.to_string())
            .or_default()
            .insert(chunk_file.to_string());

        self.entries = merged;
        self.flush()
    }

    fn flush(&self) -> Result<(), TransferError> {
        // Serialized as sorted arrays for stable, diffable files.
        let as_lists: BTreeMap<&String, Vec<&String>> = self
            .entries
            .iter()
            .map(|(key, files)| (key, files.iter().collect()))
            .collect();
        let json = serde_json::to_string_pretty(&as_lists)
            .map_err(|e| TransferError::json(&self.path, e))?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::fs::write(tmp.path(), json.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| TransferError::Io(e.error))?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, BTreeSet<String>>, TransferError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let parsed: BTreeMap<String, Vec<String>> =
        serde_json::from_str(&raw).map_err(|e| TransferError::json(path, e))?;
    Ok(parsed
        .into_iter()
        .map(|(key, files)| (key, files.into_iter().collect()))
        .collect())
}

/// Resume-log key for a fully-qualified table name.
pub fn log_key(table: &str) -> String {
    table.replace('.', "_")
}
