// ABOUTME: Manifest structures describing one table's exported chunks
// ABOUTME: Handles deterministic naming, atomic writes, and validation on read

use crate::error::TransferError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One exported chunk: the atomic unit of transfer. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub file: String,
    pub rows: u64,
    pub sha256: String,
}

/// The declarative record of what was exported for one table.
///
/// Written once, after every chunk file is on disk with its checksum
/// recorded, so a crash mid-export never leaves a manifest describing
/// chunks that do not exist. Read-only after creation. Unknown JSON fields
/// are ignored on read; a missing `region` defaults to none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Fully-qualified `<database>.<table>` name.
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub chunks: Vec<ChunkInfo>,
}

impl Manifest {
    pub fn new(table: String, region: Option<String>) -> Self {
        Manifest {
            table,
            region,
            chunks: Vec::new(),
        }
    }

    /// Short table name: the part after the final dot.
    pub fn short_name(&self) -> &str {
        short_table_name(&self.table)
    }

    /// Resume-log key for this table: separators normalized to underscores.
    pub fn log_key(&self) -> String {
        self.table.replace('.', "_")
    }

    /// Deterministic manifest filename for a table's short name.
    pub fn file_name(short_name: &str) -> String {
        format!("{}.manifest.json", short_name)
    }

    pub fn path_for(out_dir: &Path, short_name: &str) -> PathBuf {
        out_dir.join(Self::file_name(short_name))
    }

    /// Parse and validate a manifest file.
    pub fn load(path: &Path) -> Result<Manifest, TransferError> {
        let raw = std::fs::read_to_string(path)?;
        let manifest: Manifest =
            serde_json::from_str(&raw).map_err(|e| TransferError::json(path, e))?;
        manifest.validate(path)?;
        Ok(manifest)
    }

    fn validate(&self, path: &Path) -> Result<(), TransferError> {
        if !self.table.contains('.') || self.table.starts_with('.') || self.table.ends_with('.') {
            return Err(TransferError::Validation(format!(
                "manifest {} has invalid table identity '{}' (expected <database>.<table>)",
                path.display(),
                self.table
            )));
        }
        if let Some(chunk) = self.chunks.iter().find(|c| c.file.is_empty()) {
            return Err(TransferError::Validation(format!(
                "manifest {} contains a chunk with an empty filename (rows={})",
                path.display(),
                chunk.rows
            )));
        }
        Ok(())
    }

    /// Serialize atomically: write to a temp file in the target directory,
    /// then rename into place, so readers never observe a torn manifest.
    pub fn write(&self, out_dir: &Path) -> Result<PathBuf, TransferError> {
        let path = Self::path_for(out_dir, self.short_name());
        let json = serde_json::to_string_pretty(self).map_err(|e| TransferError::json(&path, e))?;

        let tmp = tempfile::NamedTempFile::new_in(out_dir)?;
        std::fs::write(tmp.path(), json.as_bytes())?;
        tmp.persist(&path).map_err(|e| TransferError::Io(e.error))?;

        Ok(path)
    }
}

/// Short table name from a fully-qualified `<database>.<table>`.
pub fn short_table_name(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}
