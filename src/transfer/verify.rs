// ABOUTME: Read-only checksum verification of exported chunks against manifests
// ABOUTME: Reports passed/failed/missing counts; strict mode aborts on first mismatch

use crate::error::TransferError;
use crate::transfer::checksum::file_sha256;
use crate::transfer::manifest::{short_table_name, Manifest};
use std::path::Path;

/// Terminal counts for one verification run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifySummary {
    pub passed: u64,
    pub failed: u64,
    pub missing: u64,
}

impl VerifySummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.missing == 0
    }
}

/// Recompute each chunk's digest and compare against its manifest.
///
/// A table without a manifest counts one `missing`; an absent chunk file
/// counts `missing`; a digest mismatch counts `failed` (and aborts
/// immediately under `strict`). Never mutates the manifest or resume log.
pub fn verify_checksums(
    tables: &[String],
    out_dir: &Path,
    strict: bool,
) -> Result<VerifySummary, TransferError> {
    let mut summary = VerifySummary::default();

    for table in tables {
        let short_name = short_table_name(table);
        let manifest_path = Manifest::path_for(out_dir, short_name);
        if !manifest_path.exists() {
            tracing::warn!("No manifest found for {}", short_name);
            summary.missing += 1;
            continue;
        }

        let manifest = Manifest::load(&manifest_path)?;
        for chunk in &manifest.chunks {
            let file_path = out_dir.join(&chunk.file);
            if !file_path.exists() {
                tracing::error!("Missing chunk: {}", file_path.display());
                summary.missing += 1;
                continue;
            }

            let actual = file_sha256(&file_path)?;
            if actual == chunk.sha256 {
                tracing::info!("Verified {}", file_path.display());
                summary.passed += 1;
            } else {
                tracing::error!("Checksum mismatch for {}", file_path.display());
                summary.failed += 1;
                if strict {
                    return Err(TransferError::Integrity {
                        file: chunk.file.clone(),
                        expected: chunk.sha256.clone(),
                        actual,
                    });
                }
            }
        }
    }

    tracing::info!(
        "Checksum verification complete: {} passed, {} failed, {} missing",
        summary.passed,
        summary.failed,
        summary.missing
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::manifest::ChunkInfo;
    use std::fs;

    fn export_fixture(dir: &Path, table: &str, files: &[(&str, &str)]) {
        let mut manifest = Manifest::new(table.to_string(), None);
        for (file, content) in files {
            let path = dir.join(file);
            fs::write(&path, content).unwrap();
            manifest.chunks.push(ChunkInfo {
                file: file.to_string(),
                rows: content.lines().count().saturating_sub(1) as u64,
                sha256: file_sha256(&path).unwrap(),
            });
        }
        manifest.write(dir).unwrap();
    }

    #[test]
    fn test_all_chunks_pass() {
        let dir = tempfile::tempdir().unwrap();
        export_fixture(
            dir.path(),
            "movr.users",
            &[
                ("users_chunk_001.csv", "id,name\n1,a\n"),
                ("users_chunk_002.csv", "id,name\n2,b\n"),
            ],
        );

        let summary =
            verify_checksums(&["movr.users".to_string()], dir.path(), false).unwrap();
        assert_eq!(
            summary,
            VerifySummary {
                passed: 2,
                failed: 0,
                missing: 0
            }
        );
        assert!(summary.is_clean());
    }

    #[test]
    fn test_mutated_chunk_is_failed_not_missing() {
        let dir = tempfile::tempdir().unwrap();
        export_fixture(
            dir.path(),
            "movr.users",
            &[("users_chunk_001.csv", "id,name\n1,a\n")],
        );

        // Flip one byte after the manifest was written.
        let path = dir.path().join("users_chunk_001.csv");
        let mut content = fs::read(&path).unwrap();
        content[0] ^= 0x01;
        fs::write(&path, content).unwrap();

        let summary =
            verify_checksums(&["movr.users".to_string()], dir.path(), false).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.missing, 0);
        assert_eq!(summary.passed, 0);
    }

    #[test]
    fn test_absent_chunk_counts_missing() {
        let dir = tempfile::tempdir().unwrap();
        export_fixture(
            dir.path(),
            "movr.users",
            &[
                ("users_chunk_001.csv", "id,name\n1,a\n"),
                ("users_chunk_002.csv", "id,name\n2,b\n"),
            ],
        );
        fs::remove_file(dir.path().join("users_chunk_002.csv")).unwrap();

        let summary =
            verify_checksums(&["movr.users".to_string()], dir.path(), false).unwrap();
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.missing, 1);
    }

    #[test]
    fn test_table_without_manifest_counts_missing() {
        let dir = tempfile::tempdir().unwrap();
        let summary =
            verify_checksums(&["movr.ghosts".to_string()], dir.path(), false).unwrap();
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.passed, 0);
    }

    #[test]
    fn test_strict_mode_aborts_on_first_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        export_fixture(
            dir.path(),
            "movr.users",
            &[
                ("users_chunk_001.csv", "id,name\n1,a\n"),
                ("users_chunk_002.csv", "id,name\n2,b\n"),
            ],
        );
        fs::write(dir.path().join("users_chunk_001.csv"), "corrupted").unwrap();

        let err =
            verify_checksums(&["movr.users".to_string()], dir.path(), true).unwrap_err();
        assert!(matches!(err, TransferError::Integrity { .. }));
        assert!(err.to_string().contains("users_chunk_001.csv"));
    }
}
