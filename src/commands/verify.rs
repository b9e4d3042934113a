// ABOUTME: Verify command - recomputes chunk checksums against manifests
// ABOUTME: Discovers tables from flags or by scanning the output directory

use crate::transfer::verify_checksums;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Verify request assembled at the CLI boundary.
pub struct VerifyRequest {
    /// Tables to verify; discovered from manifest files when empty.
    pub tables: Vec<String>,
    pub out_dir: PathBuf,
    pub strict: bool,
}

/// Recompute and compare chunk checksums for the requested tables.
///
/// Verification is pure file I/O: no database connection is needed. Any
/// checksum failure makes the command exit non-zero so scripts can branch
/// on it; strict mode additionally aborts at the first mismatch.
pub async fn verify(request: VerifyRequest) -> Result<()> {
    tracing::info!("Verifying chunk checksums in {}...", request.out_dir.display());

    let tables = if request.tables.is_empty() {
        discover_tables(&request.out_dir)?
    } else {
        request.tables
    };

    if tables.is_empty() {
        tracing::warn!("No manifests found in {}", request.out_dir.display());
        return Ok(());
    }

    let summary = verify_checksums(&tables, &request.out_dir, request.strict)?;

    if summary.failed > 0 {
        bail!("{} chunk(s) failed checksum verification", summary.failed);
    }
    if summary.missing > 0 {
        tracing::warn!("{} manifest(s) or chunk file(s) missing", summary.missing);
    }
    tracing::info!("All present chunks verified successfully");
    Ok(())
}

/// Table names derived from `*.manifest.json` files in the directory.
fn discover_tables(out_dir: &Path) -> Result<Vec<String>> {
    let mut tables = Vec::new();
    for entry in std::fs::read_dir(out_dir)
        .with_context(|| format!("Failed to read {}", out_dir.display()))?
    {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(short_name) = name.strip_suffix(".manifest.json") {
            tables.push(short_name.to_string());
        }
    }
    tables.sort();
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::file_sha256;
    use crate::transfer::manifest::{ChunkInfo, Manifest};

    fn write_fixture(dir: &Path, table: &str, chunk: &str, content: &str) {
        std::fs::write(dir.join(chunk), content).unwrap();
        let mut manifest = Manifest::new(table.to_string(), None);
        manifest.chunks.push(ChunkInfo {
            file: chunk.to_string(),
            rows: 1,
            sha256: file_sha256(&dir.join(chunk)).unwrap(),
        });
        manifest.write(dir).unwrap();
    }

    #[tokio::test]
    async fn test_verify_discovers_manifests() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path(), "movr.users", "users_chunk_001.csv", "id\n1\n");
        write_fixture(dir.path(), "movr.rides", "rides_chunk_001.csv", "id\n2\n");

        let request = VerifyRequest {
            tables: Vec::new(),
            out_dir: dir.path().to_path_buf(),
            strict: false,
        };
        verify(request).await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_fails_on_corruption() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path(), "movr.users", "users_chunk_001.csv", "id\n1\n");
        std::fs::write(dir.path().join("users_chunk_001.csv"), "tampered").unwrap();

        let request = VerifyRequest {
            tables: Vec::new(),
            out_dir: dir.path().to_path_buf(),
            strict: false,
        };
        let result = verify(request).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_verify_empty_directory_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let request = VerifyRequest {
            tables: Vec::new(),
            out_dir: dir.path().to_path_buf(),
            strict: false,
        };
        verify(request).await.unwrap();
    }

    #[test]
    fn test_discover_tables_strips_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("users.manifest.json"), "{}").unwrap();
        std::fs::write(dir.path().join("users_chunk_001.csv"), "").unwrap();

        let tables = discover_tables(dir.path()).unwrap();
        assert_eq!(tables, vec!["users".to_string()]);
    }
}
