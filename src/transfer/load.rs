// ABOUTME: Manifest-driven chunk loading with resume, validation, and parallelism
// ABOUTME: Each chunk loads atomically and is checkpointed in the resume log on success

use crate::db;
use crate::error::TransferError;
use crate::retry::RetryPolicy;
use crate::schema;
use crate::storage::RemoteSource;
use crate::transfer::encoding::parse_csv_record;
use crate::transfer::export::quote_qualified;
use crate::transfer::manifest::{short_table_name, Manifest};
use crate::transfer::resume::ResumeLog;
use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::stream::{self, StreamExt};
use futures::{pin_mut, SinkExt};
use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct LoadOptions {
    /// Dispatch chunks to a bounded worker pool instead of sequentially.
    pub parallel: bool,
    pub concurrency: usize,
    /// Compare the chunk header row against the live table before loading.
    pub validate: bool,
    /// Halt the table on the first failed chunk instead of continuing.
    pub strict: bool,
    /// Case-insensitive substring filter against the manifest region tag.
    pub region_filter: Option<String>,
    pub retry: RetryPolicy,
    /// When set, chunks are fetched from an object store before loading.
    pub remote: Option<RemoteSource>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            parallel: false,
            concurrency: 4,
            validate: false,
            strict: false,
            region_filter: None,
            retry: RetryPolicy::default(),
            remote: None,
        }
    }
}

/// Terminal counts for one table's load, surfaced to the caller for
/// exit-code decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl LoadSummary {
    pub fn add(&mut self, other: LoadSummary) {
        self.loaded += other.loaded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

enum ChunkOutcome {
    Loaded,
    Failed,
    /// Suppressed by a strict-mode halt before it was submitted.
    NotAttempted,
}

/// Load a table's remaining chunks as described by its manifest.
///
/// Chunks already present in the resume log are skipped; every
/// successfully loaded chunk is checkpointed in the log before the next one
/// is counted, so a crash resumes exactly where it stopped. Per-chunk
/// failures are isolated unless `strict` is set. In parallel mode a strict
/// halt stops submitting new chunks but lets in-flight ones finish
/// (best-effort, by design of the worker pool).
pub async fn load_chunks_from_manifest(
    url: &str,
    manifest_path: &Path,
    data_dir: &Path,
    resume_path: &Path,
    opts: &LoadOptions,
) -> Result<LoadSummary, TransferError> {
    let manifest = Manifest::load(manifest_path)?;
    let table = manifest.table.clone();
    let log_key = manifest.log_key();

    if let Some(filter) = &opts.region_filter {
        let region = manifest.region.as_deref().unwrap_or("N/A");
        if !region.to_lowercase().contains(&filter.to_lowercase()) {
            tracing::info!(
                "Skipping {} due to region filter: {} (manifest says: {})",
                table,
                filter,
                region
            );
            return Ok(LoadSummary::default());
        }
    }

    let resume = ResumeLog::open(resume_path)?;
    let loaded_chunks = resume.loaded_chunks(&log_key);

    // Tolerate resume entries for chunks the manifest no longer names
    // (manifest regenerated since the last load attempt).
    let manifest_files: BTreeSet<&str> =
        manifest.chunks.iter().map(|c| c.file.as_str()).collect();
    for stale in loaded_chunks
        .iter()
        .filter(|f| !manifest_files.contains(f.as_str()))
    {
        tracing::warn!(
            "Resume log entry '{}' is not in the manifest for {}; ignoring",
            stale,
            table
        );
    }

    let mut summary = LoadSummary::default();
    let mut work: Vec<String> = Vec::new();
    for chunk in &manifest.chunks {
        if loaded_chunks.contains(&chunk.file) {
            tracing::info!("Skipped already loaded: {}", chunk.file);
            summary.skipped += 1;
        } else {
            work.push(chunk.file.clone());
        }
    }

    let resume = Arc::new(Mutex::new(resume));
    if opts.parallel {
        load_parallel(url, &table, data_dir, work, &log_key, resume, opts, &mut summary).await?;
    } else {
        load_sequential(url, &table, data_dir, work, &log_key, resume, opts, &mut summary).await?;
    }

    tracing::info!(
        "Loaded {} chunks | Skipped: {} | Failed: {}",
        summary.loaded,
        summary.skipped,
        summary.failed
    );
    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
async fn load_sequential(
    url: &str,
    table: &str,
    data_dir: &Path,
    work: Vec<String>,
    log_key: &str,
    resume: Arc<Mutex<ResumeLog>>,
    opts: &LoadOptions,
    summary: &mut LoadSummary,
) -> Result<(), TransferError> {
    for chunk_file in work {
        let chunk_ref = chunk_file.as_str();
        let result = opts
            .retry
            .execute(move || load_chunk(url, table, data_dir, chunk_ref, opts))
            .await;
        match result {
            Ok(()) => {
                resume.lock().await.record(log_key, &chunk_file)?;
                summary.loaded += 1;
            }
            Err(e) => {
                tracing::error!("Failed to load chunk {}: {}", chunk_file, e);
                summary.failed += 1;
                if opts.strict {
                    tracing::error!("Aborting due to failed chunk: {}", chunk_file);
                    break;
                }
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn load_parallel(
    url: &str,
    table: &str,
    data_dir: &Path,
    work: Vec<String>,
    log_key: &str,
    resume: Arc<Mutex<ResumeLog>>,
    opts: &LoadOptions,
    summary: &mut LoadSummary,
) -> Result<(), TransferError> {
    let halt = Arc::new(AtomicBool::new(false));

    let outcomes: Vec<Result<ChunkOutcome, TransferError>> = stream::iter(work)
        .map(|chunk_file| {
            let halt = halt.clone();
            let resume = resume.clone();
            async move {
                // Strict halt gates submission only; chunks already past
                // this point run to completion.
                if halt.load(Ordering::SeqCst) {
                    return Ok(ChunkOutcome::NotAttempted);
                }
                let chunk_ref = chunk_file.as_str();
                let result = opts
                    .retry
                    .execute(move || load_chunk(url, table, data_dir, chunk_ref, opts))
                    .await;
                match result {
                    Ok(()) => {
                        // The log entry is a full read-modify-write; the
                        // mutex is the single-writer critical section.
                        resume.lock().await.record(log_key, &chunk_file)?;
                        Ok(ChunkOutcome::Loaded)
                    }
                    Err(e) => {
                        tracing::error!("Failed to load chunk {}: {}", chunk_file, e);
                        if opts.strict {
                            tracing::error!("Aborting due to failed chunk: {}", chunk_file);
                            halt.store(true, Ordering::SeqCst);
                        }
                        Ok(ChunkOutcome::Failed)
                    }
                }
            }
        })
        .buffer_unordered(opts.concurrency.max(1))
        .collect()
        .await;

    let mut suppressed = 0u64;
    for outcome in outcomes {
        match outcome? {
            ChunkOutcome::Loaded => summary.loaded += 1,
            ChunkOutcome::Failed => summary.failed += 1,
            ChunkOutcome::NotAttempted => suppressed += 1,
        }
    }
    if suppressed > 0 {
        tracing::warn!(
            "Halted before {} remaining chunk(s) for {}",
            suppressed,
            table
        );
    }
    Ok(())
}

/// Load one chunk file into the target table over its own connection.
///
/// The chunk is a single `COPY` (or one statement batch for `.sql`
/// chunks), which the backend applies atomically: it either lands fully or
/// not at all, so no partial-chunk state ever needs tracking.
async fn load_chunk(
    url: &str,
    table: &str,
    data_dir: &Path,
    chunk_file: &str,
    opts: &LoadOptions,
) -> Result<(), TransferError> {
    let local_path: PathBuf = match &opts.remote {
        Some(remote) => remote.fetch(chunk_file)?,
        None => data_dir.join(chunk_file),
    };

    let client = db::connect(url).await?;

    if chunk_file.ends_with(".sql") {
        let sql = std::fs::read_to_string(&local_path)?;
        client.batch_execute(&sql).await?;
    } else {
        if opts.validate {
            validate_csv_header(&client, table, &local_path).await?;
        }
        let data = read_chunk_bytes(&local_path)?;
        let copy_sql = format!(
            "COPY {} FROM STDIN WITH CSV HEADER",
            quote_qualified(table)
        );
        let sink = client.copy_in(&copy_sql).await?;
        pin_mut!(sink);
        sink.send(Bytes::from(data)).await?;
        sink.finish().await?;
    }

    tracing::info!("Loaded chunk: {}", chunk_file);
    Ok(())
}

/// Compare the live table's column names (schema order) with the chunk
/// file's header row.
async fn validate_csv_header(
    client: &tokio_postgres::Client,
    table: &str,
    path: &Path,
) -> Result<(), TransferError> {
    let columns = schema::table_columns(client, short_table_name(table)).await?;
    let db_columns: Vec<String> = columns.into_iter().map(|c| c.name).collect();
    let header = read_csv_header(path)?;

    if db_columns != header {
        return Err(TransferError::Validation(format!(
            "header mismatch for {}: db columns {:?}, file header {:?}",
            table, db_columns, header
        )));
    }
    Ok(())
}

fn read_csv_header(path: &Path) -> Result<Vec<String>, TransferError> {
    let file = std::fs::File::open(path)?;
    let mut line = String::new();
    if path.extension().is_some_and(|ext| ext == "gz") {
        BufReader::new(GzDecoder::new(file)).read_line(&mut line)?;
    } else {
        BufReader::new(file).read_line(&mut line)?;
    }
    Ok(parse_csv_record(line.trim_end_matches(&['\r', '\n'][..])))
}

/// Chunk bytes ready for COPY, gunzipped when the file is compressed.
fn read_chunk_bytes(path: &Path) -> Result<Vec<u8>, TransferError> {
    if path.extension().is_some_and(|ext| ext == "gz") {
        let mut decoder = GzDecoder::new(std::fs::File::open(path)?);
        let mut data = Vec::new();
        decoder.read_to_end(&mut data)?;
        Ok(data)
    } else {
        Ok(std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::manifest::ChunkInfo;
    use std::time::Duration;

    // Nothing listens on this port; connection attempts fail fast.
    const DEAD_URL: &str = "postgresql://root@127.0.0.1:1/defaultdb";

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            retries: 1,
            initial_delay: Duration::from_millis(1),
            backoff: 1.0,
            jitter: Duration::ZERO,
        }
    }

    fn write_manifest(dir: &Path, table: &str, region: Option<&str>, files: &[&str]) -> PathBuf {
        let mut manifest = Manifest::new(table.to_string(), region.map(str::to_string));
        for file in files {
            std::fs::write(dir.join(file), "id,name\n1,a\n").unwrap();
            manifest.chunks.push(ChunkInfo {
                file: file.to_string(),
                rows: 1,
                sha256: crate::transfer::checksum::file_sha256(&dir.join(file)).unwrap(),
            });
        }
        manifest.write(dir).unwrap()
    }

    #[tokio::test]
    async fn test_region_filter_skips_table_without_touching_database() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = write_manifest(
            dir.path(),
            "movr.users",
            Some("us-east"),
            &["users_chunk_001.csv"],
        );

        let opts = LoadOptions {
            region_filter: Some("us-west".to_string()),
            retry: fast_retry(),
            ..Default::default()
        };
        let summary = load_chunks_from_manifest(
            DEAD_URL,
            &manifest_path,
            dir.path(),
            &dir.path().join("resume.json"),
            &opts,
        )
        .await
        .unwrap();

        assert_eq!(summary, LoadSummary::default());
    }

    #[tokio::test]
    async fn test_region_filter_substring_match_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = write_manifest(
            dir.path(),
            "movr.users",
            Some("US-East-1"),
            &["users_chunk_001.csv"],
        );

        // Matching filter proceeds to the (dead) database and fails the
        // chunk rather than skipping the table.
        let opts = LoadOptions {
            region_filter: Some("us-east".to_string()),
            retry: fast_retry(),
            ..Default::default()
        };
        let summary = load_chunks_from_manifest(
            DEAD_URL,
            &manifest_path,
            dir.path(),
            &dir.path().join("resume.json"),
            &opts,
        )
        .await
        .unwrap();

        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_fully_resumed_load_skips_everything() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = write_manifest(
            dir.path(),
            "movr.users",
            None,
            &["users_chunk_001.csv", "users_chunk_002.csv"],
        );

        let resume_path = dir.path().join("resume.json");
        let mut resume = ResumeLog::open(&resume_path).unwrap();
        resume.record("movr_users", "users_chunk_001.csv").unwrap();
        resume.record("movr_users", "users_chunk_002.csv").unwrap();

        // All chunks resumed: the dead URL is never dialed.
        let opts = LoadOptions {
            retry: fast_retry(),
            ..Default::default()
        };
        let summary =
            load_chunks_from_manifest(DEAD_URL, &manifest_path, dir.path(), &resume_path, &opts)
                .await
                .unwrap();

        assert_eq!(summary.loaded, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_stale_resume_entry_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path =
            write_manifest(dir.path(), "movr.users", None, &["users_chunk_001.csv"]);

        let resume_path = dir.path().join("resume.json");
        let mut resume = ResumeLog::open(&resume_path).unwrap();
        resume.record("movr_users", "users_chunk_001.csv").unwrap();
        // Entry for a chunk the (regenerated) manifest no longer names.
        resume.record("movr_users", "users_chunk_999.csv").unwrap();

        let opts = LoadOptions {
            retry: fast_retry(),
            ..Default::default()
        };
        let summary =
            load_chunks_from_manifest(DEAD_URL, &manifest_path, dir.path(), &resume_path, &opts)
                .await
                .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_strict_sequential_halts_after_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = write_manifest(
            dir.path(),
            "movr.users",
            None,
            &[
                "users_chunk_001.csv",
                "users_chunk_002.csv",
                "users_chunk_003.csv",
            ],
        );

        let opts = LoadOptions {
            strict: true,
            retry: fast_retry(),
            ..Default::default()
        };
        let summary = load_chunks_from_manifest(
            DEAD_URL,
            &manifest_path,
            dir.path(),
            &dir.path().join("resume.json"),
            &opts,
        )
        .await
        .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.loaded, 0);
    }

    #[tokio::test]
    async fn test_non_strict_attempts_every_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = write_manifest(
            dir.path(),
            "movr.users",
            None,
            &["users_chunk_001.csv", "users_chunk_002.csv"],
        );

        let opts = LoadOptions {
            retry: fast_retry(),
            ..Default::default()
        };
        let summary = load_chunks_from_manifest(
            DEAD_URL,
            &manifest_path,
            dir.path(),
            &dir.path().join("resume.json"),
            &opts,
        )
        .await
        .unwrap();

        assert_eq!(summary.failed, 2);
    }

    #[test]
    fn test_read_chunk_bytes_gzip_round_trip() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users_chunk_001.csv.gz");
        let mut encoder = GzEncoder::new(
            std::fs::File::create(&path).unwrap(),
            Compression::default(),
        );
        encoder.write_all(b"id,name\n1,a\n").unwrap();
        encoder.finish().unwrap();

        let data = read_chunk_bytes(&path).unwrap();
        assert_eq!(data, b"id,name\n1,a\n");

        let header = read_csv_header(&path).unwrap();
        assert_eq!(header, vec!["id".to_string(), "name".to_string()]);
    }

    #[tokio::test]
    #[ignore]
    async fn test_load_chunk_copies_rows() {
        let url = std::env::var("TEST_DATABASE_URL").unwrap();
        let client = crate::db::connect(&url).await.unwrap();
        client
            .batch_execute(
                "DROP TABLE IF EXISTS load_probe;
                 CREATE TABLE load_probe (id INT8 PRIMARY KEY, name TEXT)",
            )
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let chunk = dir.path().join("load_probe_chunk_001.csv");
        std::fs::write(&chunk, "id,name\n1,alice\n2,bob\n").unwrap();

        let opts = LoadOptions::default();
        load_chunk(&url, "defaultdb.load_probe", dir.path(), "load_probe_chunk_001.csv", &opts)
            .await
            .unwrap();

        let row = client
            .query_one("SELECT count(*) FROM load_probe", &[])
            .await
            .unwrap();
        assert_eq!(row.get::<_, i64>(0), 2);
    }
}
