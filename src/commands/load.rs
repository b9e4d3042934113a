// ABOUTME: Load command - replays exported chunks from a data directory
// ABOUTME: Scans manifests, applies filters, aggregates counts, sets the exit status

use crate::transfer::manifest::Manifest;
use crate::transfer::resume::log_key;
use crate::transfer::{load_chunks_from_manifest, LoadOptions, LoadSummary};
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::PathBuf;

/// Load request assembled at the CLI boundary.
pub struct LoadRequest {
    pub data_dir: PathBuf,
    /// Schema SQL file executed before any data is loaded.
    pub schema: Option<PathBuf>,
    /// Single resume log shared by all tables (keys are disjoint).
    pub resume_log: PathBuf,
    /// Per-table resume logs under this directory instead.
    pub resume_log_dir: Option<PathBuf>,
    pub include_tables: Option<Vec<String>>,
    pub exclude_tables: Option<Vec<String>>,
    pub dry_run: bool,
    pub options: LoadOptions,
}

/// Load every manifest found in the data directory, honoring table
/// filters and the resume log. Exits non-zero when any chunk failed so
/// invoking scripts can branch on partial failure.
pub async fn load(url: &str, request: LoadRequest) -> Result<()> {
    if let Some(schema_path) = &request.schema {
        if request.dry_run {
            tracing::info!("[Dry Run] Would load schema: {}", schema_path.display());
        } else {
            load_schema(url, schema_path, &request.options).await?;
        }
    }

    let include: Option<HashSet<&str>> = request
        .include_tables
        .as_ref()
        .map(|tables| tables.iter().map(String::as_str).collect());
    let exclude: Option<HashSet<&str>> = request
        .exclude_tables
        .as_ref()
        .map(|tables| tables.iter().map(String::as_str).collect());

    let mut manifest_paths: Vec<PathBuf> = std::fs::read_dir(&request.data_dir)
        .with_context(|| format!("Failed to read data directory {}", request.data_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(".manifest.json"))
        })
        .collect();
    manifest_paths.sort();

    if manifest_paths.is_empty() {
        tracing::warn!(
            "No manifests found in {}; nothing to load",
            request.data_dir.display()
        );
        return Ok(());
    }

    let mut totals = LoadSummary::default();
    for manifest_path in &manifest_paths {
        // Peek at the table identity first; a malformed manifest is warned
        // about and skipped without aborting its siblings.
        let manifest = match Manifest::load(manifest_path) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!(
                    "Skipping malformed manifest {}: {}",
                    manifest_path.display(),
                    e
                );
                continue;
            }
        };
        let table = manifest.table.as_str();

        if let Some(include) = &include {
            if !include.contains(table) {
                tracing::info!("Skipping {} (not in include list)", table);
                continue;
            }
        }
        if let Some(exclude) = &exclude {
            if exclude.contains(table) {
                tracing::info!("Skipping {} (in exclude list)", table);
                continue;
            }
        }

        if request.dry_run {
            tracing::info!("[Dry Run] Would load: {}", manifest_path.display());
            continue;
        }

        let resume_path = match &request.resume_log_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                dir.join(format!("{}.json", log_key(table)))
            }
            None => request.resume_log.clone(),
        };

        let summary = load_chunks_from_manifest(
            url,
            manifest_path,
            &request.data_dir,
            &resume_path,
            &request.options,
        )
        .await
        .with_context(|| format!("Failed to load table {}", table))?;
        totals.add(summary);
    }

    tracing::info!(
        "Load complete: {} loaded | {} skipped | {} failed",
        totals.loaded,
        totals.skipped,
        totals.failed
    );

    if totals.failed > 0 {
        bail!("{} chunk(s) failed to load", totals.failed);
    }
    Ok(())
}

/// Execute a schema SQL file as one statement batch before loading data.
async fn load_schema(
    url: &str,
    schema_path: &std::path::Path,
    options: &LoadOptions,
) -> Result<()> {
    tracing::info!("Loading schema from {}", schema_path.display());
    let sql = std::fs::read_to_string(schema_path)
        .with_context(|| format!("Schema file not found: {}", schema_path.display()))?;

    let client = crate::db::connect_with_retry(url, &options.retry).await?;
    client
        .batch_execute(&sql)
        .await
        .context("Failed to load schema")?;

    tracing::info!("Loaded schema from {}", schema_path.display());
    Ok(())
}
