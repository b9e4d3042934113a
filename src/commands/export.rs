// ABOUTME: Export command - fans table exports out over a bounded worker pool
// ABOUTME: Isolates per-table failures and aggregates row counts for the summary

use crate::db;
use crate::schema;
use crate::transfer::{self, verify_checksums, ExportOptions};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

/// Export request assembled at the CLI boundary.
pub struct ExportRequest {
    /// Fully-qualified tables; discovered from the database when empty.
    pub tables: Vec<String>,
    pub out_dir: PathBuf,
    pub options: ExportOptions,
    pub parallel: bool,
    pub concurrency: usize,
    /// Verify chunk checksums after the export completes.
    pub verify: bool,
    pub verify_strict: bool,
}

/// Export every requested table's data into chunked, checksummed files.
///
/// Each table is an independent unit of work: a failure is logged and
/// yields zero rows for that table without aborting its siblings. Tables
/// run sequentially or across a bounded worker pool, each worker with its
/// own connection.
pub async fn export(url: &str, db_name: &str, request: ExportRequest) -> Result<()> {
    tracing::info!("Starting data export for database '{}'...", db_name);

    let out_dir = request.out_dir.join(db_name);
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let tables = if request.tables.is_empty() {
        let client = db::connect_with_retry(url, &request.options.retry)
            .await
            .context("Failed to connect for table discovery")?;
        schema::list_tables(&client, db_name)
            .await
            .context("Failed to list tables")?
    } else {
        request.tables.clone()
    };

    if tables.is_empty() {
        tracing::warn!("No tables found to export");
        return Ok(());
    }
    tracing::info!("Found {} table(s) to export", tables.len());

    let progress = ProgressBar::new(tables.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("##-"),
    );

    let results: Vec<(String, u64)> = if request.parallel {
        stream::iter(tables.iter().cloned())
            .map(|table| {
                let pb = progress.clone();
                let options = &request.options;
                let out_dir = &out_dir;
                async move {
                    let rows = export_one(url, &table, out_dir, options).await;
                    pb.inc(1);
                    pb.set_message(format!("Exported {}", table));
                    (table, rows)
                }
            })
            .buffer_unordered(request.concurrency.max(1))
            .collect()
            .await
    } else {
        let mut results = Vec::with_capacity(tables.len());
        for table in &tables {
            let rows = export_one(url, table, &out_dir, &request.options).await;
            progress.inc(1);
            progress.set_message(format!("Exported {}", table));
            results.push((table.clone(), rows));
        }
        results
    };
    progress.finish_with_message("Export complete");

    let total_rows: u64 = results.iter().map(|(_, rows)| rows).sum();
    for (table, rows) in &results {
        tracing::info!(" - {}: {} rows", table, rows);
    }
    tracing::info!("Total rows exported: {}", total_rows);

    if request.verify {
        run_verification(&tables, &out_dir, request.verify_strict)?;
    }

    Ok(())
}

/// One table's export with failure isolation: errors are logged and become
/// a zero row count rather than propagating.
async fn export_one(url: &str, table: &str, out_dir: &Path, options: &ExportOptions) -> u64 {
    match transfer::export_table(url, table, out_dir, options).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("Failed to export data for {}: {}", table, e);
            0
        }
    }
}

fn run_verification(tables: &[String], out_dir: &Path, strict: bool) -> Result<()> {
    tracing::info!("Verifying exported chunk checksums...");
    let summary = verify_checksums(tables, out_dir, strict)?;
    if !summary.is_clean() {
        tracing::error!(
            "Verification found problems: {} failed, {} missing",
            summary.failed,
            summary.missing
        );
    }
    Ok(())
}
