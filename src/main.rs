// ABOUTME: CLI entry point for crdb-transfer
// ABOUTME: Parses commands and routes to appropriate handlers

use clap::{Parser, Subcommand, ValueEnum};
use crdb_transfer::commands;
use crdb_transfer::config::TransferConfig;
use crdb_transfer::transfer::{DataFormat, ExportOptions, LoadOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crdb-transfer")]
#[command(about = "Chunked, resumable table export and load for CockroachDB and PostgreSQL", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Csv,
    Sql,
}

impl From<OutputFormat> for DataFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Csv => DataFormat::Csv,
            OutputFormat::Sql => DataFormat::Sql,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Export table data into chunked, checksummed files plus manifests
    Export {
        /// Connection string for the source database
        #[arg(long)]
        url: String,
        /// Database name
        #[arg(long)]
        db: String,
        /// Fully-qualified db.table names (comma-separated); all tables when omitted
        #[arg(long, value_delimiter = ',')]
        tables: Option<Vec<String>>,
        /// Output directory for chunks and manifests
        #[arg(long, default_value = "crdb_transfer_output")]
        out_dir: PathBuf,
        /// Chunk data encoding
        #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
        data_format: OutputFormat,
        /// Limit rows per table
        #[arg(long)]
        data_limit: Option<u64>,
        /// Gzip-compress CSV chunks
        #[arg(long)]
        data_compress: bool,
        /// Order data by column(s), comma-separated
        #[arg(long)]
        data_order: Option<String>,
        /// Order data descending
        #[arg(long)]
        data_order_desc: bool,
        /// Fail if ordered column(s) not found
        #[arg(long)]
        data_order_strict: bool,
        /// Rows per chunk
        #[arg(long)]
        chunk_size: Option<u64>,
        /// Export tables in parallel
        #[arg(long)]
        data_parallel: bool,
        /// Worker pool size for parallel export
        #[arg(long)]
        concurrency: Option<usize>,
        /// Region tag stamped into each manifest
        #[arg(long)]
        region: Option<String>,
        /// Verify exported chunk checksums after export
        #[arg(long)]
        verify: bool,
        /// Stop if any checksum fails during verification
        #[arg(long)]
        verify_strict: bool,
        /// Number of retry attempts for transient failures
        #[arg(long)]
        retry_count: Option<u32>,
        /// Initial retry delay in milliseconds
        #[arg(long)]
        retry_delay: Option<u64>,
        /// Path to a transfer.toml with defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load exported chunks back into a database, resumably
    Load {
        /// Connection string for the target database
        #[arg(long)]
        url: String,
        /// Directory containing manifests and chunk files
        #[arg(long)]
        data_dir: PathBuf,
        /// Schema SQL file to execute before loading data
        #[arg(long)]
        schema: Option<PathBuf>,
        /// Path to the JSON file tracking loaded chunks
        #[arg(long, default_value = "resume.json")]
        resume_log: PathBuf,
        /// Directory of per-table resume logs (overrides --resume-log)
        #[arg(long)]
        resume_log_dir: Option<PathBuf>,
        /// Fully-qualified tables to include (comma-separated)
        #[arg(long, value_delimiter = ',')]
        include_tables: Option<Vec<String>>,
        /// Fully-qualified tables to exclude (comma-separated)
        #[arg(long, value_delimiter = ',')]
        exclude_tables: Option<Vec<String>>,
        /// Show what would be loaded without executing
        #[arg(long)]
        dry_run: bool,
        /// Load chunks in parallel
        #[arg(long)]
        parallel_load: bool,
        /// Worker pool size for parallel load
        #[arg(long)]
        concurrency: Option<usize>,
        /// Validate chunk header rows against the live table before loading
        #[arg(long)]
        validate_csv: bool,
        /// Halt a table's load at the first failed chunk
        #[arg(long)]
        resume_strict: bool,
        /// Only load manifests whose region tag matches (substring)
        #[arg(long)]
        region_filter: Option<String>,
        /// Number of retry attempts for transient failures
        #[arg(long)]
        retry_count: Option<u32>,
        /// Initial retry delay in milliseconds
        #[arg(long)]
        retry_delay: Option<u64>,
        /// Path to a transfer.toml with defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Verify chunk checksums against their manifests
    Verify {
        /// Directory containing manifests and chunk files
        #[arg(long)]
        out_dir: PathBuf,
        /// Tables to verify (comma-separated); discovered from manifests when omitted
        #[arg(long, value_delimiter = ',')]
        tables: Option<Vec<String>>,
        /// Stop at the first checksum mismatch
        #[arg(long)]
        verify_strict: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            url,
            db,
            tables,
            out_dir,
            data_format,
            data_limit,
            data_compress,
            data_order,
            data_order_desc,
            data_order_strict,
            chunk_size,
            data_parallel,
            concurrency,
            region,
            verify,
            verify_strict,
            retry_count,
            retry_delay,
            config,
        } => {
            let file_config = load_config(config.as_deref())?;
            let options = ExportOptions {
                format: data_format.into(),
                page_size: chunk_size.or(file_config.page_size).unwrap_or(1000),
                limit: data_limit,
                compress: data_compress,
                order: data_order,
                order_desc: data_order_desc,
                order_strict: data_order_strict,
                region: region.or_else(|| file_config.region.clone()),
                retry: file_config.retry_policy(retry_count, retry_delay),
            };
            let request = commands::ExportRequest {
                tables: tables.unwrap_or_default(),
                out_dir,
                options,
                parallel: data_parallel,
                concurrency: concurrency.or(file_config.concurrency).unwrap_or(4),
                verify,
                verify_strict,
            };
            commands::export(&url, &db, request).await
        }
        Commands::Load {
            url,
            data_dir,
            schema,
            resume_log,
            resume_log_dir,
            include_tables,
            exclude_tables,
            dry_run,
            parallel_load,
            concurrency,
            validate_csv,
            resume_strict,
            region_filter,
            retry_count,
            retry_delay,
            config,
        } => {
            let file_config = load_config(config.as_deref())?;
            let options = LoadOptions {
                parallel: parallel_load,
                concurrency: concurrency.or(file_config.concurrency).unwrap_or(4),
                validate: validate_csv,
                strict: resume_strict,
                region_filter: region_filter.or_else(|| file_config.region.clone()),
                retry: file_config.retry_policy(retry_count, retry_delay),
                remote: None,
            };
            let request = commands::LoadRequest {
                data_dir,
                schema,
                resume_log,
                resume_log_dir,
                include_tables,
                exclude_tables,
                dry_run,
                options,
            };
            commands::load(&url, request).await
        }
        Commands::Verify {
            out_dir,
            tables,
            verify_strict,
        } => {
            let request = commands::VerifyRequest {
                tables: tables.unwrap_or_default(),
                out_dir,
                strict: verify_strict,
            };
            commands::verify(request).await
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<TransferConfig> {
    match path {
        Some(path) => Ok(TransferConfig::load(path)?),
        None => Ok(TransferConfig::default()),
    }
}
