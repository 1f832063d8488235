//! Stowage CLI - store files through the admission-controlled upload queue

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::info;

use stowage_core::domain::queue::parse_number;
use stowage_core::domain::{
    AdmissionCeiling, PathPolicy, QueueConfig, RequestMeta, StoredFile, UploadFile, UploadOutcome,
};
use stowage_core::{StorageEngine, StorageOptions, UploadQueue};
use stowage_infra_fs::FsWriteSink;

#[derive(Parser)]
#[command(name = "stowage")]
#[command(about = "Admission-controlled upload writer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Also write JSON logs to a daily-rolling file in this directory
    #[arg(long, env = "STOWAGE_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store files into a destination directory
    Store {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Destination directory (created if missing, `~` expanded)
        #[arg(short, long, env = "STOWAGE_DEST")]
        dest: String,

        /// Fixed filename (single file only); default names files by content hash
        #[arg(short, long, env = "STOWAGE_FILENAME", conflicts_with = "keep_name")]
        filename: Option<String>,

        /// Keep each file's original name
        #[arg(long)]
        keep_name: bool,

        /// Maximum concurrent writes (non-positive or invalid: default)
        #[arg(long, env = "STOWAGE_MAX_CONCURRENT")]
        max_concurrent: Option<String>,

        /// Admission pass interval in milliseconds (non-positive or invalid: default)
        #[arg(long, env = "STOWAGE_POLL_INTERVAL_MS")]
        poll_interval_ms: Option<String>,

        /// Allow one write beyond the concurrency limit
        #[arg(long, env = "STOWAGE_LENIENT_CEILING")]
        lenient_ceiling: bool,

        /// Give up on a single write after this many milliseconds
        #[arg(long, env = "STOWAGE_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Sync file data to disk before reporting success
        #[arg(long)]
        durable: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a stored file
    Remove {
        /// Path of the stored file
        path: PathBuf,
    },
}

#[derive(Tabled)]
struct StoreRow {
    source: String,
    status: String,
    stored_as: String,
    size: String,
}

#[derive(Serialize)]
struct StoreReport {
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stored: Option<StoredFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl StoreReport {
    fn new(source: &Path, outcome: UploadOutcome) -> Self {
        let source = source.display().to_string();
        match outcome {
            Ok(stored) => Self {
                source,
                stored: Some(stored),
                error: None,
            },
            Err(e) => Self {
                source,
                stored: None,
                error: Some(e.to_string()),
            },
        }
    }

    fn row(&self) -> StoreRow {
        match (&self.stored, &self.error) {
            (Some(stored), _) => StoreRow {
                source: self.source.clone(),
                status: "stored".to_string(),
                stored_as: stored
                    .full_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                size: stored.size.to_string(),
            },
            (None, error) => StoreRow {
                source: self.source.clone(),
                status: "failed".to_string(),
                stored_as: error.clone().unwrap_or_default(),
                size: "-".to_string(),
            },
        }
    }
}

struct StoreArgs {
    dest: String,
    filename: Option<String>,
    keep_name: bool,
    max_concurrent: Option<String>,
    poll_interval_ms: Option<String>,
    lenient_ceiling: bool,
    timeout_ms: Option<u64>,
}

fn build_options(args: &StoreArgs, file_count: usize) -> Result<StorageOptions> {
    let destination = shellexpand::tilde(&args.dest).into_owned();

    let filename = match (&args.filename, args.keep_name) {
        (Some(_), _) if file_count > 1 => {
            anyhow::bail!("--filename can only be used with a single file")
        }
        (Some(name), _) => PathPolicy::fixed(name.clone()),
        (None, true) => PathPolicy::computed(|_, item| Ok(item.file.original_name.clone())),
        (None, false) => PathPolicy::ContentHash,
    };

    let ceiling = if args.lenient_ceiling {
        AdmissionCeiling::Lenient
    } else {
        AdmissionCeiling::Exact
    };

    let mut options = StorageOptions::new(PathPolicy::fixed(destination))
        .with_filename(filename)
        .with_ceiling(ceiling);
    options.max_concurrent = parse_number(args.max_concurrent.as_deref());
    options.poll_interval_ms = parse_number(args.poll_interval_ms.as_deref());
    options.item_timeout_ms = args.timeout_ms;
    Ok(options)
}

async fn open_upload(path: &Path) -> Result<UploadFile> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let original_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mime_type = mime_guess::from_path(path).first_or_octet_stream().to_string();
    Ok(UploadFile::from_reader(original_name, mime_type, file))
}

async fn run_store(
    files: Vec<PathBuf>,
    args: StoreArgs,
    durable: bool,
    as_json: bool,
) -> Result<()> {
    let options = build_options(&args, files.len())?;
    let queue = Arc::new(UploadQueue::with_config(QueueConfig::default()));
    let sink = if durable {
        FsWriteSink::durable()
    } else {
        FsWriteSink::new()
    };

    let engine = StorageEngine::configure(options, queue, Arc::new(sink))
        .await
        .context("Failed to configure storage")?;

    let config = engine.queue().config();
    info!(
        files = files.len(),
        max_concurrent = config.max_concurrent,
        poll_interval_ms = config.poll_interval_ms,
        "Storing files"
    );

    let mut pending = Vec::with_capacity(files.len());
    for path in &files {
        let upload = open_upload(path).await?;
        let request = RequestMeta::new(json!({ "source": path.display().to_string() }));
        pending.push((path, engine.submit(request, upload)?));
    }

    let mut reports = Vec::with_capacity(pending.len());
    for (path, upload) in pending {
        reports.push(StoreReport::new(path, upload.wait().await));
    }
    let failed = reports.iter().filter(|r| r.error.is_some()).count();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        let rows: Vec<StoreRow> = reports.iter().map(StoreReport::row).collect();
        println!("{}", Table::new(rows));
        println!();
        if failed == 0 {
            println!("{}", format!("✓ {} file(s) stored", reports.len()).green().bold());
        } else {
            println!(
                "{}",
                format!("✗ {} of {} file(s) failed", failed, reports.len()).red().bold()
            );
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} uploads failed", failed, reports.len());
    }
    Ok(())
}

async fn run_remove(path: PathBuf) -> Result<()> {
    let path = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
    let parent = path
        .parent()
        .map(|p| p.display().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".".to_string());

    let options = StorageOptions::new(PathPolicy::fixed(parent));
    let engine = StorageEngine::attach(
        options,
        Arc::new(UploadQueue::default()),
        Arc::new(FsWriteSink::new()),
    )
    .context("Failed to configure storage")?;

    let mut stored = StoredFile::from_path(&path);
    engine
        .remove(&mut stored)
        .await
        .with_context(|| format!("Failed to remove {}", path.display()))?;

    println!("{}", format!("✓ Removed {}", path.display()).green().bold());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.log_dir.as_deref())?;

    info!("Stowage v{}", stowage_core::VERSION);

    match cli.command {
        Commands::Store {
            files,
            dest,
            filename,
            keep_name,
            max_concurrent,
            poll_interval_ms,
            lenient_ceiling,
            timeout_ms,
            durable,
            json,
        } => {
            let args = StoreArgs {
                dest,
                filename,
                keep_name,
                max_concurrent,
                poll_interval_ms,
                lenient_ceiling,
                timeout_ms,
            };
            run_store(files, args, durable, json).await?;
        }

        Commands::Remove { path } => run_remove(path).await?,
    }

    Ok(())
}
