// src/main.rs
mod extractors;
mod google;
mod pdf;
mod pipeline;
mod report;
mod storage;
mod utils;

use std::path::PathBuf;

use clap::Parser;
use google::{GoogleClient, ServiceAccountKey};
use pipeline::{FileOutcome, RunOptions};
use utils::AppError;

/// Summarizes issued-share history from corporate registration PDFs in a Drive folder
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Drive folder id holding the registration PDFs
    #[arg(short, long)]
    folder_id: String,

    /// Analyze this file again even if it was processed before (repeatable)
    #[arg(short, long = "reanalyze", value_name = "FILE_NAME")]
    reanalyze: Vec<String>,

    /// Drop this file from the processed index and cached results (repeatable)
    #[arg(long = "forget", value_name = "FILE_NAME")]
    forget: Vec<String>,

    /// Service account JSON key (defaults to GCP_SERVICE_ACCOUNT_JSON / GOOGLE_APPLICATION_CREDENTIALS)
    #[arg(short, long)]
    credentials: Option<PathBuf>,

    /// Debug mode - save annotated text and parsed blocks per file, log at debug level
    #[arg(short, long)]
    debug: bool,

    /// Directory for debug output
    #[arg(long, default_value = "./debug")]
    debug_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Parse CLI Arguments
    let args = Args::parse();

    // 2. Optional .env with credential variables (and RUST_LOG)
    let dotenv = dotenvy::dotenv();

    // 3. Setup Logging (RUST_LOG, or --debug for this crate's debug events)
    utils::logging::setup_logging(args.debug);
    if let Ok(path) = dotenv {
        tracing::debug!("Loaded environment from {}", path.display());
    }
    tracing::info!("Starting processing for args: {:?}", args);

    if args.folder_id.trim().is_empty() {
        return Err(AppError::Config("folder id must not be empty".to_string()));
    }

    // 4. Authenticate; a credential failure ends the run before anything is written
    let key = ServiceAccountKey::resolve(args.credentials.as_deref())?;
    let client = GoogleClient::connect(&key).await?;

    // 5. Analyze and publish
    let options = RunOptions {
        folder_id: args.folder_id.clone(),
        reanalyze: args.reanalyze.into_iter().collect(),
        forget: args.forget.into_iter().collect(),
        debug_dir: args.debug.then_some(args.debug_dir),
        run_date: chrono::Local::now().date_naive(),
    };
    let summary = pipeline::run_register(&client, &options).await?;

    for file in summary.files.iter().filter(|f| f.status == FileOutcome::Failed) {
        tracing::warn!("{} failed: {}", file.filename, file.error.as_deref().unwrap_or("unknown error"));
    }
    tracing::info!(
        "Processing finished. Completed: {}, Failed: {}, Skipped: {}. Sheet: {}",
        summary.counts.completed,
        summary.counts.failed,
        summary.counts.already_processed,
        summary.sheet.url
    );

    let json = serde_json::to_string_pretty(&summary).map_err(utils::error::StorageError::from)?;
    println!("{}", json);

    Ok(())
}
