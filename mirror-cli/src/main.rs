use std::sync::Arc;

use clap::Parser;
use crates_mirror_engine::DownloadOrchestrator;
use tokio::net::TcpListener;
use tracing::{error, info};

mod cli;
mod config;
mod error;
mod logging;
mod server;

use cli::CliArgs;
use error::AppError;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        // Log the full error for debugging
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

    let workers = match args.workers {
        Some(0) => {
            return Err(AppError::InvalidInput(
                "--workers must be at least 1".to_string(),
            ));
        }
        Some(n) => n,
        None => std::thread::available_parallelism().map_or(1, |n| n.get()),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
        .map_err(|e| AppError::Initialization(format!("tokio runtime: {e}")))?;

    runtime.block_on(run(args, workers))
}

async fn run(args: CliArgs, workers: usize) -> Result<(), AppError> {
    info!("crates-mirror {}", env!("CARGO_PKG_VERSION"));

    let config = config::mirror_config(&args)?;
    info!(
        "HTTP timeout configuration: overall={}s, connect={}s, read={}s",
        args.timeout, args.connect_timeout, args.read_timeout
    );

    tokio::fs::create_dir_all(&config.cache_root).await?;
    let mirror = Arc::new(DownloadOrchestrator::new(&config)?);

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!(
        registry = %config.registry_url,
        workers,
        "Serving crate downloads"
    );

    server::serve(listener, mirror).await
}
