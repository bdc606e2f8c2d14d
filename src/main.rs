//! Kumo Uploadr - upload files to a cloud drive from the command line
//!
//! Files of 30 MiB and more go through multipart sessions with parallel,
//! retried parts; smaller files are sent in one request.

use anyhow::Context;
use clap::Parser;
use kumo_uploadr::api::ApiClient;
use kumo_uploadr::quota::{HttpQuotaProvider, QuotaProvider};
use kumo_uploadr::{metrics, Config, UploadFile, UploadRegistry, Uploader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Kumo Uploadr - chunked, concurrent uploads to a cloud drive
#[derive(Parser, Debug)]
#[command(name = "kumo-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Destination folder ID (root when omitted)
    #[arg(long)]
    parent_id: Option<String>,

    /// Content type for every file instead of guessing from the extension
    #[arg(long)]
    content_type: Option<String>,

    /// Print Prometheus metrics when done
    #[arg(long)]
    print_metrics: bool,

    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    let result = if args.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!(e))
}

/// Log the registry once a second until the returned handle is aborted
fn spawn_progress_logger(registry: UploadRegistry) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            for item in registry.snapshot() {
                if item.status.is_terminal() {
                    continue;
                }
                info!(
                    file = %item.name,
                    status = %item.status,
                    progress = item.progress,
                    speed_bps = item.speed.unwrap_or_default() as u64,
                    chunks = ?item.uploaded_chunks.zip(item.total_chunks),
                    "Upload progress"
                );
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    info!("Starting Kumo Uploadr v{}", kumo_uploadr::VERSION);

    // Load configuration
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    info!("Loaded configuration from {:?}", args.config);
    metrics::set_enabled(config.metrics.enabled);

    let client = Arc::new(
        ApiClient::new(&config.api)?.with_frame_size(config.upload.stream_frame_size),
    );
    let quota = Arc::new(HttpQuotaProvider::new(Arc::clone(&client)));
    let snapshot = quota.refresh().await.context("Failed to fetch quota")?;
    info!(
        used = snapshot.used,
        limit = snapshot.limit,
        usage_percent = snapshot.usage_percent(),
        tier = %snapshot.tier_name,
        "Quota loaded"
    );

    let uploader = Uploader::new(config.upload, client, quota);

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let mut file = UploadFile::from_path(path)
            .await
            .with_context(|| format!("Failed to open {:?}", path))?;
        if let Some(content_type) = &args.content_type {
            file = file.with_content_type(content_type.clone());
        }
        files.push(file);
    }

    let logger = spawn_progress_logger(uploader.registry().clone());
    let uploads = files.into_iter().map(|file| {
        let name = file.name.clone();
        let uploader = uploader.clone();
        let parent_id = args.parent_id.clone();
        async move { (name, uploader.upload_file(file, parent_id).await) }
    });
    let results = futures::future::join_all(uploads).await;
    logger.abort();

    let mut failed = 0;
    for (name, result) in &results {
        match result {
            Ok(_) => info!(file = %name, "Uploaded"),
            Err(e) => {
                failed += 1;
                error!(file = %name, error = %e, error_key = %e.error_key(), "Upload failed");
            }
        }
    }

    if args.print_metrics {
        print!("{}", metrics::render());
    }

    if failed > 0 {
        warn!(failed, total = results.len(), "Some uploads failed");
        std::process::exit(1);
    }

    Ok(())
}
