//! Kumo Uploadr Library
//!
//! Chunked, concurrent, resumable-on-retry file uploads for a cloud-drive
//! storage API.
//!
//! # Features
//!
//! - **Two modes**: one streamed `PUT` below 30 MiB, multipart sessions above
//! - **Bounded concurrency**: at most 5 parts in flight per file
//! - **Retries**: 3 attempts per part with exponential backoff, abort on failure
//! - **Live progress**: throttled percent and speed in a shared registry
//! - **Quota aware**: pre-flight check and refresh after every upload
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kumo_uploadr::{api::ApiClient, quota::HttpQuotaProvider, Config, UploadFile, Uploader};
//! use kumo_uploadr::quota::QuotaProvider;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let client = Arc::new(ApiClient::new(&config.api)?);
//!     let quota = Arc::new(HttpQuotaProvider::new(Arc::clone(&client)));
//!     quota.refresh().await?;
//!
//!     let uploader = Uploader::new(config.upload, client, quota);
//!     let file = UploadFile::from_path("movie.mkv").await?;
//!     uploader.upload_file(file, None).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod metrics;
pub mod quota;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use upload::{UploadError, UploadFile, UploadRegistry, Uploader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
