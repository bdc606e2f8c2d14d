//! Upload module
//!
//! Drives files to the storage API either as one request or as a multipart
//! session with bounded part concurrency, per-part retries and throttled
//! progress reporting.

use thiserror::Error;

use crate::api::ApiError;

pub mod limiter;
pub mod plan;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod session;
pub mod types;
pub mod uploader;

pub use limiter::ConcurrencyLimiter;
pub use plan::{plan_chunks, ChunkRange};
pub use progress::{ProgressAggregator, ProgressUpdate, TransferSample, TransferThrottle};
pub use registry::UploadRegistry;
pub use retry::RetryPolicy;
pub use session::{FolderView, NoFolderView, UploadMode, UploadSession};
pub use types::{UploadFile, UploadId, UploadItem, UploadPatch, UploadStatus};
pub use uploader::Uploader;

/// Files of at least this size use a multipart session (30 MiB)
pub const CHUNKED_UPLOAD_THRESHOLD: u64 = 30 * 1024 * 1024;

/// Attempts per part before the session is aborted
pub const MAX_RETRIES: u32 = 3;

/// Parts in flight per session
pub const MAX_CONCURRENT_CHUNKS: usize = 5;

/// Content type used when the file does not carry one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Classification of a failed upload, surfaced to the UI as a localization key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    QuotaExceeded,
    Unauthorized,
    NameConflict,
    NetworkError,
    Unknown,
}

impl ErrorKind {
    /// Map an HTTP status to its classification
    pub fn from_status(status: u16) -> Self {
        match status {
            413 => ErrorKind::QuotaExceeded,
            401 => ErrorKind::Unauthorized,
            409 => ErrorKind::NameConflict,
            _ => ErrorKind::Unknown,
        }
    }

    /// Stable localization key
    pub fn key(&self) -> &'static str {
        match self {
            ErrorKind::QuotaExceeded => "upload.error.quotaExceeded",
            ErrorKind::Unauthorized => "upload.error.unauthorized",
            ErrorKind::NameConflict => "upload.error.nameConflict",
            ErrorKind::NetworkError => "upload.error.networkError",
            ErrorKind::Unknown => "upload.error.unknown",
        }
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NameConflict => "name_conflict",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Upload errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Quota exceeded: {size} bytes requested with {used} of {limit} bytes used")]
    QuotaExceeded { size: u64, used: u64, limit: u64 },

    #[error("Transport error: {0}")]
    Transport(#[from] ApiError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to read {file}: {message}")]
    Read { file: String, message: String },
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            UploadError::Transport(ApiError::Status { status, .. }) => {
                ErrorKind::from_status(*status)
            }
            UploadError::Transport(ApiError::Network(_)) => ErrorKind::NetworkError,
            UploadError::Transport(_) | UploadError::Protocol(_) | UploadError::Read { .. } => {
                ErrorKind::Unknown
            }
        }
    }

    /// Localization key for the UI; a key chosen by the server wins over the
    /// status-derived default.
    pub fn error_key(&self) -> String {
        match self {
            UploadError::Transport(ApiError::Status {
                localization_key: Some(key),
                ..
            }) => key.clone(),
            other => other.kind().key().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> UploadError {
        UploadError::Transport(ApiError::Status {
            status,
            localization_key: None,
        })
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status(413).error_key(), "upload.error.quotaExceeded");
        assert_eq!(status(401).error_key(), "upload.error.unauthorized");
        assert_eq!(status(409).error_key(), "upload.error.nameConflict");
        assert_eq!(status(500).error_key(), "upload.error.unknown");
        assert_eq!(status(404).error_key(), "upload.error.unknown");
    }

    #[test]
    fn test_server_localization_key_wins() {
        let err = UploadError::Transport(ApiError::Status {
            status: 409,
            localization_key: Some("upload.error.folderLocked".into()),
        });
        assert_eq!(err.kind(), ErrorKind::NameConflict);
        assert_eq!(err.error_key(), "upload.error.folderLocked");
    }

    #[test]
    fn test_network_and_protocol_errors() {
        let network = UploadError::Transport(ApiError::Network("connection reset".into()));
        assert_eq!(network.error_key(), "upload.error.networkError");

        let decode = UploadError::Transport(ApiError::Decode("bad json".into()));
        assert_eq!(decode.error_key(), "upload.error.unknown");

        let protocol = UploadError::Protocol("maxChunkSize is zero".into());
        assert_eq!(protocol.error_key(), "upload.error.unknown");

        let read = UploadError::Read {
            file: "movie.mkv".into(),
            message: "unexpected end of file".into(),
        };
        assert_eq!(read.kind(), ErrorKind::Unknown);
        assert_eq!(read.error_key(), "upload.error.unknown");
    }

    #[test]
    fn test_quota_error_key() {
        let err = UploadError::QuotaExceeded {
            size: 25,
            used: 80,
            limit: 100,
        };
        assert_eq!(err.error_key(), "upload.error.quotaExceeded");
    }
}
