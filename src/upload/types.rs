//! Upload items as seen by the UI, and the files behind them

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::DEFAULT_CONTENT_TYPE;

/// Opaque, locally generated upload identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl UploadId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the bytes of an [`UploadFile`] live
#[derive(Debug, Clone)]
enum FileSource {
    /// Held in memory; ranges are zero-copy slices
    Memory(Bytes),
    /// On disk; ranges are read when a request needs them
    Disk { path: PathBuf, len: u64 },
}

/// A file submitted for upload. Its size is known up front; the payload is
/// only read range by range.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
    source: FileSource,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            last_modified: Utc::now(),
            source: FileSource::Memory(data.into()),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = last_modified;
        self
    }

    /// Open a file on disk, taking its name, size, modification time and a
    /// content type guessed from the extension. Contents are not read here.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let content_type = mime_guess::from_path(path)
            .first()
            .map(|mime| mime.essence_str().to_string());

        Ok(Self {
            name,
            content_type,
            last_modified,
            source: FileSource::Disk {
                path: path.to_path_buf(),
                len: metadata.len(),
            },
        })
    }

    pub fn size(&self) -> u64 {
        match &self.source {
            FileSource::Memory(data) => data.len() as u64,
            FileSource::Disk { len, .. } => *len,
        }
    }

    /// Bytes `[start, end)` of the file. A file that shrank since it was
    /// opened fails with `UnexpectedEof`.
    pub async fn read_range(&self, range: Range<u64>) -> std::io::Result<Bytes> {
        if range.start > range.end || range.end > self.size() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "range {}..{} outside file of {} bytes",
                    range.start,
                    range.end,
                    self.size()
                ),
            ));
        }

        match &self.source {
            FileSource::Memory(data) => Ok(data.slice(range.start as usize..range.end as usize)),
            FileSource::Disk { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(SeekFrom::Start(range.start)).await?;
                let mut buffer = vec![0u8; (range.end - range.start) as usize];
                file.read_exact(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
        }
    }

    /// The whole payload
    pub async fn read_all(&self) -> std::io::Result<Bytes> {
        self.read_range(0..self.size()).await
    }

    pub fn content_type_or_default(&self) -> &str {
        self.content_type
            .as_deref()
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    /// Milliseconds since the Unix epoch
    pub fn last_modified_millis(&self) -> i64 {
        self.last_modified.timestamp_millis()
    }
}

/// Upload lifecycle. Moves forward only; `Error` is reachable from every
/// non-terminal state and nothing leaves `Completed` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Processing,
    Completed,
    Error,
}

impl UploadStatus {
    fn rank(self) -> u8 {
        match self {
            UploadStatus::Pending => 0,
            UploadStatus::Uploading => 1,
            UploadStatus::Processing => 2,
            UploadStatus::Completed => 3,
            UploadStatus::Error => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Error)
    }

    pub fn can_transition_to(self, next: UploadStatus) -> bool {
        if self == next {
            return !self.is_terminal();
        }
        if self.is_terminal() {
            return false;
        }
        next == UploadStatus::Error || next.rank() > self.rank()
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One user-visible upload task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadItem {
    pub id: UploadId,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    /// 0..=100
    pub progress: u8,
    /// Bytes per second; absent until the first measurement window elapses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    pub status: UploadStatus,
    /// Localization key, present iff `status == Error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "sessionID", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_chunks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
}

impl UploadItem {
    pub fn pending(id: UploadId, file: &UploadFile) -> Self {
        Self {
            id,
            name: file.name.clone(),
            size: file.size(),
            content_type: file.content_type_or_default().to_string(),
            progress: 0,
            speed: None,
            status: UploadStatus::Pending,
            error: None,
            session_id: None,
            uploaded_chunks: None,
            total_chunks: None,
        }
    }
}

/// Partial update merged into an [`UploadItem`]; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadPatch {
    pub progress: Option<u8>,
    pub speed: Option<f64>,
    pub status: Option<UploadStatus>,
    pub error: Option<String>,
    pub session_id: Option<String>,
    pub uploaded_chunks: Option<u32>,
    pub total_chunks: Option<u32>,
}

impl UploadPatch {
    pub fn status(status: UploadStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn completed() -> Self {
        Self::status(UploadStatus::Completed).with_progress(100)
    }

    pub fn failed(error_key: impl Into<String>) -> Self {
        Self {
            status: Some(UploadStatus::Error),
            error: Some(error_key.into()),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn with_speed(mut self, speed: Option<f64>) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_status(mut self, status: UploadStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>, total_chunks: u32) -> Self {
        self.session_id = Some(session_id.into());
        self.total_chunks = Some(total_chunks);
        self.uploaded_chunks = Some(0);
        self
    }

    pub fn with_uploaded_chunks(mut self, uploaded: u32) -> Self {
        self.uploaded_chunks = Some(uploaded);
        self
    }
}
