//! Upload session
//!
//! One session drives one file to the storage API and owns its registry
//! item from `Pending` to a terminal state.
//!
//! # Flow
//!
//! ```text
//! quota check ──▶ size < threshold ──▶ PUT /api/files ──────────────────────┐
//!             └─▶ size ≥ threshold ──▶ initiate ─▶ parts (bounded, retried) │
//!                                       │           ─▶ complete ────────────┤
//!                                       └─ on failure: abort                ▼
//!                                                      Completed / Error
//! ```

use async_trait::async_trait;
use futures::FutureExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use super::limiter::ConcurrencyLimiter;
use super::plan::{plan_chunks, ChunkRange};
use super::progress::{ProgressAggregator, ProgressSink, TransferSink, TransferThrottle};
use super::registry::UploadRegistry;
use super::retry::RetryPolicy;
use super::types::{UploadFile, UploadId, UploadPatch, UploadStatus};
use super::UploadError;
use crate::api::{
    FileMetadata, InitiateRequest, ProgressCallback, SessionCredentials, UploadPart,
    UploadTransport,
};
use crate::config::UploadConfig;
use crate::metrics;
use crate::quota::QuotaProvider;

/// How a file travels to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// One streamed `PUT`
    Single,
    /// Multipart session
    Chunked,
}

impl UploadMode {
    /// `Chunked` for files of at least `threshold` bytes
    pub fn for_size(size: u64, threshold: u64) -> Self {
        if size >= threshold {
            UploadMode::Chunked
        } else {
            UploadMode::Single
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadMode::Single => "single",
            UploadMode::Chunked => "chunked",
        }
    }
}

/// The folder listing the user is looking at
#[async_trait]
pub trait FolderView: Send + Sync {
    /// Whether the listing of `parent_id` (`None` = root) is on screen
    fn is_viewing(&self, parent_id: Option<&str>) -> bool;

    /// Reload the listing of `parent_id`
    async fn refresh_listing(&self, parent_id: Option<String>);
}

/// A view that never shows any folder
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFolderView;

#[async_trait]
impl FolderView for NoFolderView {
    fn is_viewing(&self, _parent_id: Option<&str>) -> bool {
        false
    }

    async fn refresh_listing(&self, _parent_id: Option<String>) {}
}

/// Services a session talks to
#[derive(Clone)]
pub(crate) struct Collaborators {
    pub transport: Arc<dyn UploadTransport>,
    pub quota: Arc<dyn QuotaProvider>,
    pub folder_view: Arc<dyn FolderView>,
}

/// A single file upload, created by [`Uploader::prepare`](super::Uploader::prepare)
pub struct UploadSession {
    id: UploadId,
    file: UploadFile,
    parent_id: Option<String>,
    settings: Arc<UploadConfig>,
    registry: UploadRegistry,
    collaborators: Collaborators,
}

impl UploadSession {
    pub(crate) fn new(
        id: UploadId,
        file: UploadFile,
        parent_id: Option<String>,
        settings: Arc<UploadConfig>,
        registry: UploadRegistry,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            id,
            file,
            parent_id,
            settings,
            registry,
            collaborators,
        }
    }

    pub fn id(&self) -> &UploadId {
        &self.id
    }

    pub fn mode(&self) -> UploadMode {
        UploadMode::for_size(self.file.size(), self.settings.chunked_threshold)
    }

    /// Upload the file, leaving the registry item `Completed` or `Error`.
    #[tracing::instrument(
        name = "upload.session",
        skip(self),
        fields(
            upload.id = %self.id,
            file.name = %self.file.name,
            file.size = self.file.size(),
            upload.mode = self.mode().as_str()
        )
    )]
    pub async fn run(self) -> Result<(), UploadError> {
        let mode = self.mode();
        let started = Instant::now();
        tracing::info!(mode = mode.as_str(), "Starting upload");

        let result = match self.check_quota() {
            Ok(()) => match mode {
                UploadMode::Single => self.run_single().await,
                UploadMode::Chunked => self.run_chunked().await,
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.registry.update(&self.id, UploadPatch::completed());
                self.registry
                    .schedule_removal(self.id.clone(), self.settings.auto_remove_delay());
                metrics::record_upload_success(
                    mode.as_str(),
                    self.file.size(),
                    elapsed.as_secs_f64(),
                );
                tracing::info!(duration_ms = elapsed.as_millis() as u64, "Upload completed");
                self.after_success();
                Ok(())
            }
            Err(err) => {
                let key = err.error_key();
                tracing::warn!(error = %err, error_key = %key, "Upload failed");
                self.registry.update(&self.id, UploadPatch::failed(key));
                metrics::record_upload_failure(mode.as_str(), err.kind().label());
                Err(err)
            }
        }
    }

    fn check_quota(&self) -> Result<(), UploadError> {
        let quota = self.collaborators.quota.snapshot();
        let size = self.file.size();
        if quota.allows(size) {
            Ok(())
        } else {
            Err(UploadError::QuotaExceeded {
                size,
                used: quota.used,
                limit: quota.limit,
            })
        }
    }

    async fn run_single(&self) -> Result<(), UploadError> {
        self.registry
            .update(&self.id, UploadPatch::status(UploadStatus::Uploading));

        let registry = self.registry.clone();
        let id = self.id.clone();
        let sink: TransferSink = Arc::new(move |sample| {
            let mut patch = UploadPatch::default().with_speed(sample.speed);
            if let Some(progress) = sample.progress {
                let status = if progress >= 100 {
                    UploadStatus::Processing
                } else {
                    UploadStatus::Uploading
                };
                patch = patch.with_progress(progress).with_status(status);
            }
            registry.update(&id, patch);
        });
        let throttle = Arc::new(TransferThrottle::new(
            self.file.size(),
            self.settings.single_progress_throttle(),
            self.settings.speed_window(),
            sink,
        ));
        let on_progress: ProgressCallback = Arc::new(move |loaded| throttle.record(loaded));

        let metadata = FileMetadata {
            parent_id: self.parent_id.clone(),
            filename: self.file.name.clone(),
            content_type: self.file.content_type_or_default().to_string(),
            last_modified: self.file.last_modified_millis(),
        };
        let body = self.file.read_all().await.map_err(|e| self.read_error(e))?;
        self.collaborators
            .transport
            .put_file(&metadata, body, on_progress)
            .await?;
        Ok(())
    }

    async fn run_chunked(&self) -> Result<(), UploadError> {
        let request = InitiateRequest {
            filename: self.file.name.clone(),
            content_type: self.file.content_type_or_default().to_string(),
            total_size: self.file.size(),
            parent_id: self.parent_id.clone(),
            last_modified: self.file.last_modified_millis(),
        };
        let session = self
            .collaborators
            .transport
            .initiate_multipart(&request)
            .await?;
        let credentials = session.credentials();

        match self.upload_parts(&credentials, session.max_chunk_size).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.abort(&credentials.session_id).await;
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        credentials: &SessionCredentials,
        max_chunk_size: u64,
    ) -> Result<(), UploadError> {
        if max_chunk_size == 0 {
            return Err(UploadError::Protocol(
                "server returned a zero maxChunkSize".into(),
            ));
        }

        let plan = plan_chunks(self.file.size(), max_chunk_size);
        let total_chunks = u32::try_from(plan.len())
            .map_err(|_| UploadError::Protocol(format!("too many parts: {}", plan.len())))?;
        tracing::info!(
            session_id = %credentials.session_id,
            total_chunks,
            max_chunk_size,
            "Uploading parts"
        );
        self.registry.update(
            &self.id,
            UploadPatch::status(UploadStatus::Uploading)
                .with_session(credentials.session_id.as_str(), total_chunks),
        );

        let registry = self.registry.clone();
        let id = self.id.clone();
        let sink: ProgressSink = Arc::new(move |update| {
            registry.update(
                &id,
                UploadPatch::default()
                    .with_progress(update.progress)
                    .with_speed(update.speed),
            );
        });
        let aggregator = Arc::new(ProgressAggregator::new(
            self.file.size(),
            plan.len(),
            self.settings.chunked_progress_throttle(),
            sink,
        ));

        let retry = RetryPolicy::new(self.settings.max_retries, self.settings.retry_base_delay());
        let limiter = ConcurrencyLimiter::new(self.settings.max_concurrent_chunks);
        let uploaded = AtomicU32::new(0);

        let retry = &retry;
        let aggregator = &aggregator;
        let uploaded = &uploaded;
        let tasks = plan.iter().map(|&chunk| {
            move || {
                self.upload_chunk(credentials, chunk, retry, aggregator, uploaded)
                    .boxed()
            }
        });
        let mut parts = limiter.run(tasks).await?;

        self.registry
            .update(&self.id, UploadPatch::status(UploadStatus::Processing));
        parts.sort_by_key(|part| part.part_number);
        self.collaborators
            .transport
            .complete_multipart(credentials, &parts)
            .await?;

        metrics::record_multipart_parts(parts.len());
        Ok(())
    }

    async fn upload_chunk(
        &self,
        credentials: &SessionCredentials,
        chunk: ChunkRange,
        retry: &RetryPolicy,
        aggregator: &Arc<ProgressAggregator>,
        uploaded: &AtomicU32,
    ) -> Result<UploadPart, UploadError> {
        let index = chunk.index;
        let data = self
            .file
            .read_range(chunk.as_range())
            .await
            .map_err(|e| self.read_error(e))?;

        let part = retry
            .run_notify(
                || {
                    let aggregator = Arc::clone(aggregator);
                    let on_progress: ProgressCallback = Arc::new(move |loaded| {
                        aggregator.record_chunk_progress(index, loaded)
                    });
                    self.collaborators.transport.upload_part(
                        credentials,
                        chunk.part_number,
                        data.clone(),
                        on_progress,
                    )
                },
                |err, failures, delay| {
                    tracing::warn!(
                        part_number = chunk.part_number,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Part upload failed, retrying"
                    );
                    metrics::record_chunk_retry();
                    aggregator.record_chunk_progress(index, 0);
                },
            )
            .await?;

        let done = uploaded.fetch_add(1, Ordering::SeqCst) + 1;
        self.registry
            .update(&self.id, UploadPatch::default().with_uploaded_chunks(done));
        Ok(part)
    }

    /// Best effort; the failure that caused the abort is what gets reported
    async fn abort(&self, session_id: &str) {
        metrics::record_multipart_abort();
        match self.collaborators.transport.abort_multipart(session_id).await {
            Ok(()) => tracing::warn!(session_id, "Multipart session aborted"),
            Err(e) => tracing::warn!(session_id, error = %e, "Failed to abort multipart session"),
        }
    }

    fn read_error(&self, err: std::io::Error) -> UploadError {
        UploadError::Read {
            file: self.file.name.clone(),
            message: err.to_string(),
        }
    }

    /// Quota and listing refreshes run detached; neither can delay or fail
    /// a completed upload.
    fn after_success(&self) {
        let quota = Arc::clone(&self.collaborators.quota);
        tokio::spawn(
            async move {
                if let Err(e) = quota.refresh().await {
                    tracing::warn!(error = %e, "Failed to refresh quota");
                }
            }
            .in_current_span(),
        );

        if self
            .collaborators
            .folder_view
            .is_viewing(self.parent_id.as_deref())
        {
            let folder_view = Arc::clone(&self.collaborators.folder_view);
            let parent_id = self.parent_id.clone();
            tokio::spawn(async move { folder_view.refresh_listing(parent_id).await });
        }
    }
}
