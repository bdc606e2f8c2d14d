//! Entry point for submitting files

use std::sync::Arc;

use super::registry::UploadRegistry;
use super::session::{Collaborators, FolderView, NoFolderView, UploadSession};
use super::types::{UploadFile, UploadId};
use super::UploadError;
use crate::api::UploadTransport;
use crate::config::UploadConfig;
use crate::quota::QuotaProvider;

/// Registers files and runs one [`UploadSession`] per file.
///
/// Sessions share nothing but the registry, so any number of
/// [`upload_file`](Self::upload_file) calls may run concurrently.
///
/// ```no_run
/// use std::sync::Arc;
/// use kumo_uploadr::api::ApiClient;
/// use kumo_uploadr::config::Config;
/// use kumo_uploadr::quota::HttpQuotaProvider;
/// use kumo_uploadr::upload::{UploadFile, Uploader};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::for_base_url("https://drive.example.com");
/// let client = Arc::new(ApiClient::new(&config.api)?);
/// let quota = Arc::new(HttpQuotaProvider::new(Arc::clone(&client)));
/// let uploader = Uploader::new(config.upload, client, quota);
///
/// let id = uploader
///     .upload_file(UploadFile::new("notes.txt", "hello"), None)
///     .await?;
/// println!("{:?}", uploader.registry().get(&id));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Uploader {
    settings: Arc<UploadConfig>,
    registry: UploadRegistry,
    collaborators: Collaborators,
}

impl Uploader {
    pub fn new(
        settings: UploadConfig,
        transport: Arc<dyn UploadTransport>,
        quota: Arc<dyn QuotaProvider>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            registry: UploadRegistry::new(),
            collaborators: Collaborators {
                transport,
                quota,
                folder_view: Arc::new(NoFolderView),
            },
        }
    }

    /// Refresh the listing of this view after uploads into the folder it shows
    pub fn with_folder_view(mut self, folder_view: Arc<dyn FolderView>) -> Self {
        self.collaborators.folder_view = folder_view;
        self
    }

    /// Publish items into an existing registry
    pub fn with_registry(mut self, registry: UploadRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &UploadRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &UploadConfig {
        &self.settings
    }

    /// Register `file` as a pending item and build its session without
    /// starting it
    pub fn prepare(&self, file: UploadFile, parent_id: Option<String>) -> UploadSession {
        let id = self.registry.add(&file);
        UploadSession::new(
            id,
            file,
            parent_id,
            Arc::clone(&self.settings),
            self.registry.clone(),
            self.collaborators.clone(),
        )
    }

    /// Upload `file` into folder `parent_id` (`None` = root).
    ///
    /// On failure the item stays in the registry with status `Error` and
    /// its localization key until removed.
    pub async fn upload_file(
        &self,
        file: UploadFile,
        parent_id: Option<String>,
    ) -> Result<UploadId, UploadError> {
        let session = self.prepare(file, parent_id);
        let id = session.id().clone();
        session.run().await?;
        Ok(id)
    }

    /// Drop an item from the registry, whatever its state
    pub fn remove_upload(&self, id: &UploadId) -> bool {
        self.registry.remove(id)
    }
}
