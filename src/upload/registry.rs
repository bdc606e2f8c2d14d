//! Registry of the uploads visible to the UI

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::types::{UploadFile, UploadId, UploadItem, UploadPatch, UploadStatus};
use super::ErrorKind;

/// Shared list of upload items, in submission order.
///
/// Cloning yields another handle to the same list. Items are written only by
/// the session that owns them; anyone may read.
#[derive(Debug, Clone, Default)]
pub struct UploadRegistry {
    items: Arc<RwLock<Vec<UploadItem>>>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending item for `file` and return its id
    pub fn add(&self, file: &UploadFile) -> UploadId {
        let id = UploadId::generate();
        self.items.write().push(UploadItem::pending(id.clone(), file));
        id
    }

    /// Merge `patch` into the item with `id`.
    ///
    /// Returns `false` when nothing was applied: unknown id, or the item is
    /// already terminal. A status that would move backwards is dropped from
    /// the patch while the other fields still apply.
    pub fn update(&self, id: &UploadId, patch: UploadPatch) -> bool {
        let mut items = self.items.write();
        let Some(item) = items.iter_mut().find(|item| &item.id == id) else {
            return false;
        };
        if item.status.is_terminal() {
            tracing::trace!(
                upload.id = %id,
                status = %item.status,
                "Ignoring update of finished upload"
            );
            return false;
        }

        if let Some(progress) = patch.progress {
            item.progress = progress.min(100);
        }
        if patch.speed.is_some() {
            item.speed = patch.speed;
        }
        if patch.session_id.is_some() {
            item.session_id = patch.session_id;
        }
        if patch.total_chunks.is_some() {
            item.total_chunks = patch.total_chunks;
        }
        if patch.uploaded_chunks.is_some() {
            item.uploaded_chunks = patch.uploaded_chunks;
        }

        if let Some(status) = patch.status {
            if item.status.can_transition_to(status) {
                item.status = status;
                if status == UploadStatus::Error {
                    item.error = Some(
                        patch
                            .error
                            .unwrap_or_else(|| ErrorKind::Unknown.key().to_string()),
                    );
                }
            } else {
                tracing::debug!(
                    upload.id = %id,
                    from = %item.status,
                    to = %status,
                    "Dropping backwards status transition"
                );
            }
        }

        true
    }

    /// Remove the item with `id`. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &UploadId) -> bool {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|item| &item.id != id);
        items.len() != before
    }

    /// Remove the item with `id` once `delay` has elapsed
    pub fn schedule_removal(&self, id: UploadId, delay: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if registry.remove(&id) {
                tracing::debug!(upload.id = %id, "Removed finished upload");
            }
        })
    }

    pub fn get(&self, id: &UploadId) -> Option<UploadItem> {
        self.items.read().iter().find(|item| &item.id == id).cloned()
    }

    pub fn snapshot(&self) -> Vec<UploadItem> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> UploadFile {
        UploadFile::new("report.pdf", vec![1u8; 8])
    }

    #[test]
    fn test_add_creates_pending_item() {
        let registry = UploadRegistry::new();
        let id = registry.add(&file());
        let item = registry.get(&id).unwrap();
        assert_eq!(item.status, UploadStatus::Pending);
        assert_eq!(item.progress, 0);
        assert_eq!(item.name, "report.pdf");
        assert!(item.speed.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_merges_fields() {
        let registry = UploadRegistry::new();
        let id = registry.add(&file());
        assert!(registry.update(
            &id,
            UploadPatch::status(UploadStatus::Uploading).with_progress(40)
        ));
        assert!(registry.update(&id, UploadPatch::default().with_speed(Some(1024.0))));

        let item = registry.get(&id).unwrap();
        assert_eq!(item.id, id);
        assert_eq!(item.status, UploadStatus::Uploading);
        assert_eq!(item.progress, 40);
        assert_eq!(item.speed, Some(1024.0));
    }

    #[test]
    fn test_update_keeps_last_speed_when_unset() {
        let registry = UploadRegistry::new();
        let id = registry.add(&file());
        registry.update(&id, UploadPatch::default().with_speed(Some(500.0)));
        registry.update(&id, UploadPatch::default().with_progress(50).with_speed(None));
        assert_eq!(registry.get(&id).unwrap().speed, Some(500.0));
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let registry = UploadRegistry::new();
        registry.add(&file());
        assert!(!registry.update(&UploadId::generate(), UploadPatch::completed()));
    }

    #[test]
    fn test_terminal_items_are_frozen() {
        let registry = UploadRegistry::new();
        let id = registry.add(&file());
        registry.update(&id, UploadPatch::failed("upload.error.unauthorized"));
        assert!(!registry.update(&id, UploadPatch::default().with_progress(70)));
        assert!(!registry.update(&id, UploadPatch::completed()));

        let item = registry.get(&id).unwrap();
        assert_eq!(item.status, UploadStatus::Error);
        assert_eq!(item.error.as_deref(), Some("upload.error.unauthorized"));
        assert_eq!(item.progress, 0);
    }

    #[test]
    fn test_backwards_status_dropped() {
        let registry = UploadRegistry::new();
        let id = registry.add(&file());
        registry.update(&id, UploadPatch::status(UploadStatus::Processing));
        registry.update(
            &id,
            UploadPatch::status(UploadStatus::Uploading).with_uploaded_chunks(3),
        );
        let item = registry.get(&id).unwrap();
        assert_eq!(item.status, UploadStatus::Processing);
        assert_eq!(item.uploaded_chunks, Some(3));
    }

    #[test]
    fn test_error_without_key_defaults_to_unknown() {
        let registry = UploadRegistry::new();
        let id = registry.add(&file());
        registry.update(&id, UploadPatch::status(UploadStatus::Error));
        assert_eq!(
            registry.get(&id).unwrap().error.as_deref(),
            Some("upload.error.unknown")
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = UploadRegistry::new();
        let keep = registry.add(&file());
        let id = registry.add(&file());

        assert!(registry.remove(&id));
        let after_first = registry.snapshot();
        assert!(!registry.remove(&id));
        assert_eq!(registry.snapshot(), after_first);
        assert!(registry.get(&keep).is_some());
    }

    #[test]
    fn test_snapshot_preserves_submission_order() {
        let registry = UploadRegistry::new();
        let ids: Vec<_> = (0..3).map(|_| registry.add(&file())).collect();
        let snapshot: Vec<_> = registry.snapshot().into_iter().map(|i| i.id).collect();
        assert_eq!(snapshot, ids);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_removal_after_delay() {
        let registry = UploadRegistry::new();
        let id = registry.add(&file());
        let handle = registry.schedule_removal(id.clone(), Duration::from_secs(3));

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(registry.get(&id).is_some());

        handle.await.unwrap();
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }
}
