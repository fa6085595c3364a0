use crate::app::steps::announce;
use crate::domain::model::{ComicBook, ComicEvent, Marker};
use crate::domain::ports::{ComicStep, ComicStore, EventPublisher, Storage};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Removes comics marked for deletion, and optionally their archives.
pub struct PurgeStep<S: Storage> {
    store: Arc<dyn ComicStore>,
    publisher: Arc<dyn EventPublisher>,
    storage: S,
    delete_files: bool,
}

impl<S: Storage> PurgeStep<S> {
    pub fn new(
        store: Arc<dyn ComicStore>,
        publisher: Arc<dyn EventPublisher>,
        storage: S,
        delete_files: bool,
    ) -> Self {
        Self {
            store,
            publisher,
            storage,
            delete_files,
        }
    }
}

#[async_trait]
impl<S: Storage + 'static> ComicStep for PurgeStep<S> {
    fn name(&self) -> &str {
        "purge"
    }

    fn marker(&self) -> Marker {
        Marker::Purging
    }

    async fn read(&self, limit: usize) -> Result<Vec<ComicBook>> {
        self.store.find_marked(Marker::Purging, limit).await
    }

    async fn process(&self, comic: ComicBook) -> Result<Option<ComicBook>> {
        if self.delete_files {
            if self.storage.remove_file(&comic.filename).await? {
                tracing::info!("🗑️  Deleted archive {} of comic {}", comic.filename, comic.id);
            } else {
                tracing::debug!("Archive {} of comic {} already gone", comic.filename, comic.id);
            }
        }
        Ok(Some(comic))
    }

    async fn write(&self, chunk: Vec<ComicBook>) -> Result<usize> {
        let mut removed = 0;
        for comic in chunk {
            if self.store.delete(comic.id).await? {
                announce(self.publisher.as_ref(), ComicEvent::Removed { id: comic.id }).await;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
