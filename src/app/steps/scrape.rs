use crate::app::steps::save_and_publish;
use crate::domain::model::{ComicBook, Marker};
use crate::domain::ports::{ComicStep, ComicStore, EventPublisher, MetadataSource};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Applies metadata from a [`MetadataSource`] to comics marked for batch
/// scraping. Comics the source knows nothing about are unmarked unchanged.
pub struct ScrapeStep {
    store: Arc<dyn ComicStore>,
    publisher: Arc<dyn EventPublisher>,
    source: Arc<dyn MetadataSource>,
}

impl ScrapeStep {
    pub fn new(
        store: Arc<dyn ComicStore>,
        publisher: Arc<dyn EventPublisher>,
        source: Arc<dyn MetadataSource>,
    ) -> Self {
        Self {
            store,
            publisher,
            source,
        }
    }
}

#[async_trait]
impl ComicStep for ScrapeStep {
    fn name(&self) -> &str {
        "scrape"
    }

    fn marker(&self) -> Marker {
        Marker::BatchScraping
    }

    async fn read(&self, limit: usize) -> Result<Vec<ComicBook>> {
        self.store.find_marked(Marker::BatchScraping, limit).await
    }

    async fn process(&self, mut comic: ComicBook) -> Result<Option<ComicBook>> {
        match self.source.fetch(&comic).await? {
            Some(metadata) => {
                tracing::debug!("🔎 Scraped metadata for comic {}", comic.id);
                comic.metadata.merge_from(metadata);
                Ok(Some(comic))
            }
            None => {
                tracing::info!("🔎 No metadata found for comic {}", comic.id);
                Ok(None)
            }
        }
    }

    async fn write(&self, chunk: Vec<ComicBook>) -> Result<usize> {
        save_and_publish(
            self.store.as_ref(),
            self.publisher.as_ref(),
            chunk,
            Marker::BatchScraping,
        )
        .await
    }
}
