pub mod organize;
pub mod purge;
pub mod scrape;

pub use organize::OrganizeStep;
pub use purge::PurgeStep;
pub use scrape::ScrapeStep;

use crate::domain::model::{ComicBook, ComicEvent, Marker};
use crate::domain::ports::{ComicStore, EventPublisher};
use crate::utils::error::Result;

/// Clears `marker`, saves each comic and announces the update.
pub(crate) async fn save_and_publish(
    store: &dyn ComicStore,
    publisher: &dyn EventPublisher,
    chunk: Vec<ComicBook>,
    marker: Marker,
) -> Result<usize> {
    let mut written = 0;
    for comic in chunk {
        save_one(store, publisher, comic, marker).await?;
        written += 1;
    }
    Ok(written)
}

/// The record is saved first; a failed announcement is only logged.
pub(crate) async fn save_one(
    store: &dyn ComicStore,
    publisher: &dyn EventPublisher,
    mut comic: ComicBook,
    marker: Marker,
) -> Result<()> {
    comic.set_marker(marker, false);
    comic.touch();
    store.save(&comic).await?;
    announce(publisher, ComicEvent::Updated { id: comic.id }).await;
    Ok(())
}

pub(crate) async fn announce(publisher: &dyn EventPublisher, event: ComicEvent) {
    if let Err(e) = publisher.publish(event.clone()).await {
        tracing::warn!("⚠️  Could not publish {:?}: {}", event, e);
    }
}
