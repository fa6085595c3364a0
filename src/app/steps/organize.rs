use crate::app::steps::save_one;
use crate::domain::model::{ComicBook, ComicId, Marker};
use crate::domain::naming::RenameRule;
use crate::domain::ports::{ComicStep, ComicStore, EventPublisher, Storage};
use crate::utils::error::{BatchError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

const STEP_NAME: &str = "organize";

/// Moves comics marked for organizing to the path their rename rule gives.
pub struct OrganizeStep<S: Storage> {
    store: Arc<dyn ComicStore>,
    publisher: Arc<dyn EventPublisher>,
    storage: S,
    target_directory: String,
    rule: RenameRule,
    // 不同漫畫可能算出相同檔名，搬移完成前先保留
    reserved: Mutex<HashSet<String>>,
    // 已搬移但尚未寫入記錄的原始路徑，寫入失敗時搬回
    origins: Mutex<HashMap<ComicId, String>>,
}

impl<S: Storage> OrganizeStep<S> {
    pub fn new(
        store: Arc<dyn ComicStore>,
        publisher: Arc<dyn EventPublisher>,
        storage: S,
        target_directory: String,
        rule: RenameRule,
    ) -> Self {
        Self {
            store,
            publisher,
            storage,
            target_directory,
            rule,
            reserved: Mutex::new(HashSet::new()),
            origins: Mutex::new(HashMap::new()),
        }
    }

    fn failure(&self, comic: &ComicBook, message: String) -> BatchError {
        BatchError::ProcessingError {
            step: STEP_NAME.to_string(),
            id: comic.id,
            message,
        }
    }

    /// Target path without the collision suffix, and the extension to use.
    fn target_base(&self, comic: &ComicBook) -> Result<(String, String)> {
        let source = Path::new(&comic.filename);
        let extension = match comic.archive_type() {
            Some(archive_type) => archive_type.extension().to_string(),
            None => source
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase)
                .ok_or_else(|| self.failure(comic, "archive has no extension".to_string()))?,
        };

        let relative = match self.rule.render(comic) {
            Some(rendered) if !rendered.is_empty() => rendered,
            _ => source
                .file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string)
                .ok_or_else(|| self.failure(comic, "archive has no file name".to_string()))?,
        };

        let base = Path::new(&self.target_directory).join(relative);
        Ok((base.to_string_lossy().into_owned(), extension))
    }

    /// Picks a free target name and reserves it. The comic's own file counts
    /// as free.
    async fn reserve_target(&self, base: &str, extension: &str, current: &str) -> String {
        let current = self.storage.resolve(current);
        let mut reserved = self.reserved.lock().await;
        let mut candidate = format!("{}.{}", base, extension);
        let mut attempt = 1;
        while self.storage.resolve(&candidate) != current
            && (reserved.contains(&candidate) || self.storage.exists(&candidate).await)
        {
            candidate = format!("{} ({}).{}", base, attempt, extension);
            attempt += 1;
        }
        reserved.insert(candidate.clone());
        candidate
    }

    /// Moves archives whose records could not be written back to where they
    /// came from.
    async fn roll_back(&self, unwritten: impl Iterator<Item = ComicBook>) {
        let mut origins = self.origins.lock().await;
        for comic in unwritten {
            let Some(original) = origins.remove(&comic.id) else {
                continue;
            };
            match self.storage.move_file(&comic.filename, &original).await {
                Ok(()) => tracing::warn!("↩️  Moved comic {} back to {}", comic.id, original),
                Err(e) => tracing::error!(
                    "❌ Could not move comic {} back to {}: {}",
                    comic.id,
                    original,
                    e
                ),
            }
        }
    }
}

#[async_trait]
impl<S: Storage + 'static> ComicStep for OrganizeStep<S> {
    fn name(&self) -> &str {
        STEP_NAME
    }

    fn marker(&self) -> Marker {
        Marker::Organizing
    }

    async fn read(&self, limit: usize) -> Result<Vec<ComicBook>> {
        self.store.find_marked(Marker::Organizing, limit).await
    }

    async fn process(&self, mut comic: ComicBook) -> Result<Option<ComicBook>> {
        let (base, extension) = self.target_base(&comic)?;

        if !self.storage.exists(&comic.filename).await {
            return Err(self.failure(&comic, format!("archive {} is missing", comic.filename)));
        }

        let target = self.reserve_target(&base, &extension, &comic.filename).await;
        if self.storage.resolve(&target) == self.storage.resolve(&comic.filename) {
            self.reserved.lock().await.remove(&target);
            tracing::debug!("Comic {} is already organized", comic.id);
            return Ok(Some(comic));
        }

        let moved = self.storage.move_file(&comic.filename, &target).await;
        self.reserved.lock().await.remove(&target);
        moved?;

        tracing::info!("📦 Moved comic {}: {} -> {}", comic.id, comic.filename, target);
        let original = std::mem::replace(&mut comic.filename, target);
        self.origins.lock().await.insert(comic.id, original);
        Ok(Some(comic))
    }

    async fn write(&self, chunk: Vec<ComicBook>) -> Result<usize> {
        let mut written = 0;
        let mut pending = chunk.into_iter();
        while let Some(comic) = pending.next() {
            let id = comic.id;
            let unwritten = comic.clone();
            if let Err(e) = save_one(
                self.store.as_ref(),
                self.publisher.as_ref(),
                comic,
                Marker::Organizing,
            )
            .await
            {
                self.roll_back(std::iter::once(unwritten).chain(pending)).await;
                return Err(e);
            }
            self.origins.lock().await.remove(&id);
            written += 1;
        }
        Ok(written)
    }
}
