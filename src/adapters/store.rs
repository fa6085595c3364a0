use crate::domain::model::{ComicBook, ComicId, Marker};
use crate::domain::ports::ComicStore;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// 記憶體中的漫畫庫，可從 JSON 匯入並匯出
#[derive(Debug, Default)]
pub struct InMemoryComicStore {
    comics: RwLock<BTreeMap<ComicId, ComicBook>>,
}

impl InMemoryComicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comics(comics: impl IntoIterator<Item = ComicBook>) -> Self {
        Self {
            comics: RwLock::new(comics.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    /// Parses a JSON array of comic records.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let comics: Vec<ComicBook> = serde_json::from_slice(data)?;
        tracing::debug!("Loaded {} comics from library file", comics.len());
        Ok(Self::with_comics(comics))
    }

    pub async fn to_json(&self) -> Result<Vec<u8>> {
        let comics = self.all().await?;
        Ok(serde_json::to_vec_pretty(&comics)?)
    }

    pub async fn len(&self) -> usize {
        self.comics.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.comics.read().await.is_empty()
    }
}

#[async_trait]
impl ComicStore for InMemoryComicStore {
    async fn find_marked(&self, marker: Marker, limit: usize) -> Result<Vec<ComicBook>> {
        let comics = self.comics.read().await;
        Ok(comics
            .values()
            .filter(|comic| comic.is_marked(marker))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find(&self, id: ComicId) -> Result<Option<ComicBook>> {
        Ok(self.comics.read().await.get(&id).cloned())
    }

    async fn save(&self, comic: &ComicBook) -> Result<()> {
        self.comics.write().await.insert(comic.id, comic.clone());
        Ok(())
    }

    async fn delete(&self, id: ComicId) -> Result<bool> {
        Ok(self.comics.write().await.remove(&id).is_some())
    }

    async fn all(&self) -> Result<Vec<ComicBook>> {
        Ok(self.comics.read().await.values().cloned().collect())
    }
}
