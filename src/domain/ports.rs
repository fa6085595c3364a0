use crate::domain::model::{ComicBook, ComicEvent, ComicId, ComicMetadata, Marker};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

pub trait Storage: Send + Sync {
    fn resolve(&self, path: &str) -> PathBuf;
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
    fn move_file(
        &self,
        from: &str,
        to: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    /// Resolves to `false` when there was nothing to remove.
    fn remove_file(&self, path: &str) -> impl std::future::Future<Output = Result<bool>> + Send;
}

/// Runtime configuration toggles.
pub trait FeatureFlags: Send + Sync {
    fn is_feature_enabled(&self, name: &str) -> bool;
}

/// 漫畫記錄的持久層
#[async_trait]
pub trait ComicStore: Send + Sync {
    /// Comics carrying `marker`, ordered by id, at most `limit` of them.
    async fn find_marked(&self, marker: Marker, limit: usize) -> Result<Vec<ComicBook>>;
    async fn find(&self, id: ComicId) -> Result<Option<ComicBook>>;
    async fn save(&self, comic: &ComicBook) -> Result<()>;
    /// Returns false when no record with `id` existed.
    async fn delete(&self, id: ComicId) -> Result<bool>;
    async fn all(&self) -> Result<Vec<ComicBook>>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ComicEvent) -> Result<()>;
}

/// 外部的 metadata 來源；`None` 表示查無資料
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, comic: &ComicBook) -> Result<Option<ComicMetadata>>;
}

/// One chunk-oriented batch step: read candidates, process one comic at a
/// time, write the processed chunk.
#[async_trait]
pub trait ComicStep: Send + Sync {
    fn name(&self) -> &str;

    /// The marker selecting this step's candidates; cleared once a comic has
    /// been handled.
    fn marker(&self) -> Marker;

    async fn read(&self, limit: usize) -> Result<Vec<ComicBook>>;

    /// `Ok(None)` skips the comic without writing it.
    async fn process(&self, comic: ComicBook) -> Result<Option<ComicBook>>;

    /// Persists a processed chunk and returns the number of comics written.
    async fn write(&self, chunk: Vec<ComicBook>) -> Result<usize>;
}
