use crate::domain::model::{ComicBook, ComicId, ComicMetadata};
use crate::domain::ports::MetadataSource;
use crate::utils::error::{BatchError, Result};
use async_trait::async_trait;
use std::collections::HashMap;

/// Metadata looked up from a prepared table keyed by comic id.
#[derive(Debug, Default, Clone)]
pub struct StaticMetadataSource {
    entries: HashMap<ComicId, ComicMetadata>,
}

impl StaticMetadataSource {
    pub fn new(entries: HashMap<ComicId, ComicMetadata>) -> Self {
        Self { entries }
    }

    /// 解析 `{"<id>": {...metadata...}}` 格式的 JSON
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let raw: HashMap<String, ComicMetadata> = serde_json::from_slice(data)?;
        let mut entries = HashMap::with_capacity(raw.len());
        for (key, metadata) in raw {
            let id = key.parse::<u64>().map_err(|e| BatchError::MetadataError {
                message: format!("invalid comic id '{}': {}", key, e),
            })?;
            entries.insert(ComicId(id), metadata);
        }
        Ok(Self { entries })
    }
}

#[async_trait]
impl MetadataSource for StaticMetadataSource {
    async fn fetch(&self, comic: &ComicBook) -> Result<Option<ComicMetadata>> {
        Ok(self.entries.get(&comic.id).cloned())
    }
}
