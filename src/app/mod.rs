pub mod steps;

use crate::adapters::{LocalStorage, StaticMetadataSource};
use crate::config::BatchConfig;
use crate::domain::ports::{ComicStep, ComicStore, EventPublisher, MetadataSource, Storage};
use crate::utils::error::{BatchError, Result};
use std::sync::Arc;
use steps::{OrganizeStep, PurgeStep, ScrapeStep};

/// Builds the enabled steps in execution-report order: organize, purge, scrape.
pub async fn build_steps(
    config: &BatchConfig,
    store: Arc<dyn ComicStore>,
    publisher: Arc<dyn EventPublisher>,
    storage: LocalStorage,
) -> Result<Vec<Arc<dyn ComicStep>>> {
    let mut steps: Vec<Arc<dyn ComicStep>> = Vec::new();

    if config.organize.enabled {
        let target_directory = config.organize.target_directory.clone().ok_or_else(|| {
            BatchError::MissingConfigError {
                field: "organize.target_directory".to_string(),
            }
        })?;
        steps.push(Arc::new(OrganizeStep::new(
            Arc::clone(&store),
            Arc::clone(&publisher),
            storage.clone(),
            target_directory,
            config.rename_rule(),
        )));
    }

    if config.purge.enabled {
        steps.push(Arc::new(PurgeStep::new(
            Arc::clone(&store),
            Arc::clone(&publisher),
            storage.clone(),
            config.purge.delete_files,
        )));
    }

    if config.scrape.enabled {
        let metadata_file = config.scrape.metadata_file.as_deref().ok_or_else(|| {
            BatchError::MissingConfigError {
                field: "scrape.metadata_file".to_string(),
            }
        })?;
        let data = storage.read_file(metadata_file).await?;
        let source: Arc<dyn MetadataSource> = Arc::new(StaticMetadataSource::from_json(&data)?);
        steps.push(Arc::new(ScrapeStep::new(store, publisher, source)));
    }

    Ok(steps)
}
