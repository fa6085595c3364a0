use crate::core::checkout::{CheckOut, CheckOutRegistry};
use crate::domain::model::{ComicBook, ComicId, Marker, StepSummary};
use crate::domain::ports::{ComicStep, ComicStore};
use crate::utils::error::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerOptions {
    /// 每次讀取的候選數量
    pub chunk_size: usize,
    /// 同時處理的漫畫數量上限
    pub workers: usize,
    pub max_items: Option<usize>,
    /// `None` waits for a check-out as long as it takes.
    pub checkout_timeout: Option<Duration>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            workers: 4,
            max_items: None,
            checkout_timeout: None,
        }
    }
}

enum ItemOutcome {
    /// Processed and still checked out until the chunk is written.
    Processed(ComicBook, CheckOut),
    Skipped,
    Failed,
}

/// Drives one [`ComicStep`] chunk by chunk.
///
/// The candidates of a chunk are checked out one by one in ascending id
/// order before any of them is reloaded and processed, and stay checked out
/// until the chunk has been written, so no other step can change the comic
/// in between.
pub struct StepRunner {
    step: Arc<dyn ComicStep>,
    store: Arc<dyn ComicStore>,
    registry: CheckOutRegistry,
    options: RunnerOptions,
}

impl StepRunner {
    pub fn new(
        step: Arc<dyn ComicStep>,
        store: Arc<dyn ComicStore>,
        registry: CheckOutRegistry,
        options: RunnerOptions,
    ) -> Self {
        Self {
            step,
            store,
            registry,
            options,
        }
    }

    pub async fn run(&self) -> Result<StepSummary> {
        let start_time = Instant::now();
        let name = self.step.name().to_string();
        let mut summary = StepSummary::new(&name);
        let mut deferred: HashSet<ComicId> = HashSet::new();

        tracing::info!("▶️  Step '{}' started", name);

        loop {
            let remaining = self
                .options
                .max_items
                .map(|max| max.saturating_sub(summary.read));
            if remaining == Some(0) {
                tracing::debug!("Step '{}' reached max items", name);
                break;
            }
            let limit = self
                .options
                .chunk_size
                .max(1)
                .min(remaining.unwrap_or(usize::MAX));

            // 逾時的漫畫仍帶有標記，多讀一些再排除
            let candidates: Vec<ComicBook> = self
                .step
                .read(limit + deferred.len())
                .await?
                .into_iter()
                .filter(|comic| !deferred.contains(&comic.id))
                .take(limit)
                .collect();
            if candidates.is_empty() {
                break;
            }
            summary.read += candidates.len();
            tracing::debug!("Step '{}' read {} comics", name, candidates.len());

            // 依 id 遞增順序逐一取得，步驟之間不會互相等待成環
            let mut ids: Vec<ComicId> = candidates.iter().map(|comic| comic.id).collect();
            ids.sort();
            let mut check_outs = Vec::with_capacity(ids.len());
            for id in ids {
                match self.check_out(id).await {
                    Ok(check_out) => check_outs.push(check_out),
                    Err(e) => {
                        tracing::warn!("⏳ Step '{}' skipped comic {}: {}", name, id, e);
                        deferred.insert(id);
                        summary.failed += 1;
                    }
                }
            }

            let workers = self.options.workers.max(1);
            let mut tasks = JoinSet::new();
            let mut outcomes = Vec::new();
            for check_out in check_outs {
                if tasks.len() >= workers {
                    if let Some(joined) = tasks.join_next().await {
                        outcomes.push(joined??);
                    }
                }
                let step = Arc::clone(&self.step);
                let store = Arc::clone(&self.store);
                tasks.spawn(process_one(step, store, check_out));
            }
            while let Some(joined) = tasks.join_next().await {
                outcomes.push(joined??);
            }

            let mut chunk = Vec::new();
            let mut held = Vec::new();
            for outcome in outcomes {
                match outcome {
                    ItemOutcome::Processed(comic, check_out) => {
                        chunk.push(comic);
                        held.push(check_out);
                    }
                    ItemOutcome::Skipped => summary.skipped += 1,
                    ItemOutcome::Failed => summary.failed += 1,
                }
            }

            if !chunk.is_empty() {
                chunk.sort_by_key(|comic| comic.id);
                summary.written += self.step.write(chunk).await?;
            }
            // 寫入完成後才釋放
            drop(held);
        }

        summary.elapsed = start_time.elapsed();
        tracing::info!(
            "⏹️  Step '{}' finished: read {}, written {}, skipped {}, failed {} in {:?}",
            name,
            summary.read,
            summary.written,
            summary.skipped,
            summary.failed,
            summary.elapsed
        );
        Ok(summary)
    }

    /// Timed-out check-outs are left marked for a later run.
    async fn check_out(&self, id: ComicId) -> Result<CheckOut> {
        match self.options.checkout_timeout {
            Some(timeout) => self.registry.check_out_async_timeout(id, timeout).await,
            None => Ok(self.registry.check_out_async(id).await),
        }
    }
}

async fn process_one(
    step: Arc<dyn ComicStep>,
    store: Arc<dyn ComicStore>,
    check_out: CheckOut,
) -> Result<ItemOutcome> {
    let id = check_out.id();

    // 等待期間其他步驟可能已修改或刪除這本漫畫
    let marker = step.marker();
    let comic = match store.find(id).await? {
        Some(comic) if comic.is_marked(marker) => comic,
        _ => {
            tracing::debug!(
                "Comic {} no longer needs step '{}', skipping",
                id,
                step.name()
            );
            return Ok(ItemOutcome::Skipped);
        }
    };

    match step.process(comic.clone()).await {
        Ok(Some(processed)) => Ok(ItemOutcome::Processed(processed, check_out)),
        Ok(None) => {
            clear_marker(store.as_ref(), comic, marker).await?;
            Ok(ItemOutcome::Skipped)
        }
        Err(e) => {
            tracing::warn!("❌ Step '{}' failed on comic {}: {}", step.name(), id, e);
            clear_marker(store.as_ref(), comic, marker).await?;
            Ok(ItemOutcome::Failed)
        }
    }
}

async fn clear_marker(store: &dyn ComicStore, mut comic: ComicBook, marker: Marker) -> Result<()> {
    comic.set_marker(marker, false);
    store.save(&comic).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryComicStore, RuntimeFeatureFlags};
    use crate::core::checkout::EXCLUSIVE_LOCK_FEATURE;
    use crate::utils::error::BatchError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Test step that records what it saw; fails or skips selected ids.
    struct MockStep {
        store: Arc<InMemoryComicStore>,
        fail: HashSet<ComicId>,
        skip: HashSet<ComicId>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        written: Mutex<Vec<ComicId>>,
        registry: CheckOutRegistry,
        held_during_write: Mutex<Vec<bool>>,
    }

    impl MockStep {
        fn new(store: Arc<InMemoryComicStore>, registry: CheckOutRegistry) -> Self {
            Self {
                store,
                fail: HashSet::new(),
                skip: HashSet::new(),
                delay: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                written: Mutex::new(Vec::new()),
                registry,
                held_during_write: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ComicStep for MockStep {
        fn name(&self) -> &str {
            "mock"
        }

        fn marker(&self) -> Marker {
            Marker::BatchScraping
        }

        async fn read(&self, limit: usize) -> Result<Vec<ComicBook>> {
            self.store.find_marked(Marker::BatchScraping, limit).await
        }

        async fn process(&self, mut comic: ComicBook) -> Result<Option<ComicBook>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(&comic.id) {
                return Err(BatchError::ProcessingError {
                    step: "mock".to_string(),
                    id: comic.id,
                    message: "boom".to_string(),
                });
            }
            if self.skip.contains(&comic.id) {
                return Ok(None);
            }
            comic.metadata.title = Some("processed".to_string());
            Ok(Some(comic))
        }

        async fn write(&self, chunk: Vec<ComicBook>) -> Result<usize> {
            let count = chunk.len();
            for mut comic in chunk {
                self.held_during_write
                    .lock()
                    .await
                    .push(self.registry.is_checked_out(comic.id));
                comic.batch_scraping = false;
                self.store.save(&comic).await?;
                self.written.lock().await.push(comic.id);
            }
            Ok(count)
        }
    }

    fn scraping(ids: impl IntoIterator<Item = u64>) -> Arc<InMemoryComicStore> {
        Arc::new(InMemoryComicStore::with_comics(ids.into_iter().map(|id| {
            let mut comic = ComicBook::new(id, format!("{}.cbz", id));
            comic.batch_scraping = true;
            comic
        })))
    }

    fn registry() -> CheckOutRegistry {
        CheckOutRegistry::new(Arc::new(
            RuntimeFeatureFlags::new().with(EXCLUSIVE_LOCK_FEATURE, true),
        ))
    }

    #[tokio::test]
    async fn test_runs_all_chunks_and_holds_check_out_while_writing() {
        let store = scraping(1..=7);
        let registry = registry();
        let step = Arc::new(MockStep::new(store.clone(), registry.clone()));
        let runner = StepRunner::new(
            step.clone(),
            store.clone(),
            registry.clone(),
            RunnerOptions {
                chunk_size: 3,
                ..Default::default()
            },
        );

        let summary = runner.run().await.unwrap();

        assert_eq!(summary.read, 7);
        assert_eq!(summary.written, 7);
        assert_eq!(step.written.lock().await.len(), 7);
        assert!(step.held_during_write.lock().await.iter().all(|held| *held));
        assert!(registry.checked_out().is_empty());
        assert!(store
            .find_marked(Marker::BatchScraping, 100)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failed_and_skipped_comics_are_unmarked() {
        let store = scraping(1..=4);
        let registry = registry();
        let mut step = MockStep::new(store.clone(), registry.clone());
        step.fail.insert(ComicId(2));
        step.skip.insert(ComicId(3));
        let runner = StepRunner::new(
            Arc::new(step),
            store.clone(),
            registry,
            RunnerOptions::default(),
        );

        let summary = runner.run().await.unwrap();

        assert_eq!(summary.written, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        let failed = store.find(ComicId(2)).await.unwrap().unwrap();
        assert!(!failed.batch_scraping);
        assert!(failed.metadata.title.is_none());
    }

    #[tokio::test]
    async fn test_worker_limit_is_respected() {
        let store = scraping(1..=12);
        let registry = registry();
        let mut step = MockStep::new(store.clone(), registry.clone());
        step.delay = Duration::from_millis(10);
        let step = Arc::new(step);
        let runner = StepRunner::new(
            step.clone(),
            store,
            registry,
            RunnerOptions {
                chunk_size: 12,
                workers: 3,
                ..Default::default()
            },
        );

        runner.run().await.unwrap();

        assert!(step.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_max_items_stops_early() {
        let store = scraping(1..=10);
        let registry = registry();
        let runner = StepRunner::new(
            Arc::new(MockStep::new(store.clone(), registry.clone())),
            store.clone(),
            registry,
            RunnerOptions {
                chunk_size: 4,
                max_items: Some(6),
                ..Default::default()
            },
        );

        let summary = runner.run().await.unwrap();

        assert_eq!(summary.read, 6);
        assert_eq!(
            store
                .find_marked(Marker::BatchScraping, 100)
                .await
                .unwrap()
                .len(),
            4
        );
    }

    #[tokio::test]
    async fn test_comic_held_elsewhere_is_deferred_after_timeout() {
        let store = scraping([1, 2]);
        let registry = registry();
        let held = registry.check_out(ComicId(1));
        let runner = StepRunner::new(
            Arc::new(MockStep::new(store.clone(), registry.clone())),
            store.clone(),
            registry.clone(),
            RunnerOptions {
                checkout_timeout: Some(Duration::from_millis(20)),
                ..Default::default()
            },
        );

        let summary = runner.run().await.unwrap();

        assert_eq!(summary.written, 1);
        assert_eq!(summary.failed, 1);
        // 仍保留標記等待下次執行
        assert!(store.find(ComicId(1)).await.unwrap().unwrap().batch_scraping);
        drop(held);
    }

    #[tokio::test]
    async fn test_comic_removed_while_waiting_is_skipped() {
        let store = scraping([5]);
        let registry = registry();
        let held = registry.check_out(ComicId(5));
        let runner = StepRunner::new(
            Arc::new(MockStep::new(store.clone(), registry.clone())),
            store.clone(),
            registry.clone(),
            RunnerOptions::default(),
        );

        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.delete(ComicId(5)).await.unwrap();
        drop(held);

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.read, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.written, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_check_outs_are_taken_in_ascending_order() {
        let store = scraping([5, 4, 3, 2, 1]);
        let registry = registry();
        let held = registry.check_out(ComicId(3));
        let runner = StepRunner::new(
            Arc::new(MockStep::new(store.clone(), registry.clone())),
            store.clone(),
            registry.clone(),
            RunnerOptions {
                chunk_size: 5,
                workers: 5,
                ..Default::default()
            },
        );

        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // 卡在 3，不會先拿 4 與 5
        assert_eq!(
            registry.checked_out(),
            vec![ComicId(1), ComicId(2), ComicId(3)]
        );
        drop(held);

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.written, 5);
        assert!(registry.checked_out().is_empty());
    }
}
