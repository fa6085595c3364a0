use crate::core::checkout::CheckOutRegistry;
use crate::core::step::{RunnerOptions, StepRunner};
use crate::domain::model::{ComicEvent, StepSummary};
use crate::domain::ports::{ComicStep, ComicStore, EventPublisher};
use crate::utils::error::{BatchError, Result};
use crate::utils::monitor::SystemMonitor;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Runs every registered batch step at the same time. The steps share one
/// [`CheckOutRegistry`], so two steps never work on the same comic at once.
pub struct BatchEngine {
    steps: Vec<Arc<dyn ComicStep>>,
    store: Arc<dyn ComicStore>,
    publisher: Arc<dyn EventPublisher>,
    registry: CheckOutRegistry,
    options: RunnerOptions,
    monitor: SystemMonitor,
}

impl BatchEngine {
    pub fn new(
        store: Arc<dyn ComicStore>,
        publisher: Arc<dyn EventPublisher>,
        registry: CheckOutRegistry,
        options: RunnerOptions,
    ) -> Self {
        Self::new_with_monitoring(store, publisher, registry, options, false)
    }

    pub fn new_with_monitoring(
        store: Arc<dyn ComicStore>,
        publisher: Arc<dyn EventPublisher>,
        registry: CheckOutRegistry,
        options: RunnerOptions,
        monitor_enabled: bool,
    ) -> Self {
        Self {
            steps: Vec::new(),
            store,
            publisher,
            registry,
            options,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub fn add_step(&mut self, step: Arc<dyn ComicStep>) {
        self.steps.push(step);
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|step| step.name().to_string()).collect()
    }

    pub fn registry(&self) -> &CheckOutRegistry {
        &self.registry
    }

    /// Runs all steps to completion and returns their summaries in the order
    /// the steps were added. If any step fails, the others still finish and
    /// the first failure is returned.
    pub async fn run(&self) -> Result<Vec<StepSummary>> {
        tracing::info!("Starting batch with {} steps", self.steps.len());
        self.monitor.log_start(self.steps.len());

        let mut tasks = JoinSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            let runner = StepRunner::new(
                Arc::clone(step),
                Arc::clone(&self.store),
                self.registry.clone(),
                self.options.clone(),
            );
            tasks.spawn(async move { (index, runner.run().await) });
        }

        let mut summaries: Vec<(usize, StepSummary)> = Vec::new();
        let mut first_error: Option<BatchError> = None;
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    tracing::error!("❌ Batch step task failed: {}", e);
                    first_error.get_or_insert(e.into());
                    continue;
                }
            };

            match result {
                Ok(summary) => {
                    self.monitor.log_step(&summary);
                    let event = ComicEvent::StepFinished {
                        summary: summary.clone(),
                    };
                    if let Err(e) = self.publisher.publish(event).await {
                        tracing::warn!("Could not publish summary of '{}': {}", summary.step, e);
                    }
                    summaries.push((index, summary));
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Step '{}' aborted: {}",
                        self.steps[index].name(),
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        self.monitor.log_finish();

        if let Some(e) = first_error {
            return Err(e);
        }
        summaries.sort_by_key(|(index, _)| *index);
        Ok(summaries.into_iter().map(|(_, summary)| summary).collect())
    }
}
