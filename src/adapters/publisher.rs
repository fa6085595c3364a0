use crate::domain::model::ComicEvent;
use crate::domain::ports::EventPublisher;
use crate::utils::error::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Publishes events as structured log lines.
#[derive(Debug, Default, Clone)]
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(&self, event: ComicEvent) -> Result<()> {
        match &event {
            ComicEvent::Updated { id } => tracing::debug!("📣 Comic {} updated", id),
            ComicEvent::Removed { id } => tracing::debug!("📣 Comic {} removed", id),
            ComicEvent::StepFinished { summary } => tracing::info!(
                "📣 Step '{}' finished: {}",
                summary.step,
                serde_json::to_string(summary)?
            ),
        }
        Ok(())
    }
}

/// Keeps every published event in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<ComicEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<ComicEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: ComicEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
