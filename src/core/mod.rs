pub mod checkout;
pub mod engine;
pub mod step;

pub use crate::domain::model::{ComicBook, ComicId, StepSummary};
pub use crate::domain::ports::{ComicStep, ComicStore, EventPublisher, FeatureFlags, Storage};
pub use crate::utils::error::Result;
