pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::CliArgs;

pub use adapters::{InMemoryComicStore, LocalStorage, RuntimeFeatureFlags};
pub use config::BatchConfig;
pub use crate::core::{
    checkout::{CheckOut, CheckOutRegistry, EXCLUSIVE_LOCK_FEATURE},
    engine::BatchEngine,
    step::{RunnerOptions, StepRunner},
};
pub use domain::model::{ComicBook, ComicId};
pub use utils::error::{BatchError, Result};
