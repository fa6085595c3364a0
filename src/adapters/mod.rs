// Adapters layer: concrete implementations of the domain ports.

pub mod flags;
pub mod metadata;
pub mod publisher;
pub mod storage;
pub mod store;

pub use flags::RuntimeFeatureFlags;
pub use metadata::StaticMetadataSource;
pub use publisher::{RecordingPublisher, TracingPublisher};
pub use storage::LocalStorage;
pub use store::InMemoryComicStore;
