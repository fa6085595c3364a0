use crate::domain::ports::FeatureFlags;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Feature flags seeded from configuration that can be flipped while batch
/// steps are running. Unknown flags are disabled.
#[derive(Debug, Default)]
pub struct RuntimeFeatureFlags {
    flags: RwLock<HashMap<String, bool>>,
}

impl RuntimeFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, enabled: bool) -> Self {
        self.set(name, enabled);
        self
    }

    pub fn set(&self, name: &str, enabled: bool) {
        tracing::debug!("Feature '{}' set to {}", name, enabled);
        self.flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), enabled);
    }
}

impl FeatureFlags for RuntimeFeatureFlags {
    fn is_feature_enabled(&self, name: &str) -> bool {
        self.flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(false)
    }
}
