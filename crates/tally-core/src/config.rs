//! Engine configuration
//!
//! Loaded from YAML or built in code; every field has a default.
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tally_model::Status;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Shard count for storage and the context registry
    pub shards: usize,

    /// Keep steps that never received a stop, frozen as interrupted.
    /// When false they are left out of the result.
    pub keep_interrupted_steps: bool,

    /// Status given to a step or fixture stopped without one
    pub default_step_status: Status,

    /// Status given to a test stopped without one; `None` leaves it unknown
    pub default_test_status: Option<Status>,

    /// Fill in `history_id` on stop when the adapter did not
    pub compute_history_id: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shards: 16,
            keep_interrupted_steps: false,
            default_step_status: Status::Passed,
            default_test_status: None,
            compute_history_id: true,
        }
    }
}

impl LifecycleConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.shards = config.shards.max(1);
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards.max(1);
        self
    }

    pub fn keep_interrupted_steps(mut self, keep: bool) -> Self {
        self.keep_interrupted_steps = keep;
        self
    }

    pub fn with_default_test_status(mut self, status: Status) -> Self {
        self.default_test_status = Some(status);
        self
    }
}
