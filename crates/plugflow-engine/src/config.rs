use crate::{FlowError, PlanOrder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Engine settings, usually read from a JSON file. Missing fields fall back
/// to their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default for [`QaWorkflow::abort_on_error`](crate::QaWorkflow).
    pub abort_on_error: bool,
    pub log_check_progress: bool,
    pub report_order: PlanOrder,
    /// Record call graph frames during evaluation.
    pub track_calls: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            abort_on_error: false,
            log_check_progress: true,
            report_order: PlanOrder::RootFirst,
            track_calls: true,
        }
    }
}

impl EngineConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, FlowError> {
        let bytes = fs::read(path).map_err(|error| {
            FlowError::Config(format!(
                "failed reading config file '{}': {}",
                path.display(),
                error
            ))
        })?;
        serde_json::from_slice(&bytes).map_err(|error| {
            FlowError::Config(format!(
                "failed deserializing config file '{}': {}",
                path.display(),
                error
            ))
        })
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), FlowError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes).map_err(|error| {
            FlowError::Config(format!(
                "failed writing config file '{}': {}",
                path.display(),
                error
            ))
        })
    }
}
