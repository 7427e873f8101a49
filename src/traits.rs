use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::log_store::{Level, LogRecord, LogStore};
use crate::model::{DatasetId, StageKind};

/// Error type returned by plugin bodies.
pub type PluginError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from resolving or invoking one stage for one dataset.
#[derive(Error, Debug)]
pub enum StageError {
    /// Stage configuration is missing or malformed
    #[error("Invalid configuration '{}': {reason}", .path.display())]
    Configuration { path: PathBuf, reason: String },

    /// Configuration selects a plugin type outside the allow-list
    #[error("{tag} is not a supported {stage} type")]
    UnsupportedStageType { stage: StageKind, tag: String },

    /// No plugin registered under the requested name on the search path
    #[error("No {stage} plugin named '{name}' in {searched:?}")]
    PluginNotFound {
        stage: StageKind,
        name: String,
        searched: Vec<String>,
    },

    /// The plugin ran and failed
    #[error("{0}")]
    Execution(String),
}

/// A harvester or processor implementation.
///
/// Plugins receive the path of their stage configuration and the output
/// directory. They return normally on success and an error describing the
/// failure otherwise. Anything they want reported per dataset goes through
/// the [`StageLog`] handle.
pub trait StagePlugin: Send + Sync {
    /// Name the plugin is registered under (e.g. `"podaac"`).
    fn name(&self) -> &str;

    fn execute(&self, config_path: &Path, output_path: &Path, log: &StageLog)
        -> Result<(), PluginError>;
}

/// Record sink handed to plugins, scoped to one dataset and stage.
#[derive(Clone)]
pub struct StageLog {
    store: Arc<dyn LogStore>,
    dataset: DatasetId,
    stage: StageKind,
}

impl StageLog {
    pub fn new(store: Arc<dyn LogStore>, dataset: DatasetId, stage: StageKind) -> Self {
        Self {
            store,
            dataset,
            stage,
        }
    }

    pub fn dataset(&self) -> &DatasetId {
        &self.dataset
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(Level::Info, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(Level::Error, message.into());
    }

    /// Appends a record. Store failures are logged, not raised.
    pub fn record(&self, level: Level, message: String) {
        let record = LogRecord::for_stage(&self.dataset, self.stage, level, message);
        if let Err(e) = self.store.append(record) {
            warn!(dataset = %self.dataset, stage = %self.stage, error = %e, "Failed to append record");
        }
    }
}

impl std::fmt::Debug for StageLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageLog")
            .field("dataset", &self.dataset)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_store::MemoryStore;

    #[test]
    fn test_stage_log_attributes_records() {
        let store = Arc::new(MemoryStore::new());
        let log = StageLog::new(store.clone(), DatasetId::from("gmsl"), StageKind::Process);
        log.error("missing variable 'sla'");
        log.info("wrote 12 granules");

        let records = store.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "pipeline.gmsl.processing");
        assert_eq!(records[0].level, Level::Error);
        assert_eq!(records[1].level, Level::Info);
    }

    #[test]
    fn test_stage_error_messages() {
        let err = StageError::UnsupportedStageType {
            stage: StageKind::Harvest,
            tag: "ftp".to_string(),
        };
        assert_eq!(err.to_string(), "ftp is not a supported harvester type");

        let err = StageError::Execution("granule download refused".to_string());
        assert_eq!(err.to_string(), "granule download refused");
    }
}
