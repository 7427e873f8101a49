//! Per-dataset stage configuration files.

use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

use crate::model::{DatasetId, StageKind};
use crate::traits::StageError;

/// A parsed `harvester_config.yaml` or `processing_config.yaml`.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Where the configuration was read from
    pub path: PathBuf,

    /// Top-level keys of the document
    pub values: Mapping,
}

impl StageConfig {
    /// Location of the configuration for `(dataset, stage)`.
    pub fn path_for(datasets_dir: &Path, dataset: &DatasetId, stage: StageKind) -> PathBuf {
        datasets_dir
            .join(dataset.as_str())
            .join(stage.config_file_name())
    }

    /// Reads and parses a stage configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Configuration`] if the file cannot be read, is
    /// not valid YAML, or is not a key-value mapping.
    pub fn load(path: &Path) -> Result<Self, StageError> {
        let contents = std::fs::read_to_string(path).map_err(|e| StageError::Configuration {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let document: Value =
            serde_yaml::from_str(&contents).map_err(|e| StageError::Configuration {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        match document {
            Value::Mapping(values) => Ok(Self {
                path: path.to_path_buf(),
                values,
            }),
            _ => Err(StageError::Configuration {
                path: path.to_path_buf(),
                reason: "expected a key-value mapping at the top level".to_string(),
            }),
        }
    }

    /// Raw stage-type tag, if the configuration declares one.
    pub fn stage_type(&self, stage: StageKind) -> Result<Option<&str>, StageError> {
        match self.values.get(stage.type_key()) {
            None => Ok(None),
            Some(Value::String(tag)) => Ok(Some(tag.as_str())),
            Some(_) => Err(StageError::Configuration {
                path: self.path.clone(),
                reason: format!("'{}' must be a string", stage.type_key()),
            }),
        }
    }

    /// Stage-type tag checked against the stage's allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::UnsupportedStageType`] for a tag outside the
    /// allow-list.
    pub fn validated_type(&self, stage: StageKind) -> Result<Option<&str>, StageError> {
        match self.stage_type(stage)? {
            Some(tag) if !stage.allowed_types().contains(&tag) => {
                Err(StageError::UnsupportedStageType {
                    stage,
                    tag: tag.to_string(),
                })
            }
            other => Ok(other),
        }
    }
}
