//! Run-wide settings: directory layout and index location.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SOLR_HOST: &str = "http://localhost:8983/solr/";
pub const DEFAULT_SOLR_COLLECTION: &str = "sli_dev";
pub const DEFAULT_INDEX_ROWS: usize = 10_000;

/// File name of the structured log inside the output directory.
pub const LOG_FILE_NAME: &str = "pipeline.log";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("{} is an invalid output directory", .0.display())]
    InvalidOutputDir(PathBuf),

    #[error("Dataset directory {} does not exist", .0.display())]
    MissingDatasetsDir(PathBuf),
}

/// Where the pipeline reads from and writes to.
///
/// The root directory holds `datasets/<dataset>/*_config.yaml` and the plugin
/// programs under `src/harvesters` and `src/processors`.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub root_dir: PathBuf,
    pub output_dir: PathBuf,
    pub solr_host: String,
    pub solr_collection: String,
    pub index_rows: usize,
}

impl PipelineSettings {
    pub fn new(root_dir: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            solr_host: DEFAULT_SOLR_HOST.to_string(),
            solr_collection: DEFAULT_SOLR_COLLECTION.to_string(),
            index_rows: DEFAULT_INDEX_ROWS,
        }
    }

    pub fn with_index(mut self, host: impl Into<String>, collection: impl Into<String>) -> Self {
        self.solr_host = host.into();
        self.solr_collection = collection.into();
        self
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.root_dir.join("datasets")
    }

    /// Directory holding the `harvesters` and `processors` plugin programs.
    pub fn code_dir(&self) -> PathBuf {
        self.root_dir.join("src")
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join(LOG_FILE_NAME)
    }

    /// Checks that the output and dataset directories exist.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !self.output_dir.is_dir() {
            return Err(SettingsError::InvalidOutputDir(self.output_dir.clone()));
        }
        let datasets = self.datasets_dir();
        if !datasets.is_dir() {
            return Err(SettingsError::MissingDatasetsDir(datasets));
        }
        Ok(())
    }
}
