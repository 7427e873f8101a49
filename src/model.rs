use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of one dataset, taken from the datasets directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The two stages every dataset goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    #[serde(rename = "harvester")]
    Harvest,
    #[serde(rename = "processing")]
    Process,
}

impl StageKind {
    /// Suffix used in record names (`pipeline.<dataset>.<suffix>`).
    pub fn source_name(self) -> &'static str {
        match self {
            StageKind::Harvest => "harvester",
            StageKind::Process => "processing",
        }
    }

    /// File name of this stage's configuration inside a dataset directory.
    pub fn config_file_name(self) -> &'static str {
        match self {
            StageKind::Harvest => "harvester_config.yaml",
            StageKind::Process => "processing_config.yaml",
        }
    }

    /// Configuration key that selects the plugin implementation.
    pub fn type_key(self) -> &'static str {
        match self {
            StageKind::Harvest => "harvester_type",
            StageKind::Process => "processor_type",
        }
    }

    /// Stage-type tags accepted for this stage.
    pub fn allowed_types(self) -> &'static [&'static str] {
        match self {
            StageKind::Harvest => &["podaac", "local"],
            StageKind::Process => &["default"],
        }
    }

    /// Registry location holding this stage's plugins.
    pub fn code_location(self) -> &'static str {
        match self {
            StageKind::Harvest => "harvesters",
            StageKind::Process => "processors",
        }
    }

    /// Plugin name resolved when the configuration declares no type tag.
    pub fn default_entry(self) -> &'static str {
        self.source_name()
    }

    /// Gerund used in outcome messages ("Harvesting successful").
    pub fn verb(self) -> &'static str {
        match self {
            StageKind::Harvest => "Harvesting",
            StageKind::Process => "Processing",
        }
    }

    pub fn from_source_name(name: &str) -> Option<Self> {
        match name {
            "harvester" => Some(StageKind::Harvest),
            "processing" => Some(StageKind::Process),
            _ => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.source_name())
    }
}

/// One stage run for one dataset. Built right before the run and dropped after.
#[derive(Debug, Clone)]
pub struct StageInvocation {
    pub dataset: DatasetId,
    pub stage: StageKind,
    pub output_path: PathBuf,
}

impl StageInvocation {
    pub fn new(dataset: DatasetId, stage: StageKind, output_path: impl AsRef<Path>) -> Self {
        Self {
            dataset,
            stage,
            output_path: output_path.as_ref().to_path_buf(),
        }
    }
}

/// Which stages run, and for which datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    HarvestAll,
    ProcessAll,
    HarvestThenProcessAll,
    HarvestOne(DatasetId),
    ProcessOne(DatasetId),
    HarvestAndProcessOne(DatasetId),
}

impl RunMode {
    /// Stages run per dataset, in order.
    pub fn stages(&self) -> &'static [StageKind] {
        match self {
            RunMode::HarvestAll | RunMode::HarvestOne(_) => &[StageKind::Harvest],
            RunMode::ProcessAll | RunMode::ProcessOne(_) => &[StageKind::Process],
            RunMode::HarvestThenProcessAll | RunMode::HarvestAndProcessOne(_) => {
                &[StageKind::Harvest, StageKind::Process]
            }
        }
    }

    /// The selected dataset for single-dataset modes.
    pub fn selected(&self) -> Option<&DatasetId> {
        match self {
            RunMode::HarvestOne(id) | RunMode::ProcessOne(id) | RunMode::HarvestAndProcessOne(id) => {
                Some(id)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_names() {
        assert_eq!(StageKind::Harvest.to_string(), "harvester");
        assert_eq!(StageKind::Process.to_string(), "processing");
        assert_eq!(StageKind::from_source_name("processing"), Some(StageKind::Process));
        assert_eq!(StageKind::from_source_name("indexing"), None);
    }

    #[test]
    fn test_stage_kind_serialization() {
        let json = serde_json::to_string(&StageKind::Harvest).unwrap();
        assert_eq!(json, "\"harvester\"");
        let back: StageKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StageKind::Harvest);
    }

    #[test]
    fn test_run_mode_stages() {
        assert_eq!(
            RunMode::HarvestThenProcessAll.stages(),
            &[StageKind::Harvest, StageKind::Process]
        );
        let one = RunMode::ProcessOne(DatasetId::from("gmsl"));
        assert_eq!(one.stages(), &[StageKind::Process]);
        assert_eq!(one.selected().map(DatasetId::as_str), Some("gmsl"));
        assert!(RunMode::HarvestAll.selected().is_none());
    }
}
