//! Sequential pipeline driver.
//!
//! [`PipelineDriver`] walks the dataset listing according to a [`RunMode`]
//! and hands each stage to the [`StageRunner`]. Datasets and stages run one at
//! a time, and a failed stage never stops the loop.

use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::executor::{StageOutcome, StageRunner};
use crate::log_store::{Level, LogRecord};
use crate::model::{DatasetId, RunMode, StageInvocation, StageKind};

/// One stage run as seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub dataset: DatasetId,
    pub stage: StageKind,
    pub outcome: StageOutcome,
}

/// Summary of a whole run.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    /// Stage runs in execution order
    pub stages: Vec<StageReport>,

    /// Wall time of the run (milliseconds)
    pub total_duration_ms: u64,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.stages.iter().filter(|s| s.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.stages.len() - self.succeeded()
    }
}

/// Sequences stage runs across datasets.
pub struct PipelineDriver {
    runner: StageRunner,
    output_path: PathBuf,
}

impl PipelineDriver {
    pub fn new(runner: StageRunner, output_path: impl AsRef<Path>) -> Self {
        Self {
            runner,
            output_path: output_path.as_ref().to_path_buf(),
        }
    }

    pub fn runner(&self) -> &StageRunner {
        &self.runner
    }

    /// Runs `mode` over `datasets`.
    ///
    /// Multi-stage modes finish every stage of one dataset before starting
    /// the next dataset. Single-dataset modes run only the selected dataset,
    /// and nothing at all if it is not in the listing.
    #[instrument(skip(self, datasets), fields(datasets = datasets.len()))]
    pub async fn drive(&mut self, datasets: &[DatasetId], mode: &RunMode) -> RunSummary {
        let start = Instant::now();
        let mut summary = RunSummary::default();

        self.record_event(format!("Pipeline run started: {mode:?}"));

        let selected: Vec<&DatasetId> = match mode.selected() {
            Some(id) if datasets.contains(id) => vec![id],
            Some(id) => {
                warn!(dataset = %id, "Selected dataset is not in the dataset listing");
                self.record_event(format!("Dataset {id} not found, nothing to run"));
                Vec::new()
            }
            None => datasets.iter().collect(),
        };

        for dataset in selected {
            for &stage in mode.stages() {
                let invocation = StageInvocation::new(dataset.clone(), stage, &self.output_path);
                let outcome = self.runner.run_stage(invocation).await;
                summary.stages.push(StageReport {
                    dataset: dataset.clone(),
                    stage,
                    outcome,
                });
            }
        }

        summary.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            duration_ms = summary.total_duration_ms,
            "Pipeline run finished"
        );
        self.record_event(format!(
            "Pipeline run finished: {} succeeded, {} failed",
            summary.succeeded(),
            summary.failed()
        ));

        summary
    }

    fn record_event(&self, message: String) {
        if let Err(e) = self
            .runner
            .store()
            .append(LogRecord::for_pipeline(Level::Info, message))
        {
            warn!(error = %e, "Failed to record pipeline event");
        }
    }
}

/// Lists dataset identifiers: the entries of `datasets_dir`, skipping hidden
/// housekeeping entries such as `.DS_Store`, sorted by name.
pub fn discover_datasets(datasets_dir: &Path) -> std::io::Result<Vec<DatasetId>> {
    let mut datasets = Vec::new();
    for entry in std::fs::read_dir(datasets_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!(entry = ?name, "Skipping dataset with non UTF-8 name");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        datasets.push(DatasetId::new(name));
    }
    datasets.sort();
    Ok(datasets)
}
