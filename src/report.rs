//! Status narrative built from the structured log after a run.
//!
//! Records are grouped by dataset, then by stage. Informational records of a
//! group come first in append order, followed by its error records with
//! duplicates removed. Informational records are classified by content: a
//! message containing [`SUCCESS_MARKER`] is a success, anything else is a
//! failure.

use std::io::{self, Write};

use crate::executor::SUCCESS_MARKER;
use crate::log_store::{Level, LogRecord};
use crate::model::{DatasetId, StageKind};

const RESET: &str = "\x1b[0m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[93m";
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";

const RULE: &str = "=========================================================";

/// How a narrative line is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Failure,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub level: Level,
    pub message: String,
}

impl StatusEntry {
    pub fn tone(&self) -> Tone {
        match self.level {
            Level::Info if self.message.contains(SUCCESS_MARKER) => Tone::Success,
            Level::Info => Tone::Failure,
            Level::Error => Tone::Error,
        }
    }
}

/// Entries for one stage of one dataset. `stage` is `None` for dataset
/// records that name no known stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStatus {
    pub stage: Option<StageKind>,
    pub entries: Vec<StatusEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetStatus {
    pub dataset: DatasetId,
    pub stages: Vec<StageStatus>,
}

/// Per-dataset reconstruction of a run. Datasets and stages keep the order in
/// which they were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusNarrative {
    pub datasets: Vec<DatasetStatus>,
}

impl StatusNarrative {
    pub fn from_records(records: &[LogRecord]) -> Self {
        let mut narrative = Self::default();

        for record in records.iter().filter(|r| r.level == Level::Info) {
            if let (Some(dataset), stage) = record.source() {
                narrative.group(dataset, stage).entries.push(StatusEntry {
                    level: Level::Info,
                    message: record.message.clone(),
                });
            }
        }

        for record in records.iter().filter(|r| r.level == Level::Error) {
            if let (Some(dataset), stage) = record.source() {
                let group = narrative.group(dataset, stage);
                let entry = StatusEntry {
                    level: Level::Error,
                    message: record.message.clone(),
                };
                if !group.entries.contains(&entry) {
                    group.entries.push(entry);
                }
            }
        }

        narrative
    }

    pub fn dataset(&self, dataset: &DatasetId) -> Option<&DatasetStatus> {
        self.datasets.iter().find(|d| &d.dataset == dataset)
    }

    fn group(&mut self, dataset: DatasetId, stage: Option<StageKind>) -> &mut StageStatus {
        let ds_idx = match self.datasets.iter().position(|d| d.dataset == dataset) {
            Some(idx) => idx,
            None => {
                self.datasets.push(DatasetStatus {
                    dataset,
                    stages: Vec::new(),
                });
                self.datasets.len() - 1
            }
        };
        let stages = &mut self.datasets[ds_idx].stages;

        let st_idx = match stages.iter().position(|s| s.stage == stage) {
            Some(idx) => idx,
            None => {
                stages.push(StageStatus {
                    stage,
                    entries: Vec::new(),
                });
                stages.len() - 1
            }
        };
        &mut stages[st_idx]
    }
}

/// Writes the status narrative as colored terminal text.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    color: bool,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self { color: true }
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables ANSI color codes.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Builds the narrative from `records` and writes it to `out`.
    pub fn render<W: Write>(&self, records: &[LogRecord], out: &mut W) -> io::Result<()> {
        self.render_narrative(&StatusNarrative::from_records(records), out)
    }

    pub fn render_narrative<W: Write>(
        &self,
        narrative: &StatusNarrative,
        out: &mut W,
    ) -> io::Result<()> {
        writeln!(out, "\n{RULE}")?;
        writeln!(
            out,
            "===================== {} ======================",
            self.paint(CYAN, "Printing log")
        )?;
        writeln!(out, "{RULE}")?;

        for dataset in &narrative.datasets {
            let header = format!("Pipeline status for {}", dataset.dataset);
            writeln!(out, "{}:", self.paint(YELLOW, &header))?;
            for stage in &dataset.stages {
                for entry in &stage.entries {
                    match entry.tone() {
                        Tone::Success => writeln!(out, "\t{}", self.paint(GREEN, &entry.message))?,
                        Tone::Failure => writeln!(out, "\t{}", self.paint(RED, &entry.message))?,
                        Tone::Error => writeln!(out, "\t\t{}", self.paint(RED, &entry.message))?,
                    }
                }
            }
        }
        Ok(())
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.color {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }
}
