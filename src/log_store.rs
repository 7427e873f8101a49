//! Append-only store of structured pipeline records.
//!
//! Every stage outcome and pipeline event becomes one [`LogRecord`]. Records
//! are appended during the run and read back once, after the run, by the
//! status reporter. On disk the store is JSON Lines: one object per line with
//! `name`, `level` and `message`, plus the typed `dataset` and `stage` fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::model::{DatasetId, StageKind};

/// Source name of records that belong to the run rather than a dataset.
pub const PIPELINE_SOURCE: &str = "pipeline";

/// Record severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "ERROR")]
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Info => f.write_str("INFO"),
            Level::Error => f.write_str("ERROR"),
        }
    }
}

/// One immutable entry in the structured log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// `pipeline.<dataset>.<stage>`, or bare `pipeline` for run-level events.
    pub name: String,
    pub level: Level,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageKind>,
}

impl LogRecord {
    /// Record attributed to one stage of one dataset.
    pub fn for_stage(
        dataset: &DatasetId,
        stage: StageKind,
        level: Level,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: format!("{PIPELINE_SOURCE}.{dataset}.{stage}"),
            level,
            message: message.into(),
            dataset: Some(dataset.clone()),
            stage: Some(stage),
        }
    }

    /// Run-level record with no dataset attached.
    pub fn for_pipeline(level: Level, message: impl Into<String>) -> Self {
        Self {
            name: PIPELINE_SOURCE.to_string(),
            level,
            message: message.into(),
            dataset: None,
            stage: None,
        }
    }

    /// Dataset and stage this record belongs to.
    ///
    /// Uses the typed fields when present and falls back to parsing `name`
    /// for records written without them. An empty dataset means the record
    /// is run-level.
    pub fn source(&self) -> (Option<DatasetId>, Option<StageKind>) {
        if self.dataset.is_some() {
            return (self.dataset.clone(), self.stage);
        }

        let rest = match self.name.strip_prefix(PIPELINE_SOURCE) {
            Some(rest) => rest.strip_prefix('.').unwrap_or(rest),
            None => self.name.as_str(),
        };
        if rest.is_empty() {
            return (None, None);
        }

        match rest.rsplit_once('.') {
            Some((dataset, suffix)) => match StageKind::from_source_name(suffix) {
                Some(stage) if !dataset.is_empty() => (Some(DatasetId::new(dataset)), Some(stage)),
                Some(_) => (None, None),
                None => (Some(DatasetId::new(rest)), None),
            },
            None => match StageKind::from_source_name(rest) {
                Some(_) => (None, None),
                None => (Some(DatasetId::new(rest)), None),
            },
        }
    }

    /// Serializes the record as one JSON Lines entry (without newline).
    pub fn to_line(&self) -> Result<String, LogStoreError> {
        serde_json::to_string(self).map_err(LogStoreError::Serialize)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Errors raised while persisting or reading records.
#[derive(Error, Debug)]
pub enum LogStoreError {
    #[error("I/O error on log store: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize record: {0}")]
    Serialize(serde_json::Error),

    #[error("Malformed record on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Append-only record sink shared by the stage runner and plugins.
pub trait LogStore: Send + Sync {
    /// Appends a record. Existing records are never touched.
    fn append(&self, record: LogRecord) -> Result<(), LogStoreError>;

    /// Returns every record in append order.
    fn read_all(&self) -> Result<Vec<LogRecord>, LogStoreError>;
}

/// In-memory store, used by tests and embedders that render without a file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryStore {
    fn append(&self, record: LogRecord) -> Result<(), LogStoreError> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<LogRecord>, LogStoreError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }
}

/// JSON Lines file store. Each append is flushed before returning.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesStore {
    /// Creates the log file, truncating any log left by a previous run.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, LogStoreError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Opens an existing log for further appends, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogStoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads records from a log file without opening it for writing.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<LogRecord>, LogStoreError> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = LogRecord::from_line(&line).map_err(|source| LogStoreError::Malformed {
                line: idx + 1,
                source,
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl LogStore for JsonLinesStore {
    fn append(&self, record: LogRecord) -> Result<(), LogStoreError> {
        let line = record.to_line()?;
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<LogRecord>, LogStoreError> {
        {
            let mut writer = self
                .writer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            writer.flush()?;
        }
        Self::read_file(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpha() -> DatasetId {
        DatasetId::from("alpha")
    }

    #[test]
    fn test_stage_record_name() {
        let record = LogRecord::for_stage(&alpha(), StageKind::Harvest, Level::Info, "ok");
        assert_eq!(record.name, "pipeline.alpha.harvester");
        assert_eq!(record.source(), (Some(alpha()), Some(StageKind::Harvest)));
    }

    #[test]
    fn test_source_falls_back_to_name() {
        let line = r#"{"name":"pipeline.jason_3.processing","level":"ERROR","message":"bad grid"}"#;
        let record = LogRecord::from_line(line).unwrap();
        assert_eq!(
            record.source(),
            (Some(DatasetId::from("jason_3")), Some(StageKind::Process))
        );

        let dotted = LogRecord {
            name: "pipeline.ds.v2.harvester".to_string(),
            level: Level::Info,
            message: String::new(),
            dataset: None,
            stage: None,
        };
        assert_eq!(
            dotted.source(),
            (Some(DatasetId::from("ds.v2")), Some(StageKind::Harvest))
        );
    }

    #[test]
    fn test_pipeline_records_have_no_dataset() {
        let record = LogRecord::for_pipeline(Level::Info, "Pipeline run started");
        assert_eq!(record.source(), (None, None));

        let bare_stage = LogRecord {
            name: "pipeline.harvester".to_string(),
            level: Level::Info,
            message: String::new(),
            dataset: None,
            stage: None,
        };
        assert_eq!(bare_stage.source().0, None);
    }

    #[test]
    fn test_record_line_round_trip() {
        let record = LogRecord::for_stage(
            &alpha(),
            StageKind::Process,
            Level::Error,
            "Processing failed: can't open 'x.nc'",
        );
        let line = record.to_line().unwrap();
        assert!(line.contains("\"level\":\"ERROR\""));
        assert_eq!(LogRecord::from_line(&line).unwrap(), record);
    }

    #[test]
    fn test_memory_store_preserves_order() {
        let store = MemoryStore::new();
        store.append(LogRecord::for_pipeline(Level::Info, "one")).unwrap();
        store.append(LogRecord::for_pipeline(Level::Error, "two")).unwrap();
        let messages: Vec<_> = store
            .read_all()
            .unwrap()
            .into_iter()
            .map(|r| r.message)
            .collect();
        assert_eq!(messages, vec!["one", "two"]);
    }

    #[test]
    fn test_json_lines_store_persists_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.log");

        let store = JsonLinesStore::create(&path).unwrap();
        store
            .append(LogRecord::for_stage(&alpha(), StageKind::Harvest, Level::Info, "Harvesting successful"))
            .unwrap();
        store.append(LogRecord::for_pipeline(Level::Info, "done")).unwrap();

        let from_disk = JsonLinesStore::read_file(&path).unwrap();
        assert_eq!(from_disk.len(), 2);
        assert_eq!(from_disk, store.read_all().unwrap());
        drop(store);

        let fresh = JsonLinesStore::create(&path).unwrap();
        assert!(fresh.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.log");
        std::fs::write(&path, "{\"name\":\"pipeline\",\"level\":\"INFO\",\"message\":\"a\"}\nnot json\n").unwrap();

        match JsonLinesStore::read_file(&path) {
            Err(LogStoreError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed error, got {other:?}"),
        }
    }
}
