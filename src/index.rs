//! Consistency check between the search index and harvested files.
//!
//! Harvested entries in the index record the file they were built from. Any
//! entry whose file no longer exists on disk is deleted from the index.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::settings::DEFAULT_INDEX_ROWS;

/// Index field holding the harvested file path.
pub const FILE_PATH_FIELD: &str = "pre_transformation_file_path_s";

#[derive(Error, Debug)]
pub enum IndexError {
    /// Index unreachable or collection missing
    #[error("Index not online or collection does not exist: {0}")]
    Connectivity(String),

    /// Request failed after the index answered
    #[error("Index request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response did not have the expected shape
    #[error("Malformed index response: {0}")]
    MalformedResponse(String),
}

/// One harvested entry as stored in the index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HarvestedEntry {
    pub id: String,
    #[serde(rename = "pre_transformation_file_path_s")]
    pub file_path: String,
}

/// The operations the consistency check needs from an index.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// All entries tagged as harvested.
    async fn harvested_entries(&self) -> Result<Vec<HarvestedEntry>, IndexError>;

    /// Deletes entries by id and commits.
    async fn delete(&self, ids: &[String]) -> Result<(), IndexError>;
}

/// Result of a consistency check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub checked: usize,
    pub removed: Vec<String>,
}

/// Deletes harvested entries whose recorded file is missing.
///
/// # Errors
///
/// Returns [`IndexError`] if the index cannot be queried or updated; the
/// check stops at the first failure.
#[instrument(skip(index))]
pub async fn validate_harvested_entries(
    index: &dyn DocumentIndex,
) -> Result<ValidationSummary, IndexError> {
    let entries = index.harvested_entries().await?;

    let removed: Vec<String> = entries
        .iter()
        .filter(|entry| !Path::new(&entry.file_path).exists())
        .map(|entry| entry.id.clone())
        .collect();

    if !removed.is_empty() {
        index.delete(&removed).await?;
    }

    info!(
        checked = entries.len(),
        removed = removed.len(),
        "Removed stale harvested entries from index"
    );
    Ok(ValidationSummary {
        checked: entries.len(),
        removed,
    })
}

/// Solr-backed [`DocumentIndex`].
#[derive(Debug, Clone)]
pub struct SolrIndex {
    client: reqwest::Client,
    host: String,
    collection: String,
    rows: usize,
}

#[derive(Deserialize)]
struct SelectResponse {
    response: SelectDocs,
}

#[derive(Deserialize)]
struct SelectDocs {
    docs: Vec<HarvestedEntry>,
}

impl SolrIndex {
    /// `host` is the Solr base URL including the trailing `/solr/`.
    pub fn new(host: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into(),
            collection: collection.into(),
            rows: DEFAULT_INDEX_ROWS,
        }
    }

    /// Maximum number of entries fetched by one query.
    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    fn url(&self, handler: &str) -> String {
        let host = self.host.trim_end_matches('/');
        format!("{}/{}/{}", host, self.collection, handler)
    }
}

#[async_trait]
impl DocumentIndex for SolrIndex {
    async fn harvested_entries(&self) -> Result<Vec<HarvestedEntry>, IndexError> {
        let rows = self.rows.to_string();
        let fields = format!("id,{FILE_PATH_FIELD}");
        let response = self
            .client
            .get(self.url("select"))
            .query(&[
                ("fq", "type_s:harvested"),
                ("q", "*:*"),
                ("fl", fields.as_str()),
                ("rows", rows.as_str()),
            ])
            .send()
            .await
            .map_err(|e| IndexError::Connectivity(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(IndexError::Connectivity(format!(
                "{} returned {}",
                self.collection,
                response.status()
            )));
        }

        let body: SelectResponse = response
            .json()
            .await
            .map_err(|e| IndexError::MalformedResponse(e.to_string()))?;
        Ok(body.response.docs)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), IndexError> {
        let response = self
            .client
            .post(self.url("update"))
            .query(&[("commit", "true")])
            .json(&serde_json::json!({ "delete": ids }))
            .send()
            .await?;

        if let Err(e) = response.error_for_status_ref() {
            warn!(error = %e, "Index rejected delete");
            return Err(IndexError::Http(e));
        }
        Ok(())
    }
}
