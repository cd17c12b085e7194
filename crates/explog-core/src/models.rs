//! Data models for explog.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::table::Table;

/// Status of a tracked run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Finished => write!(f, "FINISHED"),
            RunStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Identity of the currently active run, as assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub run_id: String,
    pub run_name: String,
}

/// Metadata stored alongside a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub name: String,
    pub experiment: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
}

/// A single scalar metric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub key: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricPoint {
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp: Utc::now(),
        }
    }
}

/// An input dataset: a parsed table plus the provenance needed to record it
/// against a run.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub source: PathBuf,
    pub table: Table,
}

impl Dataset {
    /// Wrap a parsed table, deriving the dataset name from the file stem.
    pub fn from_table(table: Table, source: &Path) -> Self {
        let name = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string();
        Self {
            name,
            source: source.to_path_buf(),
            table,
        }
    }
}

/// The stored form of a logged input dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub name: String,
    pub source: String,
    pub num_rows: usize,
    pub columns: Vec<String>,
}

impl From<&Dataset> for DatasetMeta {
    fn from(dataset: &Dataset) -> Self {
        Self {
            name: dataset.name.clone(),
            source: dataset.source.to_string_lossy().to_string(),
            num_rows: dataset.table.num_rows(),
            columns: dataset.table.columns().to_vec(),
        }
    }
}
