//! Error types for explog-core.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: missing required field `{field}` for {section}")]
    MissingField {
        section: &'static str,
        field: &'static str,
    },

    #[error(
        "configuration error: invalid value {value:?} for field `{field}` of {section}, expected {expected}"
    )]
    InvalidField {
        section: &'static str,
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no experiment run is active")]
    RunNotActive,

    #[error("the input path {} does not exist", .0.display())]
    InputNotFound(PathBuf),

    #[error("unsupported file format: {0}. Only .json, .csv, and .parquet are supported")]
    UnsupportedFormat(String),

    #[error("tracking store channel closed")]
    ChannelClosed,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ExplogError>;
