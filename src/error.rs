use std::path::PathBuf;

use thiserror::Error;

/// Typed failures from loading data and reading artifacts.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("dataset file not found: {0}")]
    MissingFile(PathBuf),

    #[error("unsupported dataset format '{0}', expected .csv, .jsonl or .json")]
    UnsupportedFormat(String),

    #[error("column '{column}' missing from {path}")]
    MissingColumn { column: &'static str, path: PathBuf },

    #[error("dataset is empty after filtering")]
    Empty,

    #[error("invalid split: {0}")]
    InvalidSplit(String),

    #[error("artifact at {dir} is missing {file}")]
    IncompleteArtifact { dir: PathBuf, file: &'static str },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
