// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Every way a pipeline stage can fail.
///
/// Data-quality problems found while transforming (bad dates, numbers that
/// do not coerce, inconsistent rows) are not errors: they become nulls or
/// diagnostic counts in the transform report.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("fetch {url} failed{}: {detail}", http_status_suffix(.status))]
    Fetch {
        url: String,
        status: Option<u16>,
        detail: String,
    },

    #[error("archive entry escapes the extraction directory (zip-slip): {entry}")]
    Security { entry: String },

    #[error("failed to load {}: {detail}", path.display())]
    Load { path: PathBuf, detail: String },

    #[error("no CSV files found in {}", dir.display())]
    EmptyInput { dir: PathBuf },

    #[error("object storage error at {uri}: {detail}")]
    Storage { uri: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn fetch(url: impl Into<String>, status: Option<u16>, detail: impl Into<String>) -> Self {
        PipelineError::Fetch {
            url: url.into(),
            status,
            detail: detail.into(),
        }
    }

    pub fn load(path: impl Into<PathBuf>, detail: impl ToString) -> Self {
        PipelineError::Load {
            path: path.into(),
            detail: detail.to_string(),
        }
    }
}

fn http_status_suffix(status: &Option<u16>) -> String {
    status
        .map(|s| format!(" with HTTP {}", s))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, PipelineError>;
