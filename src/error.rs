//! Error type shared by every pipeline in this crate.
//!
//! Nothing here is retried or recovered. A `PipelineError` returned from
//! construction, `process_item` or `close` is meant to fail the job's output
//! stage in the host framework.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while writing items or synchronizing the manifest.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[cfg(feature = "pipeline-csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("item error: {0}")]
    ItemError(String),
    #[error("sort column '{column}' is not present in the header of {path:?}")]
    MissingSortColumn { column: String, path: PathBuf },
    #[error("no resource named '{name}' in manifest {path:?}")]
    ResourceNotFound { name: String, path: PathBuf },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    Other(String),
}

