use thiserror::Error;

use crate::analyze::AnalyzeError;
use crate::job::{JobStatus, ValidationError};
use crate::origin_guard::OriginError;

/// Failures of engine operations, each mapping to one client-visible outcome.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Job not found.")]
    NotFound,
    #[error("Job cannot be started.")]
    CannotStart(JobStatus),
    #[error("Job is already {0} and cannot be cancelled.")]
    NotCancellable(JobStatus),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Origin(#[from] OriginError),
    #[error("File not ready.")]
    FileNotReady,
    #[error("File not found on disk.")]
    FileMissing,
    #[error("Invalid file path.")]
    InvalidFilePath,
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error("Service is shutting down.")]
    ShuttingDown,
}
