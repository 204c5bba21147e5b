//! Pipeline error taxonomy.
//!
//! Fatal errors ([`PipelineError`]) stop the run state machine and set the
//! final status to `failed`. Everything else (extraction, export, and
//! per-row problems) accumulates as warnings on the run context and is
//! returned alongside a `completed` status.

use tabpipe_core::error::CoreError;

/// Fatal, run-aborting failures.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid rule/KPI/aggregation spec, surfaced verbatim to the caller.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The audit log or output directory could not be prepared.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No input file produced any rows.
    #[error("No data was extracted from the input files")]
    NoData,

    /// The run was cancelled between stage boundaries.
    #[error("Run cancelled: {0}")]
    Cancelled(String),
}

/// Recoverable per-file extraction failure: the file is skipped and the
/// failure recorded as a warning.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Unsupported format \"{extension}\" for {path}")]
    Unsupported { path: String, extension: String },

    #[error("Failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Malformed content in {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Recoverable per-format export failure: other formats are still
/// attempted.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("No writer registered for format \"{0}\"")]
    UnknownFormat(String),

    #[error("Failed to write {path}: {reason}")]
    WriteFailed { path: String, reason: String },
}
