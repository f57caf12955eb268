//! Error types for text processing.
//!
//! Processing errors carry the offending path, parameter name, or pattern so
//! the job row ends up with an actionable error message. None of these are
//! retried by the worker; they terminate the job.

use thiserror::Error;

/// Errors that can occur while transforming a job's input into its result.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The input file could not be read.
    #[error("failed to read file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The result file could not be written.
    #[error("failed to write file {path}: {source}")]
    FileWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A required parameter is missing, empty, or has the wrong type.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The `pattern` parameter is not a valid regular expression.
    #[error("failed to compile regex pattern '{pattern}': {source}")]
    RegexCompile {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Processing was cancelled by worker shutdown.
    #[error("processing cancelled: {0}")]
    Cancelled(String),
}
