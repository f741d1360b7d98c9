//! Error types shared across the survey-processing pipeline.
//!
//! Every fallible operation in this crate returns a [`SondageError`]. The
//! variants mirror the error kinds named by the system's error handling
//! design: usage, I/O, format, ordering, and model-consistency failures each
//! get their own variant so callers can match on failure class rather than
//! parse a message string.

use thiserror::Error;

/// Errors produced by the survey-processing pipeline.
#[derive(Error, Debug)]
pub enum SondageError {
    /// A command-line or configuration usage error.
    #[error("usage error: {message}")]
    Usage { message: String },

    /// An I/O operation failed (file read/write, mapping, etc).
    #[error("I/O error: {message}")]
    Io { message: String },

    /// A format driver was asked to open a file it does not recognize.
    #[error("unsupported format: {message}")]
    UnsupportedFormat { message: String },

    /// A record or file was shorter than its declared length.
    #[error("truncated data: {message}")]
    Truncated { message: String },

    /// A time-series append arrived with a timestamp before the last one.
    #[error("out-of-order sample at t={t}, last t={last_t}")]
    OutOfOrder { t: f64, last_t: f64 },

    /// A latency table was non-monotonic or otherwise malformed.
    #[error("bad latency model: {message}")]
    BadLatencyModel { message: String },

    /// The project's entity graph violated a referential invariant.
    #[error("inconsistent project: {message}")]
    InconsistentProject { message: String },

    /// An interpolation query fell outside of any usable bracket.
    #[error("interpolation out of range at t={t}")]
    InterpolationOutOfRange { t: f64 },

    /// The tie-graph solver failed to converge.
    #[error("solver diverged: {message}")]
    SolverDiverged { message: String },

    /// A long-running operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<std::io::Error> for SondageError {
    fn from(error: std::io::Error) -> Self {
        SondageError::Io {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for SondageError {
    fn from(error: serde_json::Error) -> Self {
        SondageError::Io {
            message: format!("JSON error: {error}"),
        }
    }
}

impl From<toml::de::Error> for SondageError {
    fn from(error: toml::de::Error) -> Self {
        SondageError::Usage {
            message: format!("invalid configuration: {error}"),
        }
    }
}

impl SondageError {
    /// Exit code contract for the driver binary: 0 clean, 1 usage, 2 I/O,
    /// 3 data inconsistency.
    pub fn exit_code(&self) -> i32 {
        match self {
            SondageError::Usage { .. } => 1,
            SondageError::Io { .. } | SondageError::UnsupportedFormat { .. } => 2,
            SondageError::Truncated { .. }
            | SondageError::OutOfOrder { .. }
            | SondageError::BadLatencyModel { .. }
            | SondageError::InconsistentProject { .. }
            | SondageError::InterpolationOutOfRange { .. }
            | SondageError::SolverDiverged { .. }
            | SondageError::Cancelled => 3,
        }
    }
}

/// A record-level decode failure, tracked separately from [`SondageError`]
/// because record decode failures are logged and dropped rather than
/// aborting the pipeline.
#[derive(Error, Debug, Clone)]
#[error("record decode failed: {message}")]
pub struct RecordError {
    pub message: String,
}
