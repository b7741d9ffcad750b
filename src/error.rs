use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the on-disk buffer
///
/// None of these ever reach the host application. They are logged and reported
/// through the telemetry sink, and the operation that raised them degrades to a no-op.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed
    #[error("{context} ({path}): {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Batch file content does not match the feature's data format
    #[error("Malformed batch file {path}: {reason}")]
    MalformedBatch { path: PathBuf, reason: String },
}

impl StorageError {
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Whether the failure only means the file is already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Errors from a single delivery attempt
#[derive(Debug, Error)]
pub enum UploadError {
    /// HTTP request error (preserves reqwest::Error for classification)
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),
    /// The attempt exceeded the configured request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// The request could not be built from the batch and configuration
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors surfaced while registering or tearing down features
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Feature '{0}' is already registered")]
    DuplicateFeature(String),
    #[error("Feature '{0}' is not configured")]
    UnknownFeature(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Invalid endpoint for feature '{feature}': {message}")]
    InvalidEndpoint { feature: String, message: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Upload(#[from] UploadError),
}
