//! Error types for bundle ingestion.

use std::path::PathBuf;

use hostdeck_storage::StorageError;
use hostdeck_versions::VersionError;
use thiserror::Error;

pub type BundleResult<T> = Result<T, BundleError>;

#[derive(Debug, Error)]
pub enum BundleError {
    /// The bundle's byte source failed. Worth retrying.
    #[error("Could not read bundle: {0}")]
    BundleRead(String),

    #[error("invalid bundle archive: {0}")]
    ArchiveDecode(String),

    #[error("archive entry escapes the extraction root: {0}")]
    UnsafePath(String),

    #[error("No files found to deploy")]
    NoFilesFound,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error compressing file {path}: {reason}")]
    Compression { path: String, reason: String },

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Version(#[from] VersionError),
}

impl BundleError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BundleError::BundleRead(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            BundleError::BundleRead(_) => "bundleRead",
            BundleError::ArchiveDecode(_) => "archiveDecode",
            BundleError::UnsafePath(_) => "unsafePath",
            BundleError::NoFilesFound => "noFilesFound",
            BundleError::Io { .. } => "ioError",
            BundleError::Compression { .. } => "compressionError",
            BundleError::Task(_) => "taskFailed",
            BundleError::Storage(_) => "storageError",
            BundleError::Version(e) => e.code(),
        }
    }
}
