//! Error types for version management.

use hostdeck_core::VersionStatus;
use hostdeck_state::StateError;
use hostdeck_storage::StorageError;
use thiserror::Error;

pub type VersionResult<T> = Result<T, VersionError>;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("version {version_id} of app {app_id} is still being deployed")]
    DeploymentInProgress { app_id: String, version_id: String },

    #[error("commit {commit} has already been deployed")]
    CommitAlreadyDeployed { commit: String },

    #[error("Version {0} does not exist")]
    NotFound(String),

    #[error("updated version status must be terminal, got '{0}'")]
    InvalidStatus(VersionStatus),

    #[error("database error: {0}")]
    Database(#[from] StateError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl VersionError {
    pub fn code(&self) -> &'static str {
        match self {
            VersionError::DeploymentInProgress { .. } => "deploymentInProgress",
            VersionError::CommitAlreadyDeployed { .. } => "commitAlreadyDeployed",
            VersionError::NotFound(_) => "versionNotFound",
            VersionError::InvalidStatus(_) => "invalidStatus",
            VersionError::Database(_) => "databaseError",
            VersionError::Storage(_) => "storageError",
        }
    }

    /// Rejected before anything was written.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            VersionError::DeploymentInProgress { .. } | VersionError::CommitAlreadyDeployed { .. }
        )
    }
}
