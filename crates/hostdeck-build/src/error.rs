//! Error types for the build step.

use std::path::PathBuf;

use hostdeck_bundle::BundleError;
use hostdeck_core::ManifestError;
use hostdeck_storage::StorageError;
use hostdeck_versions::VersionError;
use thiserror::Error;

use crate::process::ProcessError;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid build engine {0}")]
    InvalidBuildEngine(String),

    #[error("Deploy directory {0} is invalid.")]
    InvalidDeployDirectory(String),

    #[error("No \"{0}\" property specified in the build section of the package.json manifest.")]
    MissingBuildSetting(&'static str),

    #[error("Specified script {0} does not exist in the scripts section of package.json.")]
    MissingScript(String),

    #[error("Could not parse {file}: {reason}")]
    ToolConfig { file: String, reason: String },

    #[error("{tool} build failure: {source}")]
    Tool {
        tool: String,
        #[source]
        source: ProcessError,
    },

    #[error("build produced no output directory at {0}")]
    MissingOutput(PathBuf),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Version(#[from] VersionError),
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn tool(tool: impl Into<String>, source: ProcessError) -> Self {
        BuildError::Tool {
            tool: tool.into(),
            source,
        }
    }

    /// Exit code of the failed build tool, when there is one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            BuildError::Tool { source, .. } => source.exit_code(),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BuildError::InvalidBuildEngine(_) => "invalidBuildEngine",
            BuildError::InvalidDeployDirectory(_) => "invalidDeployDirectory",
            BuildError::MissingBuildSetting(_) => "missingBuildSetting",
            BuildError::MissingScript(_) => "missingBuildScript",
            BuildError::ToolConfig { .. } => "invalidToolConfig",
            BuildError::Tool { .. } => "buildToolFailed",
            BuildError::MissingOutput(_) => "missingBuildOutput",
            BuildError::Io { .. } => "ioError",
            BuildError::Task(_) => "taskFailed",
            BuildError::Manifest(e) => e.code(),
            BuildError::Bundle(e) => e.code(),
            BuildError::Storage(_) => "storageError",
            BuildError::Version(e) => e.code(),
        }
    }
}
