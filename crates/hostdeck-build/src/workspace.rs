//! Per-build scratch directories.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{BuildError, BuildResult};

/// `<temp_dir>/<version_id>/{source,output}` plus the downloaded tarball.
///
/// The whole tree is removed when the workspace is dropped, so every exit
/// path of a build cleans up.
#[derive(Debug)]
pub struct BuildWorkspace {
    root: PathBuf,
    source: PathBuf,
    output: PathBuf,
}

impl BuildWorkspace {
    /// Create fresh directories for `version_id`, replacing leftovers of an
    /// earlier attempt.
    pub async fn create(temp_dir: &Path, version_id: &str) -> BuildResult<Self> {
        let root = temp_dir.join(version_id);
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => debug!(root = %root.display(), "removed stale build directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BuildError::io(&root, e)),
        }

        let source = root.join("source");
        let output = root.join("output");
        for dir in [&source, &output] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| BuildError::io(dir, e))?;
        }
        debug!(root = %root.display(), "created build directories");
        Ok(Self {
            root,
            source,
            output,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Unpacked source bundle.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Default output directory for engines that write outside the source.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Where a staged tarball is downloaded to.
    pub fn tarball(&self) -> PathBuf {
        self.root.join("bundle.tar.gz")
    }
}

impl Drop for BuildWorkspace {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(root = %self.root.display(), "removed build directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(root = %self.root.display(), error = %e, "failed to remove build directory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_and_removes_tree() {
        let temp = tempfile::tempdir().unwrap();
        let ws = BuildWorkspace::create(temp.path(), "v1").await.unwrap();
        assert!(ws.source().is_dir());
        assert!(ws.output().is_dir());
        assert_eq!(ws.root(), temp.path().join("v1"));
        assert_eq!(ws.tarball(), temp.path().join("v1/bundle.tar.gz"));

        let root = ws.root().to_path_buf();
        drop(ws);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn replaces_stale_directory() {
        let temp = tempfile::tempdir().unwrap();
        let stale = temp.path().join("v1/source/old.html");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "old").unwrap();

        let ws = BuildWorkspace::create(temp.path(), "v1").await.unwrap();
        assert!(!stale.exists());
        assert!(ws.source().is_dir());
    }
}
