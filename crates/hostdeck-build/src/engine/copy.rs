//! The `copy` engine deploys the source tree as is.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hostdeck_bundle::path_filter::normalize_deploy_directory;
use tracing::debug;
use walkdir::WalkDir;

use super::{BuildContext, BuildEngine, EngineKind};
use crate::error::{BuildError, BuildResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyEngine;

fn deploy_root(ctx: &BuildContext<'_>) -> BuildResult<PathBuf> {
    let Some(dir) = ctx.deploy_directory else {
        return Ok(ctx.source().to_path_buf());
    };
    if dir.trim_matches('/').is_empty() {
        return Ok(ctx.source().to_path_buf());
    }
    match normalize_deploy_directory(dir) {
        Some(relative) => Ok(ctx.source().join(relative)),
        None => Err(BuildError::InvalidDeployDirectory(dir.to_string())),
    }
}

/// Remove files with a denied extension under `root`. Returns how many
/// were removed.
fn delete_denied_files(root: &Path, denied: &[String]) -> BuildResult<usize> {
    let mut removed = 0;
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            BuildError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let denied_ext = entry
            .path()
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| denied.iter().any(|d| d.eq_ignore_ascii_case(&ext)));
        if denied_ext {
            std::fs::remove_file(entry.path()).map_err(|e| BuildError::io(entry.path(), e))?;
            debug!(path = %entry.path().display(), "deleted file with denied extension");
            removed += 1;
        }
    }
    Ok(removed)
}

#[async_trait]
impl BuildEngine for CopyEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Copy
    }

    async fn prepare(&self, ctx: &BuildContext<'_>) -> BuildResult<()> {
        let root = deploy_root(ctx)?;
        let is_dir = tokio::fs::metadata(&root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(BuildError::InvalidDeployDirectory(
                ctx.deploy_directory.unwrap_or_default().to_string(),
            ));
        }
        Ok(())
    }

    async fn build(&self, ctx: &BuildContext<'_>) -> BuildResult<()> {
        let root = deploy_root(ctx)?;
        let denied = ctx.denied_extensions.to_vec();
        let removed = tokio::task::spawn_blocking(move || delete_denied_files(&root, &denied))
            .await
            .map_err(|e| BuildError::Task(e.to_string()))??;
        debug!(removed, "removed denied files");
        Ok(())
    }

    fn output_dir(&self, ctx: &BuildContext<'_>) -> BuildResult<PathBuf> {
        deploy_root(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::run_engine;
    use crate::engine::tests::Fixture;
    use hostdeck_core::BuildSettings;

    #[tokio::test]
    async fn returns_source_without_denied_files() {
        let fixture = Fixture::new(BuildSettings::default()).await;
        fixture.write_source("index.html", "<p/>");
        fixture.write_source("admin/login.php", "<?php");
        fixture.write_source("old/page.ASP", "<% %>");

        let output = run_engine(&CopyEngine, &fixture.ctx()).await.unwrap();
        assert_eq!(output, fixture.workspace.source());
        assert!(output.join("index.html").exists());
        assert!(!output.join("admin/login.php").exists());
        assert!(!output.join("old/page.ASP").exists());
        assert!(fixture.runner.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn uses_deploy_directory() {
        let mut fixture = Fixture::new(BuildSettings::default()).await;
        fixture.write_source("dist/index.html", "<p/>");
        fixture.deploy_directory = Some("/dist/".into());

        let output = run_engine(&CopyEngine, &fixture.ctx()).await.unwrap();
        assert_eq!(output, fixture.workspace.source().join("dist"));
    }

    #[tokio::test]
    async fn missing_deploy_directory_is_invalid() {
        let mut fixture = Fixture::new(BuildSettings::default()).await;
        fixture.deploy_directory = Some("public".into());
        let err = run_engine(&CopyEngine, &fixture.ctx()).await.unwrap_err();
        assert_eq!(err.code(), "invalidDeployDirectory");
        assert_eq!(err.to_string(), "Deploy directory public is invalid.");

        fixture.deploy_directory = Some("../outside".into());
        let err = run_engine(&CopyEngine, &fixture.ctx()).await.unwrap_err();
        assert_eq!(err.code(), "invalidDeployDirectory");
    }

    #[tokio::test]
    async fn deploy_directory_must_be_a_directory() {
        let mut fixture = Fixture::new(BuildSettings::default()).await;
        fixture.write_source("dist", "not a dir");
        fixture.deploy_directory = Some("dist".into());
        let err = run_engine(&CopyEngine, &fixture.ctx()).await.unwrap_err();
        assert_eq!(err.code(), "invalidDeployDirectory");
    }
}
