//! The `hugo` engine.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{BuildContext, BuildEngine, EngineKind};
use crate::error::{BuildError, BuildResult};
use crate::process::SpawnSpec;

#[derive(Debug, Clone, Copy, Default)]
pub struct HugoEngine;

#[async_trait]
impl BuildEngine for HugoEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Hugo
    }

    /// Clone `build.themeRepo` into `themes/` when one is set.
    async fn prepare(&self, ctx: &BuildContext<'_>) -> BuildResult<()> {
        let Some(repo) = ctx.settings.theme_repo.as_deref().filter(|r| !r.is_empty()) else {
            debug!("no theme repository in build settings");
            return Ok(());
        };
        let themes = ctx.source().join("themes");
        tokio::fs::create_dir_all(&themes)
            .await
            .map_err(|e| BuildError::io(&themes, e))?;
        ctx.run(
            "git",
            SpawnSpec::new(&ctx.tools.git)
                .args(["clone", repo])
                .cwd(&themes),
        )
        .await
    }

    async fn build(&self, ctx: &BuildContext<'_>) -> BuildResult<()> {
        let ws = ctx.workspace;
        ctx.run(
            "hugo",
            SpawnSpec::new(&ctx.tools.hugo)
                .args(["--source=source", "--destination=../output"])
                .cwd(ws.root()),
        )
        .await
    }

    fn output_dir(&self, ctx: &BuildContext<'_>) -> BuildResult<PathBuf> {
        Ok(ctx.workspace.output().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::run_engine;
    use crate::engine::tests::Fixture;
    use hostdeck_core::BuildSettings;

    #[tokio::test]
    async fn builds_into_output() {
        let fixture = Fixture::new(BuildSettings {
            engine: "hugo".into(),
            ..BuildSettings::default()
        })
        .await;

        let output = run_engine(&HugoEngine, &fixture.ctx()).await.unwrap();
        assert_eq!(output, fixture.workspace.output());
        assert_eq!(
            fixture.runner.command_lines().await,
            vec!["hugo --source=source --destination=../output"]
        );
        let calls = fixture.runner.calls.lock().await;
        assert_eq!(calls[0].cwd.as_deref(), Some(fixture.workspace.root()));
    }

    #[tokio::test]
    async fn clones_theme_first() {
        let fixture = Fixture::new(BuildSettings {
            engine: "hugo".into(),
            theme_repo: Some("https://github.com/example/theme.git".into()),
            ..BuildSettings::default()
        })
        .await;

        run_engine(&HugoEngine, &fixture.ctx()).await.unwrap();
        assert_eq!(
            fixture.runner.command_lines().await,
            vec![
                "git clone https://github.com/example/theme.git",
                "hugo --source=source --destination=../output",
            ]
        );
        assert!(fixture.workspace.source().join("themes").is_dir());
    }
}
