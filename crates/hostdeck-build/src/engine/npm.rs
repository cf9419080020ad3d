//! The `npm` engine runs a `package.json` script.
//!
//! The manifest must name both the script (`build.script`) and the directory
//! it writes to (`build.output`, relative to the source root).

use std::path::PathBuf;

use async_trait::async_trait;
use hostdeck_bundle::path_filter::normalize_deploy_directory;
use hostdeck_core::manifest::MANIFEST_FILE;
use tracing::info;

use super::{BuildContext, BuildEngine, EngineKind, copy_manifest_to_output, read_json};
use crate::error::{BuildError, BuildResult};
use crate::process::SpawnSpec;

#[derive(Debug, Clone, Copy, Default)]
pub struct NpmEngine;

fn script(ctx: &BuildContext<'_>) -> BuildResult<String> {
    ctx.settings
        .script
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(BuildError::MissingBuildSetting("script"))
}

fn output(ctx: &BuildContext<'_>) -> BuildResult<PathBuf> {
    let relative = ctx
        .settings
        .output
        .as_deref()
        .and_then(normalize_deploy_directory)
        .ok_or(BuildError::MissingBuildSetting("output"))?;
    Ok(ctx.source().join(relative))
}

#[async_trait]
impl BuildEngine for NpmEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Npm
    }

    async fn prepare(&self, ctx: &BuildContext<'_>) -> BuildResult<()> {
        output(ctx)?;
        let script = script(ctx)?;

        let package = read_json(&ctx.source().join(MANIFEST_FILE)).await?;
        let defined = package
            .as_ref()
            .and_then(|p| p.get("scripts"))
            .and_then(|s| s.get(&script))
            .and_then(|s| s.as_str())
            .is_some_and(|s| !s.trim().is_empty());
        if !defined {
            return Err(BuildError::MissingScript(script));
        }

        if let Some(package) = &package {
            let names = |section: &str| {
                package
                    .get(section)
                    .and_then(|d| d.as_object())
                    .map(|d| d.keys().cloned().collect::<Vec<_>>().join(","))
                    .unwrap_or_default()
            };
            info!(
                dependencies = %names("dependencies"),
                dev_dependencies = %names("devDependencies"),
                "installing npm dependencies"
            );
        }
        ctx.npm_install(ctx.source(), None).await
    }

    async fn build(&self, ctx: &BuildContext<'_>) -> BuildResult<()> {
        let script = script(ctx)?;
        ctx.run(
            "npm",
            SpawnSpec::new(&ctx.tools.npm)
                .args(["run-script", script.as_str()])
                .cwd(ctx.source())
                .env("PATH", ctx.node_path()),
        )
        .await?;
        copy_manifest_to_output(ctx.source(), &output(ctx)?).await
    }

    fn output_dir(&self, ctx: &BuildContext<'_>) -> BuildResult<PathBuf> {
        output(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::run_engine;
    use crate::engine::tests::Fixture;
    use crate::process::tests::RecordingRunner;
    use hostdeck_core::BuildSettings;

    fn settings(script: Option<&str>, output: Option<&str>) -> BuildSettings {
        BuildSettings {
            engine: "npm".into(),
            script: script.map(Into::into),
            output: output.map(Into::into),
            ..BuildSettings::default()
        }
    }

    const PACKAGE: &str = r#"{"name":"app","scripts":{"build":"webpack"},"dependencies":{"react":"^18.0.0"}}"#;

    #[tokio::test]
    async fn installs_runs_script_and_copies_manifest() {
        let fixture = Fixture::new(settings(Some("build"), Some("dist"))).await;
        fixture.write_source(MANIFEST_FILE, PACKAGE);
        // Stand-in for what the script would write.
        fixture.write_source("dist/index.html", "<p/>");

        let output = run_engine(&NpmEngine, &fixture.ctx()).await.unwrap();
        assert_eq!(output, fixture.workspace.source().join("dist"));
        assert!(output.join(MANIFEST_FILE).exists());
        assert_eq!(
            fixture.runner.command_lines().await,
            vec!["npm install", "npm run-script build"]
        );

        let calls = fixture.runner.calls.lock().await;
        let path = calls[1].env_var("PATH").unwrap().to_string_lossy().into_owned();
        assert!(path.starts_with(&*fixture.workspace.source().join("node_modules/.bin").to_string_lossy()));
        assert_eq!(calls[1].cwd.as_deref(), Some(fixture.workspace.source()));
    }

    #[tokio::test]
    async fn requires_output_and_script() {
        let fixture = Fixture::new(settings(Some("build"), None)).await;
        let err = run_engine(&NpmEngine, &fixture.ctx()).await.unwrap_err();
        assert_eq!(err.code(), "missingBuildSetting");
        assert!(err.to_string().contains("\"output\""));

        let fixture = Fixture::new(settings(None, Some("dist"))).await;
        let err = run_engine(&NpmEngine, &fixture.ctx()).await.unwrap_err();
        assert!(err.to_string().contains("\"script\""));
        assert!(fixture.runner.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn script_must_exist_in_package_json() {
        let fixture = Fixture::new(settings(Some("release"), Some("dist"))).await;
        fixture.write_source(MANIFEST_FILE, PACKAGE);
        let err = run_engine(&NpmEngine, &fixture.ctx()).await.unwrap_err();
        assert_eq!(err.code(), "missingBuildScript");
        assert_eq!(
            err.to_string(),
            "Specified script release does not exist in the scripts section of package.json."
        );
    }

    #[tokio::test]
    async fn script_failure_stops_build() {
        let mut fixture = Fixture::new(settings(Some("build"), Some("dist"))).await;
        fixture.runner = RecordingRunner::failing("npm");
        fixture.write_source(MANIFEST_FILE, PACKAGE);
        let err = run_engine(&NpmEngine, &fixture.ctx()).await.unwrap_err();
        assert_eq!(err.code(), "buildToolFailed");
        assert_eq!(fixture.runner.command_lines().await, vec!["npm install"]);
    }

    #[tokio::test]
    async fn missing_output_after_build() {
        let fixture = Fixture::new(settings(Some("build"), Some("dist"))).await;
        fixture.write_source(MANIFEST_FILE, PACKAGE);
        let err = run_engine(&NpmEngine, &fixture.ctx()).await.unwrap_err();
        assert_eq!(err.code(), "missingBuildOutput");
    }
}
