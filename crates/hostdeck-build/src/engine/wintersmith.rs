//! The `wintersmith` engine.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{BuildContext, BuildEngine, EngineKind, copy_manifest_to_output, read_json};
use crate::error::BuildResult;
use crate::process::SpawnSpec;

#[derive(Debug, Clone, Copy, Default)]
pub struct WintersmithEngine;

/// Plugins from `config.json` that are npm packages. Entries with a file
/// extension are local plugin files and need no install.
fn npm_plugins(config: &Value) -> Vec<String> {
    config
        .get("plugins")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter(|plugin| Path::new(plugin).extension().is_none())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl BuildEngine for WintersmithEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Wintersmith
    }

    async fn prepare(&self, ctx: &BuildContext<'_>) -> BuildResult<()> {
        ctx.npm_install(ctx.source(), None).await?;

        let config = read_json(&ctx.source().join("config.json"))
            .await?
            .unwrap_or(Value::Null);
        for plugin in npm_plugins(&config) {
            info!(%plugin, "installing wintersmith plugin");
            ctx.npm_install(ctx.source(), Some(&plugin)).await?;
        }
        Ok(())
    }

    async fn build(&self, ctx: &BuildContext<'_>) -> BuildResult<()> {
        let output = ctx.workspace.output();
        ctx.run(
            "wintersmith",
            SpawnSpec::new(&ctx.tools.wintersmith)
                .args(["build", "--output"])
                .arg(output)
                .cwd(ctx.source())
                .env("PATH", ctx.node_path()),
        )
        .await?;
        copy_manifest_to_output(ctx.source(), output).await
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
    use hostdeck_core::manifest::MANIFEST_FILE;

    #[test]
    fn only_package_plugins_are_installed() {
        let config: Value =
            serde_json::from_str(r#"{"plugins":["wintersmith-less","./plugins/paginator.coffee"]}"#)
                .unwrap();
        assert_eq!(npm_plugins(&config), vec!["wintersmith-less"]);
        assert!(npm_plugins(&Value::Null).is_empty());
    }

    #[tokio::test]
    async fn installs_plugins_and_builds() {
        let fixture = Fixture::new(BuildSettings {
            engine: "wintersmith".into(),
            ..BuildSettings::default()
        })
        .await;
        fixture.write_source(MANIFEST_FILE, r#"{"name":"blog"}"#);
        fixture.write_source("config.json", r#"{"plugins":["wintersmith-less"]}"#);

        let output = run_engine(&WintersmithEngine, &fixture.ctx()).await.unwrap();
        assert_eq!(output, fixture.workspace.output());
        assert!(output.join(MANIFEST_FILE).exists());

        let lines = fixture.runner.command_lines().await;
        assert_eq!(
            lines,
            vec![
                "npm install".to_string(),
                "npm install wintersmith-less".to_string(),
                format!("wintersmith build --output {}", output.display()),
            ]
        );
    }

    #[tokio::test]
    async fn invalid_config_fails() {
        let fixture = Fixture::new(BuildSettings::default()).await;
        fixture.write_source("config.json", "{not json");
        let err = run_engine(&WintersmithEngine, &fixture.ctx()).await.unwrap_err();
        assert_eq!(err.code(), "invalidToolConfig");
    }
}
