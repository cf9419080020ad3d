//! The `jekyll` engine.
//!
//! Gems are installed into a build-private directory that is appended to
//! `GEM_PATH` for the build itself.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_yaml::Value;
use tracing::{debug, info, warn};

use super::{BuildContext, BuildEngine, EngineKind};
use crate::error::{BuildError, BuildResult};
use crate::process::SpawnSpec;

const CONFIG_FILE: &str = "_config.yml";

#[derive(Debug, Clone, Copy, Default)]
pub struct JekyllEngine;

fn gems_dir(ctx: &BuildContext<'_>) -> PathBuf {
    ctx.workspace.root().join("gems")
}

async fn load_config(source: &Path) -> BuildResult<Value> {
    let path = source.join(CONFIG_FILE);
    let data = match tokio::fs::read_to_string(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("no _config.yml file found, continuing without it");
            return Ok(Value::Null);
        }
        Err(e) => return Err(BuildError::io(&path, e)),
    };
    serde_yaml::from_str(&data).map_err(|e| BuildError::ToolConfig {
        file: CONFIG_FILE.to_string(),
        reason: e.to_string(),
    })
}

/// Gem names listed under `plugins` (or the older `gems`). Slashes become
/// dashes, which is how some plugins are published.
fn plugin_gems(config: &Value) -> Vec<String> {
    ["plugins", "gems"]
        .iter()
        .filter_map(|key| config.get(*key).and_then(Value::as_sequence))
        .flatten()
        .filter_map(Value::as_str)
        .map(|name| name.replace('/', "-"))
        .collect()
}

#[async_trait]
impl BuildEngine for JekyllEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Jekyll
    }

    async fn prepare(&self, ctx: &BuildContext<'_>) -> BuildResult<()> {
        let gems = gems_dir(ctx);
        tokio::fs::create_dir_all(&gems)
            .await
            .map_err(|e| BuildError::io(&gems, e))?;

        if tokio::fs::try_exists(ctx.source().join("Gemfile"))
            .await
            .unwrap_or(false)
        {
            ctx.run(
                "bundle",
                SpawnSpec::new(&ctx.tools.bundle)
                    .arg("install")
                    .arg("--path")
                    .arg(&gems)
                    .cwd(ctx.source()),
            )
            .await?;
        } else {
            debug!("no Gemfile found");
        }

        let config = load_config(ctx.source()).await?;
        for gem in plugin_gems(&config) {
            info!(%gem, "installing gem");
            ctx.run(
                "gem",
                SpawnSpec::new(&ctx.tools.gem)
                    .args(["install", gem.as_str(), "--install-dir"])
                    .arg(&gems)
                    .args(["--no-document", "--force", "--conservative"])
                    .cwd(ctx.source()),
            )
            .await?;
        }
        Ok(())
    }

    async fn build(&self, ctx: &BuildContext<'_>) -> BuildResult<()> {
        let gems = gems_dir(ctx);
        let mut gem_path: Vec<PathBuf> = ctx
            .tools
            .gem_path
            .iter()
            .flat_map(std::env::split_paths)
            .collect();
        gem_path.push(gems);
        let gem_path = std::env::join_paths(gem_path).unwrap_or_else(|_| OsString::new());

        ctx.run(
            "jekyll",
            SpawnSpec::new(&ctx.tools.jekyll)
                .args(["build", "--source", "source", "--destination", "output"])
                .cwd(ctx.workspace.root())
                .env("GEM_PATH", gem_path),
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

    fn jekyll() -> BuildSettings {
        BuildSettings {
            engine: "jekyll".into(),
            ..BuildSettings::default()
        }
    }

    #[test]
    fn plugin_names() {
        let config: Value =
            serde_yaml::from_str("plugins:\n  - jekyll-feed\ngems:\n  - jekyll/tagging\n").unwrap();
        assert_eq!(plugin_gems(&config), vec!["jekyll-feed", "jekyll-tagging"]);
        assert!(plugin_gems(&Value::Null).is_empty());
    }

    #[tokio::test]
    async fn installs_gems_and_builds() {
        let mut fixture = Fixture::new(jekyll()).await;
        fixture.tools.gem_path = Some("/usr/lib/ruby/gems".into());
        fixture.write_source("_config.yml", "title: Blog\nplugins:\n  - jekyll-feed\n");
        fixture.write_source("Gemfile", "source 'https://rubygems.org'\n");

        let output = run_engine(&JekyllEngine, &fixture.ctx()).await.unwrap();
        assert_eq!(output, fixture.workspace.output());

        let gems = fixture.workspace.root().join("gems");
        let lines = fixture.runner.command_lines().await;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], format!("bundle install --path {}", gems.display()));
        assert_eq!(
            lines[1],
            format!(
                "gem install jekyll-feed --install-dir {} --no-document --force --conservative",
                gems.display()
            )
        );
        assert_eq!(lines[2], "jekyll build --source source --destination output");

        let calls = fixture.runner.calls.lock().await;
        let gem_path = calls[2].env_var("GEM_PATH").unwrap().to_string_lossy().into_owned();
        assert!(gem_path.starts_with("/usr/lib/ruby/gems"));
        assert!(gem_path.ends_with(&*gems.to_string_lossy()));
    }

    #[tokio::test]
    async fn works_without_config() {
        let fixture = Fixture::new(jekyll()).await;
        run_engine(&JekyllEngine, &fixture.ctx()).await.unwrap();
        assert_eq!(
            fixture.runner.command_lines().await,
            vec!["jekyll build --source source --destination output"]
        );
    }

    #[tokio::test]
    async fn invalid_config_fails() {
        let fixture = Fixture::new(jekyll()).await;
        fixture.write_source("_config.yml", "title: [unclosed\n");
        let err = run_engine(&JekyllEngine, &fixture.ctx()).await.unwrap_err();
        assert_eq!(err.code(), "invalidToolConfig");
        assert!(err.to_string().starts_with("Could not parse _config.yml"));
    }
}
