//! Build engines.
//!
//! Every engine runs against a source tree that is already unpacked into
//! the [`BuildWorkspace`]. The dispatcher calls [`BuildEngine::prepare`],
//! then [`BuildEngine::build`], then deploys [`BuildEngine::output_dir`].

mod copy;
mod hugo;
mod jekyll;
mod npm;
mod wintersmith;

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use hostdeck_core::BuildSettings;
use hostdeck_core::config::ToolPaths;
use hostdeck_core::manifest::MANIFEST_FILE;
use serde_json::Value;
use tracing::{debug, info};

pub use copy::CopyEngine;
pub use hugo::HugoEngine;
pub use jekyll::JekyllEngine;
pub use npm::NpmEngine;
pub use wintersmith::WintersmithEngine;

use crate::error::{BuildError, BuildResult};
use crate::npm_optimizer::LocalTarballs;
use crate::process::{CommandRunner, SpawnSpec};
use crate::workspace::BuildWorkspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Copy,
    Npm,
    Hugo,
    Jekyll,
    Wintersmith,
}

impl EngineKind {
    pub const ALL: [EngineKind; 5] = [
        EngineKind::Copy,
        EngineKind::Npm,
        EngineKind::Hugo,
        EngineKind::Jekyll,
        EngineKind::Wintersmith,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Copy => "copy",
            EngineKind::Npm => "npm",
            EngineKind::Hugo => "hugo",
            EngineKind::Jekyll => "jekyll",
            EngineKind::Wintersmith => "wintersmith",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = BuildError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        EngineKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| BuildError::InvalidBuildEngine(name.to_string()))
    }
}

/// Everything an engine may touch during one build.
pub struct BuildContext<'a> {
    pub workspace: &'a BuildWorkspace,
    pub settings: &'a BuildSettings,
    pub deploy_directory: Option<&'a str>,
    pub denied_extensions: &'a [String],
    pub runner: &'a dyn CommandRunner,
    pub tools: &'a ToolPaths,
    /// Applied last to every tool invocation.
    pub env: &'a [(String, String)],
    pub timeout: Option<Duration>,
    pub npm_tarballs: Option<&'a LocalTarballs>,
}

impl BuildContext<'_> {
    pub fn source(&self) -> &Path {
        self.workspace.source()
    }

    /// Run `spec` with the caller's environment overlay and timeout.
    pub async fn run(&self, tool: &str, spec: SpawnSpec) -> BuildResult<()> {
        let spec = spec
            .envs(self.env.iter().map(|(k, v)| (k.clone(), OsString::from(v))))
            .timeout(self.timeout);
        info!(%tool, args = ?spec.args, "running build tool");
        self.runner
            .run(spec)
            .await
            .map_err(|e| BuildError::tool(tool, e))
    }

    /// `npm install`, or `npm install <package>`, in `dir`. A bare install
    /// first points dependencies at local tarballs when configured.
    pub async fn npm_install(&self, dir: &Path, package: Option<&str>) -> BuildResult<()> {
        if package.is_none() {
            if let Some(tarballs) = self.npm_tarballs {
                rewrite_dependencies(dir, tarballs).await?;
            }
        }
        let mut spec = SpawnSpec::new(&self.tools.npm).arg("install").cwd(dir);
        if let Some(package) = package {
            spec = spec.arg(package);
        }
        self.run("npm", spec).await
    }

    /// `PATH` with the source tree's `node_modules/.bin` in front.
    pub fn node_path(&self) -> OsString {
        let bin = self.source().join("node_modules").join(".bin");
        let mut paths = vec![bin];
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(paths).unwrap_or_default()
    }
}

#[async_trait]
pub trait BuildEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Validate settings and install dependencies.
    async fn prepare(&self, _ctx: &BuildContext<'_>) -> BuildResult<()> {
        Ok(())
    }

    async fn build(&self, ctx: &BuildContext<'_>) -> BuildResult<()>;

    /// Directory whose contents get deployed.
    fn output_dir(&self, ctx: &BuildContext<'_>) -> BuildResult<PathBuf>;
}

/// Run `engine` to completion and return its output directory.
pub async fn run_engine(engine: &dyn BuildEngine, ctx: &BuildContext<'_>) -> BuildResult<PathBuf> {
    let name = engine.kind();
    debug!(engine = %name, "preparing build");
    engine.prepare(ctx).await?;
    info!(engine = %name, "building");
    engine.build(ctx).await?;

    let output = engine.output_dir(ctx)?;
    if !tokio::fs::metadata(&output)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        return Err(BuildError::MissingOutput(output));
    }
    info!(engine = %name, output = %output.display(), "build complete");
    Ok(output)
}

pub(crate) async fn read_json(path: &Path) -> BuildResult<Option<Value>> {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BuildError::io(path, e)),
    };
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| BuildError::ToolConfig {
            file,
            reason: e.to_string(),
        })
}

async fn rewrite_dependencies(dir: &Path, tarballs: &LocalTarballs) -> BuildResult<()> {
    let path = dir.join(MANIFEST_FILE);
    let Some(mut package) = read_json(&path).await? else {
        return Ok(());
    };
    if tarballs.optimize(&mut package) == 0 {
        return Ok(());
    }
    let data = serde_json::to_vec_pretty(&package).map_err(|e| BuildError::ToolConfig {
        file: MANIFEST_FILE.to_string(),
        reason: e.to_string(),
    })?;
    tokio::fs::write(&path, data)
        .await
        .map_err(|e| BuildError::io(&path, e))
}

/// Copy `package.json` into the output so the deployed version carries its
/// manifest. Missing manifests are fine.
pub(crate) async fn copy_manifest_to_output(source: &Path, output: &Path) -> BuildResult<()> {
    let from = source.join(MANIFEST_FILE);
    let to = output.join(MANIFEST_FILE);
    if from == to {
        return Ok(());
    }
    match tokio::fs::copy(&from, &to).await {
        Ok(_) => {
            debug!(to = %to.display(), "copied package.json to output");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BuildError::io(&to, e)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::process::tests::RecordingRunner;

    /// Owns what a [`BuildContext`] borrows.
    pub(crate) struct Fixture {
        pub(crate) _temp: tempfile::TempDir,
        pub(crate) workspace: BuildWorkspace,
        pub(crate) settings: BuildSettings,
        pub(crate) deploy_directory: Option<String>,
        pub(crate) denied: Vec<String>,
        pub(crate) runner: RecordingRunner,
        pub(crate) tools: ToolPaths,
        pub(crate) env: Vec<(String, String)>,
    }

    impl Fixture {
        pub(crate) async fn new(settings: BuildSettings) -> Self {
            let temp = tempfile::tempdir().unwrap();
            let workspace = BuildWorkspace::create(temp.path(), "v1").await.unwrap();
            Self {
                _temp: temp,
                workspace,
                settings,
                deploy_directory: None,
                denied: vec!["php".into(), "asp".into()],
                runner: RecordingRunner::default(),
                tools: ToolPaths::default(),
                env: vec![("UNTRUSTED".into(), "1".into())],
            }
        }

        pub(crate) fn ctx(&self) -> BuildContext<'_> {
            BuildContext {
                workspace: &self.workspace,
                settings: &self.settings,
                deploy_directory: self.deploy_directory.as_deref(),
                denied_extensions: &self.denied,
                runner: &self.runner,
                tools: &self.tools,
                env: &self.env,
                timeout: None,
                npm_tarballs: None,
            }
        }

        pub(crate) fn write_source(&self, path: &str, data: &str) {
            let full = self.workspace.source().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, data).unwrap();
        }
    }

    #[test]
    fn engine_names_round_trip() {
        for kind in EngineKind::ALL {
            assert_eq!(kind.as_str().parse::<EngineKind>().unwrap(), kind);
        }
        let err = "gulp".parse::<EngineKind>().unwrap_err();
        assert_eq!(err.code(), "invalidBuildEngine");
        assert!("Copy".parse::<EngineKind>().is_err());
    }

    #[tokio::test]
    async fn run_applies_env_overlay_last() {
        let fixture = Fixture::new(BuildSettings::default()).await;
        let ctx = fixture.ctx();
        ctx.run("npm", SpawnSpec::new("npm").env("UNTRUSTED", "0"))
            .await
            .unwrap();
        let calls = fixture.runner.calls.lock().await;
        assert_eq!(calls[0].env_var("UNTRUSTED").unwrap(), "1");
    }

    #[tokio::test]
    async fn tool_failure_is_build_error() {
        let mut fixture = Fixture::new(BuildSettings::default()).await;
        fixture.runner = RecordingRunner::failing("npm");
        let err = fixture
            .ctx()
            .npm_install(fixture.workspace.source(), Some("left-pad"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "buildToolFailed");
        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(
            fixture.runner.command_lines().await,
            vec!["npm install left-pad"]
        );
    }

    #[tokio::test]
    async fn manifest_copy_tolerates_missing_file() {
        let fixture = Fixture::new(BuildSettings::default()).await;
        let ws = &fixture.workspace;
        copy_manifest_to_output(ws.source(), ws.output()).await.unwrap();
        assert!(!ws.output().join(MANIFEST_FILE).exists());

        fixture.write_source(MANIFEST_FILE, "{}");
        copy_manifest_to_output(ws.source(), ws.output()).await.unwrap();
        assert!(ws.output().join(MANIFEST_FILE).exists());
    }
}
