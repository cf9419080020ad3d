pub mod build;
pub mod deploy;
pub mod versions;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use hostdeck_core::{DeployContext, DeployerConfig, Version, VirtualApp};
use hostdeck_state::StateStore;
use hostdeck_storage::LocalStorage;
use hostdeck_versions::{TrafficOptions, VersionManager};
use tracing::debug;

/// The app a command operates on.
#[derive(Args, Debug, Clone)]
pub struct AppArgs {
    /// Application id; also the storage prefix of its versions.
    #[arg(long, global = true, default_value = "default")]
    pub app_id: String,
    /// Public base URL of the app, used for preview links.
    #[arg(long, global = true, default_value = "http://localhost")]
    pub url: String,
    /// Keep completed versions as drafts unless traffic is forced.
    #[arg(long, global = true)]
    pub traffic_control: bool,
    /// Environment pipeline; the first one receives traffic.
    #[arg(long = "environment", global = true)]
    pub environments: Vec<String>,
    /// Sub-directory of the bundle holding the deployable files.
    #[arg(long, global = true)]
    pub deploy_dir: Option<String>,
}

impl AppArgs {
    pub fn context(&self) -> DeployContext {
        DeployContext::new(VirtualApp {
            app_id: self.app_id.clone(),
            name: self.app_id.clone(),
            url: self.url.clone(),
            traffic_control_enabled: self.traffic_control,
            environments: self.environments.clone(),
            deploy_directory: self.deploy_dir.clone(),
        })
    }
}

/// Routing flags shared by `deploy` and `build`.
#[derive(Args, Debug, Clone, Default)]
pub struct TrafficArgs {
    /// Route all traffic to the new version even with traffic control on.
    #[arg(long)]
    pub force_all_traffic: bool,
    /// Environment to route instead of the first configured one.
    #[arg(long = "target-env")]
    pub target_env: Option<String>,
}

impl TrafficArgs {
    pub fn options(&self) -> TrafficOptions {
        TrafficOptions {
            force_all_traffic: self.force_all_traffic,
            environment: self.target_env.clone(),
        }
    }
}

/// Loaded configuration plus the opened backends.
pub struct Env {
    pub config: DeployerConfig,
    pub versions: VersionManager,
}

impl Env {
    pub fn open(config_path: &Path) -> anyhow::Result<Self> {
        let config = DeployerConfig::load_or_default(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        debug!(config = %config_path.display(), state = %config.state.path.display(), "opening backends");

        if let Some(parent) = config.state.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let db = StateStore::open(&config.state.path)
            .with_context(|| format!("opening state at {}", config.state.path.display()))?;
        let storage = LocalStorage::new(&config.storage.root);
        let versions = VersionManager::new(Arc::new(db), Arc::new(storage));
        Ok(Self { config, versions })
    }
}

/// Print a finalized version and turn a failed one into a non-zero exit.
pub fn report(version: &Version) -> anyhow::Result<()> {
    println!("{} v{} {}", version.version_id, version.version_num, version.status.as_str());
    println!("  Files: {}", version.file_count);
    if let Some(ms) = version.duration_ms {
        println!("  Duration: {ms} ms");
    }
    if let Some(url) = &version.preview_url {
        println!("  Preview: {url}");
    }
    match &version.error {
        Some(error) => anyhow::bail!("deployment failed: {error}"),
        None if !version.status.is_terminal() => {
            anyhow::bail!("version left in status {}", version.status.as_str())
        }
        None => Ok(()),
    }
}
