//! hostdeck.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::manifest::DEFAULT_MANIFEST_PROPERTY;

/// Default `Cache-Control` max-age, in seconds, for deployed files.
pub const DEFAULT_MAX_AGE: u64 = 30 * 60 * 30;

/// Largest single bundle file accepted, in bytes.
pub const DEFAULT_MAX_ENTRY_SIZE: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployerConfig {
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Upload workers per deployment.
    pub concurrency: usize,
    pub default_max_age: u64,
    pub compress: bool,
    pub compress_extensions: Vec<String>,
    pub denied_extensions: Vec<String>,
    pub manifest_property: String,
    pub bundle_read_attempts: u32,
    pub bundle_retry_delay_ms: u64,
    /// Bundle entries declaring a larger size fail the archive.
    pub max_entry_size: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            default_max_age: DEFAULT_MAX_AGE,
            compress: true,
            compress_extensions: ["css", "js", "json", "txt", "svg"]
                .into_iter()
                .map(String::from)
                .collect(),
            denied_extensions: ["php", "asp"].into_iter().map(String::from).collect(),
            manifest_property: DEFAULT_MANIFEST_PROPERTY.to_string(),
            bundle_read_attempts: 3,
            bundle_retry_delay_ms: 200,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
        }
    }
}

impl DeployConfig {
    pub fn bundle_retry_delay(&self) -> Duration {
        Duration::from_millis(self.bundle_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Parent directory for per-build scratch directories.
    pub temp_dir: PathBuf,
    /// Bucket holding uploaded source tarballs.
    pub staging_bucket: String,
    pub tools: ToolPaths,
    /// Kill an external build tool after this many seconds. Unset = no limit.
    pub tool_timeout_secs: Option<u64>,
    /// Directory of local npm tarballs preferred over registry downloads.
    pub npm_tarball_dir: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("hostdeck"),
            staging_bucket: "staging".to_string(),
            tools: ToolPaths::default(),
            tool_timeout_secs: None,
            npm_tarball_dir: None,
        }
    }
}

impl BuildConfig {
    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }
}

/// Executables used by the build engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub npm: PathBuf,
    pub git: PathBuf,
    pub hugo: PathBuf,
    pub jekyll: PathBuf,
    pub gem: PathBuf,
    pub bundle: PathBuf,
    pub wintersmith: PathBuf,
    /// Prepended to `GEM_PATH` for jekyll builds.
    pub gem_path: Option<String>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            npm: "npm".into(),
            git: "git".into(),
            hugo: "hugo".into(),
            jekyll: "jekyll".into(),
            gem: "gem".into(),
            bundle: "bundle".into(),
            wintersmith: "wintersmith".into(),
            gem_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./hostdeck-data/storage"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./hostdeck-data/state.redb"),
        }
    }
}

impl DeployerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DeployerConfig = toml::from_str(&content)?;
        debug!(path = %path.display(), "loaded deployer config");
        Ok(config)
    }

    /// Load `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
