//! Shared types used across hostdeck crates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::manifest::Manifest;

/// Unique identifier of a deployed version (opaque, generated per deployment).
pub type VersionId = String;

/// Unique identifier of a hosted application.
pub type AppId = String;

/// Traffic rule pattern that matches every request.
pub const MATCH_ALL_TRAFFIC: &str = "*";

/// Environment that receives traffic when none is configured.
pub const DEFAULT_ENVIRONMENT: &str = "production";

// ── Version ───────────────────────────────────────────────────────

/// Lifecycle status of a version.
///
/// `Initiated` and `Running` are in-flight; the other three are terminal and
/// are written exactly once at the end of a deployment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VersionStatus {
    Initiated,
    Running,
    Complete,
    Failed,
    TimedOut,
}

impl VersionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            VersionStatus::Complete | VersionStatus::Failed | VersionStatus::TimedOut
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VersionStatus::Initiated => "initiated",
            VersionStatus::Running => "running",
            VersionStatus::Complete => "complete",
            VersionStatus::Failed => "failed",
            VersionStatus::TimedOut => "timedOut",
        }
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent record of one deployment of an app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Version {
    pub version_id: VersionId,
    pub app_id: AppId,
    /// Monotonic per app, starting at 1.
    pub version_num: u32,
    /// User supplied, or `v{version_num}`.
    pub name: String,
    pub message: Option<String>,
    /// Source control commit the version was built from. Unique per app.
    pub commit: Option<String>,
    pub user_id: Option<String>,
    pub manifest: Manifest,
    pub status: VersionStatus,
    /// Present iff `status == Failed`.
    pub error: Option<String>,
    pub file_count: u64,
    pub duration_ms: Option<u64>,
    pub preview_url: Option<String>,
    /// Unix timestamp (milliseconds) when the record was created.
    pub created_at: u64,
}

/// Caller-supplied data for a new version. Ids, numbering and timestamps
/// are assigned by the version manager.
#[derive(Debug, Clone, Default)]
pub struct NewVersion {
    pub version_id: Option<VersionId>,
    pub name: Option<String>,
    pub message: Option<String>,
    pub commit: Option<String>,
    pub user_id: Option<String>,
    pub manifest: Manifest,
    pub status: Option<VersionStatus>,
}

/// Partial update applied to an existing version record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionUpdate {
    pub app_id: AppId,
    pub version_id: VersionId,
    pub status: Option<VersionStatus>,
    pub error: Option<String>,
    pub file_count: Option<u64>,
    pub duration_ms: Option<u64>,
    pub manifest: Option<Manifest>,
    pub preview_url: Option<String>,
}

impl VersionUpdate {
    pub fn new(app_id: &str, version_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            version_id: version_id.to_string(),
            ..Default::default()
        }
    }

    /// Apply the set fields onto `version`.
    pub fn apply_to(&self, version: &mut Version) {
        if let Some(status) = self.status {
            version.status = status;
        }
        if let Some(error) = &self.error {
            version.error = Some(error.clone());
        }
        if let Some(count) = self.file_count {
            version.file_count = count;
        }
        if let Some(duration) = self.duration_ms {
            version.duration_ms = Some(duration);
        }
        if let Some(manifest) = &self.manifest {
            version.manifest = manifest.clone();
        }
        if let Some(url) = &self.preview_url {
            version.preview_url = Some(url.clone());
        }
    }
}

/// Filter for listing versions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Only return versions whose status is `Complete`.
    pub exclude_incomplete: bool,
}

// ── Traffic ───────────────────────────────────────────────────────

/// Routes requests matching `rule` to `version_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrafficRule {
    pub version_id: VersionId,
    pub rule: String,
}

impl TrafficRule {
    /// A rule sending all traffic to `version_id`.
    pub fn all(version_id: &str) -> Self {
        Self {
            version_id: version_id.to_string(),
            rule: MATCH_ALL_TRAFFIC.to_string(),
        }
    }
}

/// Live routing table of an app: environment name → rules.
pub type TrafficRules = HashMap<String, Vec<TrafficRule>>;

// ── App context ───────────────────────────────────────────────────

/// The hosted application a deployment targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VirtualApp {
    pub app_id: AppId,
    pub name: String,
    /// Public base URL, used to build preview links.
    pub url: String,
    /// When false, every completed deployment takes all traffic.
    #[serde(default)]
    pub traffic_control_enabled: bool,
    /// App-level environment pipeline, used when no organization is set.
    #[serde(default)]
    pub environments: Vec<String>,
    /// Sub-directory of the source tree that holds the deployable files.
    pub deploy_directory: Option<String>,
}

/// Organization owning an app. Its environments override the app's.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Organization {
    pub org_id: String,
    #[serde(default)]
    pub environments: Vec<String>,
}

/// Who is deploying what.
#[derive(Debug, Clone, Default)]
pub struct DeployContext {
    pub virtual_app: VirtualApp,
    pub organization: Option<Organization>,
    pub user_id: Option<String>,
}

impl DeployContext {
    pub fn new(virtual_app: VirtualApp) -> Self {
        Self {
            virtual_app,
            organization: None,
            user_id: None,
        }
    }

    pub fn app_id(&self) -> &str {
        &self.virtual_app.app_id
    }

    /// First environment of the deployment pipeline, falling back to
    /// [`DEFAULT_ENVIRONMENT`].
    pub fn target_environment(&self) -> String {
        let environments = match &self.organization {
            Some(org) => &org.environments,
            None => &self.virtual_app.environments,
        };
        environments
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
    }
}

/// Current unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
