//! Database interface consumed by the version manager.

use async_trait::async_trait;
use hostdeck_core::{ListOptions, TrafficRule, TrafficRules, Version, VersionUpdate};

use crate::error::StateResult;

/// Persistent store of versions and traffic rules.
///
/// Implementations must tolerate concurrent calls for distinct keys.
#[async_trait]
pub trait Database: Send + Sync {
    /// Insert a new version record. Fails if the id is already taken.
    async fn create_version(&self, version: Version) -> StateResult<Version>;

    /// Apply a partial update and return the stored result.
    async fn update_version(&self, update: &VersionUpdate) -> StateResult<Version>;

    async fn get_version(&self, app_id: &str, version_id: &str) -> StateResult<Option<Version>>;

    /// Versions of an app, oldest created first.
    async fn list_versions(&self, app_id: &str, options: ListOptions) -> StateResult<Vec<Version>>;

    /// Reserve the next version number of an app (1 for the first version).
    async fn next_version_num(&self, app_id: &str) -> StateResult<u32>;

    /// Replace the rule list of one environment.
    async fn update_traffic_rules(
        &self,
        app_id: &str,
        environment: &str,
        rules: Vec<TrafficRule>,
    ) -> StateResult<()>;

    /// Every environment's rules for an app.
    async fn get_traffic_rules(&self, app_id: &str) -> StateResult<TrafficRules>;

    /// Remove a version record. Returns true if it existed.
    async fn delete_version(&self, app_id: &str, version_id: &str) -> StateResult<bool>;
}
