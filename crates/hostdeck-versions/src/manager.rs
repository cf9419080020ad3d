//! Version manager — creates, finalizes, and deletes versions.

use std::sync::Arc;

use async_trait::async_trait;
use hostdeck_core::{
    DeployContext, ListOptions, NewVersion, Version, VersionStatus, VersionUpdate, VirtualApp,
    epoch_millis,
};
use hostdeck_state::Database;
use hostdeck_storage::Storage;
use tracing::{debug, info, warn};

use crate::error::{VersionError, VersionResult};
use crate::traffic::{TrafficOptions, TrafficPlan, oldest_unreferenced, plan_traffic};

/// Cache of app configuration held by the serving tier.
#[async_trait]
pub trait AppRegistry: Send + Sync {
    /// Drop any cached routing for `app`.
    async fn flush_app(&self, app: &VirtualApp);
}

#[derive(Clone)]
pub struct VersionManager {
    db: Arc<dyn Database>,
    storage: Arc<dyn Storage>,
    registry: Option<Arc<dyn AppRegistry>>,
}

impl VersionManager {
    pub fn new(db: Arc<dyn Database>, storage: Arc<dyn Storage>) -> Self {
        Self {
            db,
            storage,
            registry: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn AppRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Reject a deployment while another is in flight, or when `commit` was
    /// already deployed.
    pub async fn ensure_can_be_deployed(
        &self,
        app_id: &str,
        commit: Option<&str>,
    ) -> VersionResult<()> {
        self.ensure_can_be_deployed_as(app_id, commit, None).await
    }

    /// Like [`Self::ensure_can_be_deployed`], but `version_id` itself may be
    /// in flight: it is the version about to be (re)built.
    pub async fn ensure_can_be_deployed_as(
        &self,
        app_id: &str,
        commit: Option<&str>,
        version_id: Option<&str>,
    ) -> VersionResult<()> {
        let versions = self.db.list_versions(app_id, ListOptions::default()).await?;
        let others = || {
            versions
                .iter()
                .filter(|v| Some(v.version_id.as_str()) != version_id)
        };

        if let Some(commit) = commit {
            if others().any(|v| v.commit.as_deref() == Some(commit)) {
                return Err(VersionError::CommitAlreadyDeployed {
                    commit: commit.to_string(),
                });
            }
        }

        if let Some(active) = others().find(|v| !v.status.is_terminal()) {
            return Err(VersionError::DeploymentInProgress {
                app_id: app_id.to_string(),
                version_id: active.version_id.clone(),
            });
        }
        Ok(())
    }

    /// Create a version record. It starts `initiated` unless `data` says otherwise.
    pub async fn create(&self, data: NewVersion, ctx: &DeployContext) -> VersionResult<Version> {
        let app_id = ctx.app_id();
        let version_num = self.db.next_version_num(app_id).await?;

        let version = Version {
            version_id: data
                .version_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
            app_id: app_id.to_string(),
            version_num,
            name: data
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("v{version_num}")),
            message: data.message.filter(|m| !m.trim().is_empty()),
            commit: data.commit,
            user_id: data.user_id.or_else(|| ctx.user_id.clone()),
            manifest: data.manifest,
            status: data.status.unwrap_or(VersionStatus::Initiated),
            error: None,
            file_count: 0,
            duration_ms: None,
            preview_url: None,
            created_at: epoch_millis(),
        };

        let version = self.db.create_version(version).await?;
        info!(
            app_id = %version.app_id,
            version_id = %version.version_id,
            version_num,
            status = %version.status,
            "created version"
        );
        Ok(version)
    }

    /// Flip an existing version back to `running` for another attempt.
    pub async fn mark_running(&self, app_id: &str, version_id: &str) -> VersionResult<Version> {
        let mut update = VersionUpdate::new(app_id, version_id);
        update.status = Some(VersionStatus::Running);
        let version = self.db.update_version(&update).await?;
        debug!(%app_id, %version_id, "version running");
        Ok(version)
    }

    /// Write the terminal status of a version, then apply traffic routing if
    /// it completed.
    pub async fn update_status(
        &self,
        mut update: VersionUpdate,
        ctx: &DeployContext,
        options: &TrafficOptions,
    ) -> VersionResult<Version> {
        let status = update.status.unwrap_or(VersionStatus::Initiated);
        if !status.is_terminal() {
            return Err(VersionError::InvalidStatus(status));
        }
        update.app_id = ctx.app_id().to_string();
        if status != VersionStatus::Failed {
            update.error = None;
        }

        let plan = (status == VersionStatus::Complete)
            .then(|| plan_traffic(ctx, &update.version_id, options));
        if let Some(plan) = &plan {
            update.preview_url = Some(plan.preview_url().to_string());
        }

        let version = self.db.update_version(&update).await?;
        info!(
            app_id = %version.app_id,
            version_id = %version.version_id,
            status = %version.status,
            file_count = version.file_count,
            "version finalized"
        );

        if let Some(TrafficPlan::Live {
            environment, rules, ..
        }) = plan
        {
            info!(
                app_id = %version.app_id,
                version_id = %version.version_id,
                %environment,
                "routing all traffic to new version"
            );
            self.db
                .update_traffic_rules(&version.app_id, &environment, rules)
                .await?;
            if let Some(registry) = &self.registry {
                registry.flush_app(&ctx.virtual_app).await;
            }
        }

        Ok(version)
    }

    pub async fn get(&self, app_id: &str, version_id: &str) -> VersionResult<Version> {
        self.db
            .get_version(app_id, version_id)
            .await?
            .ok_or_else(|| VersionError::NotFound(version_id.to_string()))
    }

    pub async fn list(&self, app_id: &str, options: ListOptions) -> VersionResult<Vec<Version>> {
        Ok(self.db.list_versions(app_id, options).await?)
    }

    /// Delete a version's record and its stored files.
    pub async fn delete(&self, app_id: &str, version_id: &str) -> VersionResult<()> {
        self.get(app_id, version_id).await?;

        let prefix = format!("{app_id}/{version_id}");
        let (_, _) = tokio::try_join!(
            async {
                self.db
                    .delete_version(app_id, version_id)
                    .await
                    .map_err(VersionError::from)
            },
            async {
                self.storage
                    .delete_files(&prefix)
                    .await
                    .map_err(VersionError::from)
            },
        )?;
        info!(%app_id, %version_id, "version deleted");
        Ok(())
    }

    /// Delete every version of an app and the app's whole storage subtree.
    /// Returns the number of records removed.
    pub async fn delete_all(&self, app_id: &str) -> VersionResult<usize> {
        let versions = self.db.list_versions(app_id, ListOptions::default()).await?;
        let mut removed = 0;
        for version in &versions {
            if self.db.delete_version(app_id, &version.version_id).await? {
                removed += 1;
            }
        }
        self.storage.delete_files(app_id).await?;
        info!(%app_id, removed, "all versions deleted");
        Ok(removed)
    }

    /// Delete up to `count` of the oldest versions that no traffic rule
    /// references. Returns the deleted version ids.
    pub async fn delete_oldest(&self, app_id: &str, count: usize) -> VersionResult<Vec<String>> {
        let rules = self.db.get_traffic_rules(app_id).await?;
        let versions = self.db.list_versions(app_id, ListOptions::default()).await?;
        let victims = oldest_unreferenced(&versions, &rules, count);

        if victims.len() < count {
            warn!(
                %app_id,
                requested = count,
                deletable = victims.len(),
                "fewer unreferenced versions than requested"
            );
        }

        for version_id in &victims {
            self.delete(app_id, version_id).await?;
        }
        Ok(victims)
    }
}
