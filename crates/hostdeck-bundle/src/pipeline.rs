//! Build-less bundle deployment.
//!
//! Archive entries are piped straight into the deploy queue; the version
//! record is created first and finalized once the queue drains.

use std::sync::Arc;
use std::time::Instant;

use hostdeck_core::config::DeployConfig;
use hostdeck_core::manifest::MANIFEST_FILE;
use hostdeck_core::{DeployContext, Manifest, NewVersion, Version, VersionStatus, VersionUpdate};
use hostdeck_storage::Storage;
use hostdeck_versions::{TrafficOptions, VersionManager};
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveStream, EntryKind};
use crate::deployer::{DeployFile, DeployOptions, FileContent, FileDeployer, storage_key};
use crate::error::{BundleError, BundleResult};
use crate::path_filter::{PathFilter, Resolution};
use crate::queue::DeployQueue;
use crate::retry::RetryPolicy;
use crate::source::BundleSource;

/// Called with each deployable file before it is queued. Returning true
/// ends the deployment early; the file and everything after it is skipped.
pub type StopPredicate = Arc<dyn Fn(&DeployFile) -> bool + Send + Sync>;

/// One deployment request.
#[derive(Clone)]
pub struct SourceBundle {
    pub source: Arc<dyn BundleSource>,
    /// Overrides the app's configured deploy directory.
    pub deploy_directory: Option<String>,
    pub should_stop: Option<StopPredicate>,
    pub name: Option<String>,
    pub message: Option<String>,
    pub commit: Option<String>,
    pub traffic: TrafficOptions,
}

impl SourceBundle {
    pub fn new(source: impl BundleSource + 'static) -> Self {
        Self {
            source: Arc::new(source),
            deploy_directory: None,
            should_stop: None,
            name: None,
            message: None,
            commit: None,
            traffic: TrafficOptions::default(),
        }
    }

    pub fn with_deploy_directory(mut self, dir: impl Into<String>) -> Self {
        self.deploy_directory = Some(dir.into());
        self
    }

    pub fn with_stop(mut self, predicate: impl Fn(&DeployFile) -> bool + Send + Sync + 'static) -> Self {
        self.should_stop = Some(Arc::new(predicate));
        self
    }
}

/// Result of one pass over the archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub file_count: u64,
    /// The stop predicate fired.
    pub stopped: bool,
}

/// A failed pass, with the number of files that made it to storage.
#[derive(Debug)]
pub struct DeployFailure {
    pub error: BundleError,
    pub file_count: u64,
}

impl std::fmt::Display for DeployFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} files deployed)", self.error, self.file_count)
    }
}

pub struct BundleDeployer {
    versions: VersionManager,
    storage: Arc<dyn Storage>,
    deployer: Arc<FileDeployer>,
    config: DeployConfig,
    retry: RetryPolicy,
}

impl BundleDeployer {
    pub fn new(versions: VersionManager, config: DeployConfig) -> Self {
        let storage = versions.storage().clone();
        let deployer = Arc::new(FileDeployer::new(
            storage.clone(),
            DeployOptions::from(&config),
        ));
        Self {
            versions,
            storage,
            deployer,
            retry: RetryPolicy::from(&config),
            config,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Deploy a bundle as a new version and return the finalized record.
    ///
    /// Errors are returned only when no version record could be created or
    /// finalized; deployment failures are recorded on the version instead.
    pub async fn deploy(&self, bundle: &SourceBundle, ctx: &DeployContext) -> BundleResult<Version> {
        let app_id = ctx.app_id();
        self.versions
            .ensure_can_be_deployed(app_id, bundle.commit.as_deref())
            .await?;

        let version = self
            .versions
            .create(
                NewVersion {
                    name: bundle.name.clone(),
                    message: bundle.message.clone(),
                    commit: bundle.commit.clone(),
                    ..Default::default()
                },
                ctx,
            )
            .await?;
        let version_id = version.version_id.as_str();
        let deploy_directory = bundle
            .deploy_directory
            .as_deref()
            .or(ctx.virtual_app.deploy_directory.as_deref());

        info!(
            %app_id,
            %version_id,
            bundle = %bundle.source.key(),
            deploy_directory = deploy_directory.unwrap_or(""),
            "deploying bundle"
        );
        let started = Instant::now();

        let result = self
            .retry
            .run(
                |attempt| {
                    debug!(%app_id, %version_id, attempt, "reading bundle");
                    self.deploy_archive(bundle, deploy_directory, app_id, version_id)
                },
                |failure: &DeployFailure| failure.error.is_retryable(),
            )
            .await;

        let mut update = VersionUpdate::new(app_id, version_id);
        update.duration_ms = Some(started.elapsed().as_millis() as u64);
        match result {
            Ok(outcome) if outcome.stopped => {
                info!(%app_id, %version_id, file_count = outcome.file_count, "deployment stopped early");
                update.status = Some(VersionStatus::TimedOut);
                update.file_count = Some(outcome.file_count);
            }
            Ok(outcome) => {
                update.status = Some(VersionStatus::Complete);
                update.file_count = Some(outcome.file_count);
                update.manifest = Some(self.load_deployed_manifest(app_id, version_id).await);
            }
            Err(failure) => {
                error!(
                    %app_id,
                    %version_id,
                    bundle = %bundle.source.key(),
                    code = failure.error.code(),
                    error = %failure.error,
                    "error deploying version"
                );
                update.status = Some(VersionStatus::Failed);
                update.error = Some(failure.error.to_string());
                update.file_count = Some(failure.file_count);
            }
        }

        Ok(self
            .versions
            .update_status(update, ctx, &bundle.traffic)
            .await?)
    }

    /// One pass over the archive: decode, filter, and upload every
    /// deployable file of `bundle` under `app_id/version_id`.
    pub async fn deploy_archive(
        &self,
        bundle: &SourceBundle,
        deploy_directory: Option<&str>,
        app_id: &str,
        version_id: &str,
    ) -> Result<ArchiveOutcome, DeployFailure> {
        let reader = bundle.source.open().map_err(|e| DeployFailure {
            error: BundleError::BundleRead(e.to_string()),
            file_count: 0,
        })?;

        let concurrency = self.config.concurrency.max(1);
        let mut stream =
            ArchiveStream::open_with_limit(reader, concurrency, self.config.max_entry_size);
        let mut queue = DeployQueue::new(self.deployer.clone(), app_id, version_id, concurrency);
        let filter = PathFilter::new(deploy_directory, &self.config.denied_extensions);
        let mut decode_error = None;

        while let Some(item) = stream.next_entry().await {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    queue.kill();
                    decode_error = Some(err);
                    break;
                }
            };
            if entry.kind != EntryKind::File {
                continue;
            }

            let path = match filter.resolve(&entry.path) {
                Resolution::Deploy(path) => path,
                Resolution::Skip(reason) => {
                    debug!(path = %entry.path, ?reason, "skipping entry");
                    continue;
                }
            };
            let file = DeployFile {
                path,
                content: FileContent::Bytes(entry.content),
                size: Some(entry.size),
                already_compressed: false,
                max_age: None,
            };

            if let Some(should_stop) = &bundle.should_stop {
                if should_stop(&file) {
                    info!(bundle = %bundle.source.key(), path = %file.path, "stopping deployment");
                    queue.stop();
                    break;
                }
            }

            if !queue.push(file).await {
                break;
            }
        }
        stream.abort();

        let report = queue.drain().await;
        let file_count = report.completed;
        if let Some(error) = decode_error.or(report.error) {
            return Err(DeployFailure { error, file_count });
        }
        Ok(ArchiveOutcome {
            file_count,
            stopped: report.stopped,
        })
    }

    /// Read back the manifest that was just deployed. Missing or malformed
    /// manifests fall back to the default.
    async fn load_deployed_manifest(&self, app_id: &str, version_id: &str) -> Manifest {
        let key = storage_key(app_id, version_id, MANIFEST_FILE);
        let data = match self.storage.read_file(&key).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => {
                debug!(%key, "no package.json deployed, using default manifest");
                return Manifest::default();
            }
            Err(e) => {
                warn!(%key, error = %e, "failed to read deployed manifest, using default");
                return Manifest::default();
            }
        };

        let json = String::from_utf8_lossy(&data);
        match Manifest::from_package_json(&json, &self.config.manifest_property) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(%key, error = %e, "invalid deployed manifest, using default");
                Manifest::default()
            }
        }
    }
}
