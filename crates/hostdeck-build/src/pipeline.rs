//! The build-and-deploy pipeline.
//!
//! 1. check that the app accepts a deployment
//! 2. fetch the source tarball and unpack it into a fresh workspace
//! 3. load the manifest and create (or restart) the version as `running`
//! 4. run the manifest's build engine
//! 5. upload the engine's output tree
//! 6. finalize the version as `complete` or `failed`
//!
//! Failures before step 3 leave no version behind and are returned as
//! errors. Later failures are recorded on the version.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use hostdeck_bundle::{DeployFile, DeployOptions, DeployQueue, FileDeployer, unpack};
use hostdeck_core::config::{BuildConfig, DeployConfig, DeployerConfig};
use hostdeck_core::manifest::MANIFEST_FILE;
use hostdeck_core::{
    DEFAULT_ENVIRONMENT, DeployContext, Manifest, ManifestError, NewVersion, Version,
    VersionStatus, VersionUpdate,
};
use hostdeck_storage::Storage;
use hostdeck_versions::{TrafficOptions, VersionError, VersionManager};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::engine::{BuildContext, run_engine};
use crate::error::{BuildError, BuildResult};
use crate::npm_optimizer::LocalTarballs;
use crate::process::CommandRunner;
use crate::registry;
use crate::workspace::BuildWorkspace;

/// Where the source tarball comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildSource {
    /// `<app_id>/<key>` in the staging bucket.
    Staged(String),
    /// A tarball on local disk.
    Local(PathBuf),
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source: BuildSource,
    /// Build into this version. It is created when it does not exist yet.
    pub version_id: Option<String>,
    pub name: Option<String>,
    pub message: Option<String>,
    pub commit: Option<String>,
    /// Overlay applied to every build tool's environment.
    pub env: Vec<(String, String)>,
    pub traffic: TrafficOptions,
}

impl BuildRequest {
    /// A build that routes all `production` traffic to the new version once
    /// it completes.
    pub fn new(source: BuildSource) -> Self {
        Self {
            source,
            version_id: None,
            name: None,
            message: None,
            commit: None,
            env: Vec::new(),
            traffic: TrafficOptions {
                force_all_traffic: true,
                environment: Some(DEFAULT_ENVIRONMENT.to_string()),
            },
        }
    }
}

pub struct Builder {
    versions: VersionManager,
    storage: Arc<dyn Storage>,
    runner: Arc<dyn CommandRunner>,
    deployer: Arc<FileDeployer>,
    deploy: DeployConfig,
    build: BuildConfig,
    npm_tarballs: Option<LocalTarballs>,
}

impl Builder {
    pub fn new(
        versions: VersionManager,
        runner: Arc<dyn CommandRunner>,
        config: &DeployerConfig,
    ) -> BuildResult<Self> {
        let storage = versions.storage().clone();
        let deployer = Arc::new(FileDeployer::new(
            storage.clone(),
            DeployOptions::from(&config.deploy),
        ));
        let npm_tarballs = config
            .build
            .npm_tarball_dir
            .as_deref()
            .map(LocalTarballs::load)
            .transpose()?;
        Ok(Self {
            versions,
            storage,
            runner,
            deployer,
            deploy: config.deploy.clone(),
            build: config.build.clone(),
            npm_tarballs,
        })
    }

    pub async fn build(&self, request: &BuildRequest, ctx: &DeployContext) -> BuildResult<Version> {
        let app_id = ctx.app_id();
        let started = Instant::now();

        info!(%app_id, source = ?request.source, "ensure version can be deployed");
        self.versions
            .ensure_can_be_deployed_as(app_id, request.commit.as_deref(), request.version_id.as_deref())
            .await?;

        let version_id = request
            .version_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let workspace = BuildWorkspace::create(&self.build.temp_dir, &version_id).await?;
        self.fetch_source(&request.source, app_id, &workspace).await?;

        let (manifest, manifest_error) = match self.load_manifest(workspace.source()).await {
            Ok(manifest) => (manifest, None),
            Err(e) => {
                warn!(%app_id, %version_id, error = %e, "invalid manifest, using default");
                (Manifest::default(), Some(e))
            }
        };
        let version = self
            .start_version(request, ctx, &version_id, manifest.clone())
            .await?;

        let result = match manifest_error {
            Some(e) => Err(BuildError::from(e)),
            None => {
                self.run_build(&workspace, &manifest, request, ctx, &version_id)
                    .await
            }
        };
        drop(workspace);

        let mut update = VersionUpdate::new(app_id, &version.version_id);
        update.duration_ms = Some(started.elapsed().as_millis() as u64);
        match result {
            Ok(file_count) => {
                update.status = Some(VersionStatus::Complete);
                update.file_count = Some(file_count);
            }
            Err(e) => {
                error!(%app_id, %version_id, code = e.code(), error = %e, "version failed");
                update.status = Some(VersionStatus::Failed);
                update.error = Some(e.to_string());
            }
        }
        Ok(self
            .versions
            .update_status(update, ctx, &request.traffic)
            .await?)
    }

    async fn fetch_source(
        &self,
        source: &BuildSource,
        app_id: &str,
        workspace: &BuildWorkspace,
    ) -> BuildResult<()> {
        let tarball = match source {
            BuildSource::Staged(key) => {
                let storage_key = format!("{app_id}/{key}");
                let local = workspace.tarball();
                info!(bucket = %self.build.staging_bucket, key = %storage_key, "downloading source tarball");
                self.storage
                    .copy_to_local(&self.build.staging_bucket, &storage_key, &local)
                    .await?;
                local
            }
            BuildSource::Local(path) => path.clone(),
        };

        let dest = workspace.source().to_path_buf();
        let files = tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&tarball).map_err(|e| BuildError::io(&tarball, e))?;
            Ok::<_, BuildError>(unpack(std::io::BufReader::new(file), &dest)?)
        })
        .await
        .map_err(|e| BuildError::Task(e.to_string()))??;
        debug!(files, "source bundle extracted");
        Ok(())
    }

    async fn load_manifest(&self, source: &Path) -> Result<Manifest, ManifestError> {
        let path = source.join(MANIFEST_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Manifest::from_package_json(&json, &self.deploy.manifest_property),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no package.json file found, using default manifest");
                Ok(Manifest::default())
            }
            Err(source) => Err(ManifestError::Io { path, source }),
        }
    }

    /// Create the version as `running`, or flip an existing one back to it.
    async fn start_version(
        &self,
        request: &BuildRequest,
        ctx: &DeployContext,
        version_id: &str,
        manifest: Manifest,
    ) -> BuildResult<Version> {
        let app_id = ctx.app_id();
        match self.versions.get(app_id, version_id).await {
            Ok(_) => {
                debug!(%app_id, %version_id, "update the version status to running");
                let mut update = VersionUpdate::new(app_id, version_id);
                update.status = Some(VersionStatus::Running);
                update.manifest = Some(manifest);
                Ok(self
                    .versions
                    .database()
                    .update_version(&update)
                    .await
                    .map_err(VersionError::from)?)
            }
            Err(VersionError::NotFound(_)) => {
                debug!(%app_id, %version_id, "create new version");
                Ok(self
                    .versions
                    .create(
                        NewVersion {
                            version_id: Some(version_id.to_string()),
                            name: request.name.clone(),
                            message: request.message.clone(),
                            commit: request.commit.clone(),
                            user_id: None,
                            manifest,
                            status: Some(VersionStatus::Running),
                        },
                        ctx,
                    )
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run the engine and deploy its output. Returns the deployed file count.
    async fn run_build(
        &self,
        workspace: &BuildWorkspace,
        manifest: &Manifest,
        request: &BuildRequest,
        ctx: &DeployContext,
        version_id: &str,
    ) -> BuildResult<u64> {
        let engine = registry::lookup(manifest.engine())?;
        info!(app_id = %ctx.app_id(), %version_id, engine = %engine.kind(), "using build engine");

        let build_ctx = BuildContext {
            workspace,
            settings: &manifest.build,
            deploy_directory: ctx.virtual_app.deploy_directory.as_deref(),
            denied_extensions: &self.deploy.denied_extensions,
            runner: self.runner.as_ref(),
            tools: &self.build.tools,
            env: &request.env,
            timeout: self.build.tool_timeout(),
            npm_tarballs: self.npm_tarballs.as_ref(),
        };
        let output = run_engine(engine, &build_ctx).await?;
        self.deploy_output(&output, ctx.app_id(), version_id).await
    }

    /// Upload every file under `output` through the deploy queue.
    async fn deploy_output(&self, output: &Path, app_id: &str, version_id: &str) -> BuildResult<u64> {
        let root = output.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_files(&root))
            .await
            .map_err(|e| BuildError::Task(e.to_string()))??;
        info!(%app_id, %version_id, files = files.len(), "deploying build output");

        let mut queue = DeployQueue::new(
            self.deployer.clone(),
            app_id,
            version_id,
            self.deploy.concurrency,
        );
        for file in files {
            if !queue.push(file).await {
                break;
            }
        }
        let report = queue.drain().await.into_result()?;
        Ok(report.completed)
    }
}

/// Every regular file under `root`, as deploy files keyed by their
/// slash-separated relative path.
fn collect_files(root: &Path) -> BuildResult<Vec<DeployFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            BuildError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let size = entry.metadata().ok().map(|m| m.len());
        files.push(DeployFile::from_path(relative, entry.path().to_path_buf(), size));
    }
    Ok(files)
}
