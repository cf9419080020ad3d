//! Single-file deployment: compression decision, storage key, write.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use hostdeck_core::config::DeployConfig;
use hostdeck_core::manifest::MANIFEST_FILE;
use hostdeck_storage::{Storage, WriteRequest};
use tracing::debug;

use crate::error::{BundleError, BundleResult};

/// Body of a file to deploy.
#[derive(Debug, Clone)]
pub enum FileContent {
    Bytes(Bytes),
    /// Read from disk when deployed.
    Path(PathBuf),
}

/// A logical file headed for storage. Consumed by [`FileDeployer::deploy`].
#[derive(Debug, Clone)]
pub struct DeployFile {
    /// Relative, slash-separated path.
    pub path: String,
    pub content: FileContent,
    pub size: Option<u64>,
    pub already_compressed: bool,
    pub max_age: Option<u64>,
}

impl DeployFile {
    pub fn from_bytes(path: impl Into<String>, content: Bytes) -> Self {
        let size = content.len() as u64;
        Self {
            path: path.into(),
            content: FileContent::Bytes(content),
            size: Some(size),
            already_compressed: false,
            max_age: None,
        }
    }

    pub fn from_path(path: impl Into<String>, full_path: PathBuf, size: Option<u64>) -> Self {
        Self {
            path: path.into(),
            content: FileContent::Path(full_path),
            size,
            already_compressed: false,
            max_age: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub compress: bool,
    /// Lowercase extensions without the dot.
    pub compress_extensions: Vec<String>,
    pub default_max_age: u64,
}

impl From<&DeployConfig> for DeployOptions {
    fn from(config: &DeployConfig) -> Self {
        Self {
            compress: config.compress,
            compress_extensions: config
                .compress_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            default_max_age: config.default_max_age,
        }
    }
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self::from(&DeployConfig::default())
    }
}

/// Result of one successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedFile {
    pub key: String,
    pub stored_size: u64,
    pub gzip_encoded: bool,
}

/// `app_id/version_id/path`, forward slashes, no leading slash on `path`.
pub fn storage_key(app_id: &str, version_id: &str, path: &str) -> String {
    let path = path.replace('\\', "/");
    format!("{app_id}/{version_id}/{}", path.trim_start_matches('/'))
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub struct FileDeployer {
    storage: Arc<dyn Storage>,
    options: DeployOptions,
}

impl FileDeployer {
    pub fn new(storage: Arc<dyn Storage>, options: DeployOptions) -> Self {
        Self { storage, options }
    }

    pub fn options(&self) -> &DeployOptions {
        &self.options
    }

    pub fn should_compress(&self, file: &DeployFile) -> bool {
        if file.already_compressed || !self.options.compress {
            return false;
        }
        let file_name = file.path.rsplit(['/', '\\']).next().unwrap_or_default();
        if file_name == MANIFEST_FILE {
            return false;
        }
        match file_name.rsplit_once('.') {
            Some((_, ext)) => {
                let ext = ext.to_ascii_lowercase();
                self.options.compress_extensions.iter().any(|e| *e == ext)
            }
            None => false,
        }
    }

    pub async fn deploy(
        &self,
        app_id: &str,
        version_id: &str,
        file: DeployFile,
    ) -> BundleResult<DeployedFile> {
        let compress = self.should_compress(&file);
        let key = storage_key(app_id, version_id, &file.path);

        let raw = match file.content {
            FileContent::Bytes(bytes) => bytes,
            FileContent::Path(full_path) => {
                let data = tokio::fs::read(&full_path)
                    .await
                    .map_err(|source| BundleError::Io {
                        path: full_path.clone(),
                        source,
                    })?;
                Bytes::from(data)
            }
        };

        let body = if compress {
            let original = raw.len();
            let compressed = tokio::task::spawn_blocking(move || gzip(&raw))
                .await
                .map_err(|e| BundleError::Task(e.to_string()))?
                .map_err(|e| BundleError::Compression {
                    path: file.path.clone(),
                    reason: e.to_string(),
                })?;
            debug!(path = %file.path, original, compressed = compressed.len(), "compressed file");
            Bytes::from(compressed)
        } else {
            raw
        };

        let stored_size = body.len() as u64;
        self.storage
            .write_stream(WriteRequest {
                key: key.clone(),
                body,
                max_age: file.max_age.unwrap_or(self.options.default_max_age),
                gzip_encoded: compress || file.already_compressed,
                content_type: None,
            })
            .await?;

        debug!(%key, stored_size, gzip = compress, "deployed file");
        Ok(DeployedFile {
            key,
            stored_size,
            gzip_encoded: compress || file.already_compressed,
        })
    }
}
