//! Local-disk storage backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! objects/<key>          object bodies
//! metadata/<key>.json    ObjectMetadata sidecars
//! buckets/<bucket>/<key> staging buckets (source tarballs)
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StorageError, StorageResult};
use crate::{ByteStream, ObjectMetadata, Storage, WriteRequest, validate_key};

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join("objects").join(key)
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join("metadata").join(format!("{key}.json"))
    }

    fn bucket_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join("buckets").join(bucket).join(key)
    }
}

/// Write through a temp file in the same directory, then rename into place.
async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
    if let Err(e) = tokio::fs::write(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    tokio::fs::rename(&tmp, path).await
}

/// Remove a file or directory tree. Missing paths are not an error.
async fn remove_path(path: &Path) -> std::io::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn not_found_or_io(key: &str, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::io(key, e)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn write_stream(&self, request: WriteRequest) -> StorageResult<()> {
        validate_key(&request.key)?;
        let metadata = request.metadata();
        let meta_json = serde_json::to_vec(&metadata).map_err(|e| StorageError::Metadata {
            key: request.key.clone(),
            reason: e.to_string(),
        })?;

        write_atomic(&self.object_path(&request.key), &request.body)
            .await
            .map_err(|e| StorageError::io(&request.key, e))?;
        write_atomic(&self.metadata_path(&request.key), &meta_json)
            .await
            .map_err(|e| StorageError::io(&request.key, e))?;

        debug!(key = %request.key, size = metadata.size, gzip = request.gzip_encoded, "object written");
        Ok(())
    }

    async fn read_file(&self, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        let data = tokio::fs::read(self.object_path(key))
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        Ok(Bytes::from(data))
    }

    async fn read_file_stream(&self, key: &str) -> StorageResult<ByteStream> {
        validate_key(key)?;
        let file = tokio::fs::File::open(self.object_path(key))
            .await
            .map_err(|e| not_found_or_io(key, e))?;
        Ok(Box::new(file))
    }

    async fn get_metadata(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        validate_key(key)?;
        let raw = match tokio::fs::read(self.metadata_path(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(key, e)),
        };
        let metadata = serde_json::from_slice(&raw).map_err(|e| StorageError::Metadata {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(metadata))
    }

    async fn copy_to_local(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> StorageResult<()> {
        validate_key(bucket)?;
        validate_key(key)?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(key, e))?;
        }
        tokio::fs::copy(self.bucket_path(bucket, key), local_path)
            .await
            .map_err(|e| not_found_or_io(&format!("{bucket}/{key}"), e))?;
        debug!(%bucket, %key, path = %local_path.display(), "copied to local");
        Ok(())
    }

    async fn copy_to_storage(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        recursive: bool,
    ) -> StorageResult<()> {
        validate_key(bucket)?;
        validate_key(key)?;
        let dest = self.bucket_path(bucket, key);

        if !recursive {
            let contents = tokio::fs::read(local_path)
                .await
                .map_err(|e| StorageError::io(key, e))?;
            write_atomic(&dest, &contents)
                .await
                .map_err(|e| StorageError::io(key, e))?;
            return Ok(());
        }

        let src = local_path.to_path_buf();
        let owned_key = key.to_string();
        let copied = tokio::task::spawn_blocking(move || -> std::io::Result<usize> {
            let mut count = 0;
            for entry in WalkDir::new(&src) {
                let entry = entry.map_err(std::io::Error::other)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&src)
                    .map_err(std::io::Error::other)?;
                let target = dest.join(rel);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &target)?;
                count += 1;
            }
            Ok(count)
        })
        .await
        .map_err(|e| StorageError::io(&owned_key, std::io::Error::other(e)))?
        .map_err(|e| StorageError::io(&owned_key, e))?;

        debug!(%bucket, %key, copied, "copied directory to storage");
        Ok(())
    }

    async fn delete_files(&self, prefix: &str) -> StorageResult<()> {
        validate_key(prefix)?;
        remove_path(&self.object_path(prefix))
            .await
            .map_err(|e| StorageError::io(prefix, e))?;
        remove_path(&self.root.join("metadata").join(prefix))
            .await
            .map_err(|e| StorageError::io(prefix, e))?;
        remove_path(&self.metadata_path(prefix))
            .await
            .map_err(|e| StorageError::io(prefix, e))?;
        debug!(%prefix, "deleted files");
        Ok(())
    }
}
