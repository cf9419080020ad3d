//! In-process storage backend for tests and dry runs.
//!
//! Every successful [`Storage::write_stream`] call is also appended to a
//! write log so callers can assert on exactly what was uploaded.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StorageError, StorageResult};
use crate::{ByteStream, ObjectMetadata, Storage, WriteRequest, validate_key};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    metadata: ObjectMetadata,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    buckets: Mutex<BTreeMap<String, Bytes>>,
    writes: Mutex<Vec<WriteRequest>>,
    failing_keys: Mutex<HashSet<String>>,
}

fn under_prefix(key: &str, prefix: &str) -> bool {
    key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful write, in completion order.
    pub async fn writes(&self) -> Vec<WriteRequest> {
        self.writes.lock().await.clone()
    }

    /// Keys of the objects currently stored, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    /// Place an object in a bucket, as an upload service would.
    pub async fn put_bucket_object(&self, bucket: &str, key: &str, body: Bytes) {
        self.buckets
            .lock()
            .await
            .insert(format!("{bucket}/{key}"), body);
    }

    pub async fn bucket_object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.buckets
            .lock()
            .await
            .get(&format!("{bucket}/{key}"))
            .cloned()
    }

    /// Make writes to `key` fail with an I/O error.
    pub async fn fail_writes_to(&self, key: &str) {
        self.failing_keys.lock().await.insert(key.to_string());
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn write_stream(&self, request: WriteRequest) -> StorageResult<()> {
        validate_key(&request.key)?;
        if self.failing_keys.lock().await.contains(&request.key) {
            return Err(StorageError::io(
                &request.key,
                std::io::Error::other("injected write failure"),
            ));
        }
        let stored = StoredObject {
            body: request.body.clone(),
            metadata: request.metadata(),
        };
        self.objects
            .lock()
            .await
            .insert(request.key.clone(), stored);
        debug!(key = %request.key, gzip = request.gzip_encoded, "object written");
        self.writes.lock().await.push(request);
        Ok(())
    }

    async fn read_file(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .lock()
            .await
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn read_file_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let body = self.read_file(key).await?;
        Ok(Box::new(std::io::Cursor::new(body)))
    }

    async fn get_metadata(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        Ok(self
            .objects
            .lock()
            .await
            .get(key)
            .map(|o| o.metadata.clone()))
    }

    async fn copy_to_local(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> StorageResult<()> {
        let full_key = format!("{bucket}/{key}");
        let body = self
            .buckets
            .lock()
            .await
            .get(&full_key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(full_key.clone()))?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(&full_key, e))?;
        }
        tokio::fs::write(local_path, &body)
            .await
            .map_err(|e| StorageError::io(&full_key, e))
    }

    async fn copy_to_storage(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        recursive: bool,
    ) -> StorageResult<()> {
        let mut files = Vec::new();
        if recursive {
            for entry in WalkDir::new(local_path) {
                let entry = entry.map_err(|e| StorageError::io(key, std::io::Error::other(e)))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(local_path)
                    .map_err(|e| StorageError::io(key, std::io::Error::other(e)))?;
                let rel = rel.to_string_lossy().replace('\\', "/");
                files.push((format!("{bucket}/{key}/{rel}"), entry.path().to_path_buf()));
            }
        } else {
            files.push((format!("{bucket}/{key}"), local_path.to_path_buf()));
        }

        for (full_key, path) in files {
            let body = tokio::fs::read(&path)
                .await
                .map_err(|e| StorageError::io(&full_key, e))?;
            self.buckets.lock().await.insert(full_key, Bytes::from(body));
        }
        Ok(())
    }

    async fn delete_files(&self, prefix: &str) -> StorageResult<()> {
        validate_key(prefix)?;
        self.objects
            .lock()
            .await
            .retain(|key, _| !under_prefix(key, prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str) -> WriteRequest {
        WriteRequest {
            key: key.to_string(),
            body: Bytes::from_static(b"data"),
            max_age: 60,
            gzip_encoded: false,
            content_type: None,
        }
    }

    #[tokio::test]
    async fn records_writes() {
        let storage = MemoryStorage::new();
        storage.write_stream(request("app/v1/a.html")).await.unwrap();
        storage.write_stream(request("app/v1/b.html")).await.unwrap();

        let writes = storage.writes().await;
        assert_eq!(writes.len(), 2);
        assert_eq!(storage.keys().await, vec!["app/v1/a.html", "app/v1/b.html"]);
        assert_eq!(&storage.read_file("app/v1/a.html").await.unwrap()[..], b"data");
    }

    #[tokio::test]
    async fn injected_failure() {
        let storage = MemoryStorage::new();
        storage.fail_writes_to("app/v1/bad.js").await;
        assert!(storage.write_stream(request("app/v1/bad.js")).await.is_err());
        assert!(storage.writes().await.is_empty());
    }

    #[tokio::test]
    async fn delete_respects_segment_boundaries() {
        let storage = MemoryStorage::new();
        storage.write_stream(request("app/v1/a.html")).await.unwrap();
        storage.write_stream(request("app/v10/a.html")).await.unwrap();

        storage.delete_files("app/v1").await.unwrap();
        assert_eq!(storage.keys().await, vec!["app/v10/a.html"]);
    }

    #[tokio::test]
    async fn bucket_copy_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MemoryStorage::new();
        storage
            .put_bucket_object("staging", "app/v1.tar.gz", Bytes::from_static(b"tgz"))
            .await;

        let dest = dir.path().join("nested/source.tar.gz");
        storage
            .copy_to_local("staging", "app/v1.tar.gz", &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"tgz");

        let err = storage
            .copy_to_local("staging", "missing", &dest)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
