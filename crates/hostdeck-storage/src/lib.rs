//! hostdeck-storage — blob storage for deployed files.
//!
//! Deployed files live at `<app_id>/<version_id>/<path>`. Compression is
//! recorded as object metadata (`Content-Encoding: gzip`), never as a
//! filename suffix. Source tarballs are exchanged with named buckets through
//! [`Storage::copy_to_local`] and [`Storage::copy_to_storage`].

pub mod content_type;
pub mod error;
pub mod local;
pub mod memory;
pub mod serve;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

pub use error::{StorageError, StorageResult};
pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Readable body of a stored object.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// One object write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    /// Full storage key, forward slashes, no leading slash.
    pub key: String,
    pub body: Bytes,
    /// `Cache-Control` max-age in seconds.
    pub max_age: u64,
    /// Body is gzip-compressed.
    pub gzip_encoded: bool,
    /// Derived from the key's extension when unset.
    pub content_type: Option<String>,
}

impl WriteRequest {
    pub fn metadata(&self) -> ObjectMetadata {
        ObjectMetadata {
            content_type: Some(
                self.content_type
                    .clone()
                    .unwrap_or_else(|| content_type::for_path(&self.key).to_string()),
            ),
            content_encoding: self.gzip_encoded.then(|| "gzip".to_string()),
            cache_control: Some(format!("public, max-age={}", self.max_age)),
            size: self.body.len() as u64,
        }
    }
}

/// Headers stored alongside an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
    /// Stored (possibly compressed) size in bytes.
    pub size: u64,
}

/// Blob storage collaborator.
///
/// Calls for distinct keys may run concurrently.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store an object. The write is atomic: readers see the old object or
    /// the complete new one.
    async fn write_stream(&self, request: WriteRequest) -> StorageResult<()>;

    async fn read_file(&self, key: &str) -> StorageResult<Bytes>;

    async fn read_file_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// `None` when the object does not exist.
    async fn get_metadata(&self, key: &str) -> StorageResult<Option<ObjectMetadata>>;

    /// Download `bucket/key` to `local_path`.
    async fn copy_to_local(&self, bucket: &str, key: &str, local_path: &Path)
    -> StorageResult<()>;

    /// Upload `local_path` to `bucket/key`. With `recursive`, `local_path` is a
    /// directory whose files land under `key/`.
    async fn copy_to_storage(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        recursive: bool,
    ) -> StorageResult<()>;

    /// Remove every object whose key is `prefix` or lies under `prefix/`.
    async fn delete_files(&self, prefix: &str) -> StorageResult<()>;
}

/// Reject keys that are empty, absolute, or contain `.`/`..` segments.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
