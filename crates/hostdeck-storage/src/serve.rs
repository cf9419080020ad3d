//! Response header resolution for deployed assets.

use crate::error::StorageResult;
use crate::{ByteStream, Storage};

/// A deployed file ready to be streamed to a client.
pub struct Asset {
    /// `(header name, value)` pairs to set on the response.
    pub headers: Vec<(&'static str, String)>,
    pub body: ByteStream,
}

impl Asset {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Debug for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Asset")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Look up `app_id/version_id/path`. `None` means the file does not exist
/// and the caller should answer 404.
pub async fn resolve_asset(
    storage: &dyn Storage,
    app_id: &str,
    version_id: &str,
    path: &str,
    default_max_age: u64,
) -> StorageResult<Option<Asset>> {
    let key = format!("{app_id}/{version_id}/{}", path.trim_start_matches('/'));
    let Some(metadata) = storage.get_metadata(&key).await? else {
        return Ok(None);
    };

    let mut headers = Vec::with_capacity(3);
    if let Some(encoding) = metadata.content_encoding {
        headers.push(("Content-Encoding", encoding));
    }
    if let Some(content_type) = metadata.content_type {
        headers.push(("Content-Type", content_type));
    }
    let cache_control = metadata
        .cache_control
        .unwrap_or_else(|| format!("max-age={default_max_age}"));
    headers.push(("Cache-Control", cache_control));

    let body = storage.read_file_stream(&key).await?;
    Ok(Some(Asset { headers, body }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStorage, WriteRequest};
    use bytes::Bytes;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn missing_asset_is_none() {
        let storage = MemoryStorage::new();
        let asset = resolve_asset(&storage, "app", "v1", "/index.html", 100)
            .await
            .unwrap();
        assert!(asset.is_none());
    }

    #[tokio::test]
    async fn gzip_asset_headers() {
        let storage = MemoryStorage::new();
        storage
            .write_stream(WriteRequest {
                key: "app/v1/js/app.js".into(),
                body: Bytes::from_static(b"gz-bytes"),
                max_age: 300,
                gzip_encoded: true,
                content_type: None,
            })
            .await
            .unwrap();

        let mut asset = resolve_asset(&storage, "app", "v1", "/js/app.js", 100)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(asset.header("content-encoding"), Some("gzip"));
        assert_eq!(asset.header("Content-Type"), Some("application/javascript"));
        assert_eq!(asset.header("Cache-Control"), Some("public, max-age=300"));

        let mut body = Vec::new();
        asset.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"gz-bytes");
    }
}
