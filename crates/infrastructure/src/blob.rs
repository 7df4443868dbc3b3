//! 附件文件存储实现
//!
//! `LocalBlobStorage` 把文件写入本地目录，旁边放一份 `.meta.json` 记录元数据；
//! `MemoryBlobStorage` 只在进程内保存，供内存后端和测试使用。

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use application::{BlobStorage, BlobStorageError, StoredBlob};
use async_trait::async_trait;
use domain::UserId;
use tokio::sync::RwLock;
use uuid::Uuid;

const META_SUFFIX: &str = ".meta.json";
const MEMORY_URL_PREFIX: &str = "memory://blobs/";

/// 只保留安全字符，防止路径穿越
fn sanitize_file_name(file_name: &str) -> Result<String, BlobStorageError> {
    let trimmed = file_name.trim();
    if trimmed.is_empty() {
        return Err(BlobStorageError::Invalid("file name is empty".into()));
    }
    if trimmed.contains("..") || trimmed.contains('/') || trimmed.contains('\\') {
        return Err(BlobStorageError::Invalid(format!(
            "file name contains a path: {trimmed}"
        )));
    }

    let sanitized: String = trimmed
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    Ok(sanitized)
}

fn validate_upload(file_name: &str, bytes: &[u8]) -> Result<String, BlobStorageError> {
    if bytes.is_empty() {
        return Err(BlobStorageError::Invalid("file is empty".into()));
    }
    sanitize_file_name(file_name)
}

fn storage_key(sanitized: &str) -> String {
    format!("{}-{}", Uuid::new_v4().simple(), sanitized)
}

#[derive(Debug, Clone)]
pub struct LocalBlobStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn key_from_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        let key = url
            .strip_prefix(self.public_base_url.as_str())?
            .strip_prefix('/')?;
        if key.is_empty() || key.contains('/') || key.contains("..") {
            return None;
        }
        Some(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}{META_SUFFIX}"))
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn put(
        &self,
        uploader: UserId,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredBlob, BlobStorageError> {
        let sanitized = validate_upload(file_name, &bytes)?;
        let key = storage_key(&sanitized);

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(&key), &bytes).await?;

        let blob = StoredBlob {
            url: format!("{}/{}", self.public_base_url, key),
            file_name: file_name.trim().to_string(),
            mime_type: mime_type.to_string(),
            size: bytes.len() as u64,
        };
        let meta = serde_json::to_vec(&blob)
            .map_err(|err| BlobStorageError::Invalid(err.to_string()))?;
        tokio::fs::write(self.meta_path(&key), meta).await?;

        tracing::debug!(uploader = %uploader, url = %blob.url, size = blob.size, "附件已保存");
        Ok(blob)
    }

    async fn stat(&self, url: &str) -> Result<Option<StoredBlob>, BlobStorageError> {
        let Some(key) = self.key_from_url(url) else {
            return Ok(None);
        };

        let meta = match tokio::fs::read(self.meta_path(key)).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let blob = serde_json::from_slice(&meta)
            .map_err(|err| BlobStorageError::Invalid(err.to_string()))?;
        Ok(Some(blob))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStorage {
    blobs: Arc<RwLock<HashMap<String, StoredBlob>>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接登记一个文件，测试里用来准备附件
    pub async fn insert(&self, blob: StoredBlob) {
        self.blobs.write().await.insert(blob.url.clone(), blob);
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn put(
        &self,
        _uploader: UserId,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredBlob, BlobStorageError> {
        let sanitized = validate_upload(file_name, &bytes)?;
        let blob = StoredBlob {
            url: format!("{MEMORY_URL_PREFIX}{}", storage_key(&sanitized)),
            file_name: file_name.trim().to_string(),
            mime_type: mime_type.to_string(),
            size: bytes.len() as u64,
        };
        self.insert(blob.clone()).await;
        Ok(blob)
    }

    async fn stat(&self, url: &str) -> Result<Option<StoredBlob>, BlobStorageError> {
        Ok(self.blobs.read().await.get(url).cloned())
    }
}
