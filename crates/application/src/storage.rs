//! 附件文件存储的抽象。
//!
//! 文件本身由外部存储保管，聊天核心只通过这里的接口上传并校验引用。

use async_trait::async_trait;
use domain::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 存储中的一个文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlob {
    pub url: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum BlobStorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid blob: {0}")]
    Invalid(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// 保存上传的文件，返回可供消息引用的描述
    async fn put(
        &self,
        uploader: UserId,
        file_name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredBlob, BlobStorageError>;

    /// 根据 URL 查询文件，不存在时返回 `None`
    async fn stat(&self, url: &str) -> Result<Option<StoredBlob>, BlobStorageError>;
}
