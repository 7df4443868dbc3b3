use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::storage::BlobStorageError;

/// 面向调用方（WebSocket 读循环 / HTTP 处理器）的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 参数缺失或格式错误，只报告给出错的会话
    InvalidArgument,
    /// 非参与者操作对话，连接保持打开
    AccessDenied,
    /// 引用的对话或消息不存在
    NotFound,
    /// 持久化等内部故障，记录日志后以通用错误返回
    Internal,
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("blob storage error: {0}")]
    Storage(#[from] BlobStorageError),
    #[error("connection registry is not running")]
    RegistryClosed,
}

impl ApplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplicationError::Domain(DomainError::InvalidArgument { .. }) => {
                ErrorKind::InvalidArgument
            }
            ApplicationError::Domain(DomainError::AccessDenied { .. }) => ErrorKind::AccessDenied,
            ApplicationError::Domain(
                DomainError::DialogNotFound
                | DomainError::MessageNotFound
                | DomainError::AttachmentNotFound { .. },
            ) => ErrorKind::NotFound,
            ApplicationError::Repository(RepositoryError::NotFound) => ErrorKind::NotFound,
            ApplicationError::Repository(_)
            | ApplicationError::Storage(_)
            | ApplicationError::RegistryClosed => ErrorKind::Internal,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}
